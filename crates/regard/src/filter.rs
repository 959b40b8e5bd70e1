//! Per-axis gaze smoothing.
//!
//! The primary smoother is the One-Euro filter, an adaptive low-pass whose
//! cutoff rises with the estimated derivative so that slow drift is smoothed
//! aggressively while fast saccades pass through with little lag.
//! Reference: <https://cristal.univ-lille.fr/~casiez/1euro/>
//!
//! A constant-velocity Kalman filter can optionally be layered on top for
//! extra stabilisation of the final screen position.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Matrix4x2, Vector2, Vector4};

/// 1-D One-Euro filter driven by explicit millisecond timestamps.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    x_prev: f64,
    dx_prev: f64,
    t_prev: Option<f64>,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_prev: 0.0,
            dx_prev: 0.0,
            t_prev: None,
        }
    }

    fn alpha(cutoff: f64, dt: f64) -> f64 {
        let tau = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
        1.0 / (1.0 + tau / dt)
    }

    /// Filters one sample taken at `t_ms`. The first call after construction
    /// or [`reset`](Self::reset) returns `x` unchanged.
    pub fn filter(&mut self, x: f64, t_ms: f64) -> f64 {
        let t_prev = match self.t_prev {
            Some(t) => t,
            None => {
                self.x_prev = x;
                self.dx_prev = 0.0;
                self.t_prev = Some(t_ms);
                return x;
            }
        };

        let dt = ((t_ms - t_prev) / 1000.0).max(0.001);
        self.t_prev = Some(t_ms);

        let dx = (x - self.x_prev) / dt;
        let a_d = Self::alpha(self.d_cutoff, dt);
        let dx_hat = a_d * dx + (1.0 - a_d) * self.dx_prev;

        let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
        let a = Self::alpha(cutoff, dt);
        let x_hat = a * x + (1.0 - a) * self.x_prev;

        self.x_prev = x_hat;
        self.dx_prev = dx_hat;
        x_hat
    }

    /// Retunes the filter from an estimated cursor velocity in px/s:
    /// `min_cutoff` scales from 1 to 4 and `beta` from 0.007 to 0.057 as the
    /// velocity rises to 500 px/s.
    pub fn set_dynamic_params(&mut self, velocity: f64) {
        let v = (velocity.abs() / 500.0).clamp(0.0, 1.0);
        self.min_cutoff = 1.0 + 3.0 * v;
        self.beta = 0.007 + 0.05 * v;
    }

    /// Clears all state; the next [`filter`](Self::filter) call is an identity.
    pub fn reset(&mut self) {
        self.x_prev = 0.0;
        self.dx_prev = 0.0;
        self.t_prev = None;
    }
}

const KALMAN_PROCESS_NOISE: f64 = 0.1;
const KALMAN_MEASUREMENT_NOISE: f64 = 5.0;
const KALMAN_INITIAL_COVARIANCE: f64 = 1000.0;

/// Constant-velocity Kalman filter over screen position.
///
/// State is `[x, y, vx, vy]`; measurements are positions. Process noise is
/// `diag(q, q, 10q, 10q)` and measurement noise `diag(r, r)`.
#[derive(Debug, Clone)]
pub struct KalmanFilter2D {
    state: Vector4<f64>,
    covariance: Matrix4<f64>,
    t_prev: Option<f64>,
}

impl Default for KalmanFilter2D {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter2D {
    pub fn new() -> Self {
        Self {
            state: Vector4::zeros(),
            covariance: Matrix4::identity() * KALMAN_INITIAL_COVARIANCE,
            t_prev: None,
        }
    }

    /// Runs one predict/update cycle for a measurement at `t_ms` and returns
    /// the filtered position. The first measurement seeds the state and is
    /// returned unchanged.
    pub fn update(&mut self, x: f64, y: f64, t_ms: f64) -> (f64, f64) {
        let t_prev = match self.t_prev {
            Some(t) => t,
            None => {
                self.state = Vector4::new(x, y, 0.0, 0.0);
                self.covariance = Matrix4::identity() * KALMAN_INITIAL_COVARIANCE;
                self.t_prev = Some(t_ms);
                return (x, y);
            }
        };

        let dt = ((t_ms - t_prev) / 1000.0).max(0.001);
        self.t_prev = Some(t_ms);

        // predict
        #[rustfmt::skip]
        let transition = Matrix4::new(
            1.0, 0.0, dt, 0.0,
            0.0, 1.0, 0.0, dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        let q = KALMAN_PROCESS_NOISE;
        let process_noise = Matrix4::from_diagonal(&Vector4::new(q, q, 10.0 * q, 10.0 * q));
        self.state = transition * self.state;
        self.covariance = transition * self.covariance * transition.transpose() + process_noise;

        // update
        #[rustfmt::skip]
        let observation = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );
        let r = KALMAN_MEASUREMENT_NOISE;
        let measurement_noise = Matrix2::from_diagonal(&Vector2::new(r, r));
        let innovation = Vector2::new(x, y) - observation * self.state;
        let innovation_cov =
            observation * self.covariance * observation.transpose() + measurement_noise;
        let Some(inv) = innovation_cov.try_inverse() else {
            // numerically degenerate; skip the correction step
            return (self.state.x, self.state.y);
        };
        let gain: Matrix4x2<f64> = self.covariance * observation.transpose() * inv;
        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * observation) * self.covariance;

        (self.state.x, self.state.y)
    }

    /// Clears all state; the next measurement re-seeds the filter.
    pub fn reset(&mut self) {
        self.state = Vector4::zeros();
        self.covariance = Matrix4::identity() * KALMAN_INITIAL_COVARIANCE;
        self.t_prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_euro_first_call_is_identity() {
        let mut filter = OneEuroFilter::new(1.0, 0.007, 1.0);
        assert_eq!(filter.filter(123.4, 0.0), 123.4);
        filter.filter(200.0, 16.0);
        filter.reset();
        assert_eq!(filter.filter(-7.0, 32.0), -7.0);
    }

    #[test]
    fn one_euro_converges_to_constant_input() {
        let mut filter = OneEuroFilter::new(1.0, 0.007, 1.0);
        let mut t = 0.0;
        let mut out = 0.0;
        for _ in 0..120 {
            out = filter.filter(100.0, t);
            t += 16.0;
        }
        assert_relative_eq!(out, 100.0, epsilon = 1.0);
    }

    #[test]
    fn one_euro_smooths_jitter() {
        let mut filter = OneEuroFilter::new(1.0, 0.007, 1.0);
        let mut t = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for i in 0..200 {
            let noisy = 50.0 + if i % 2 == 0 { 4.0 } else { -4.0 };
            let out = filter.filter(noisy, t);
            t += 16.0;
            if i > 50 {
                min = min.min(out);
                max = max.max(out);
            }
        }
        assert!(max - min < 4.0, "residual jitter {}", max - min);
    }

    #[test]
    fn dynamic_params_scale_with_velocity() {
        let mut slow = OneEuroFilter::new(1.0, 0.007, 1.0);
        slow.set_dynamic_params(0.0);
        assert_relative_eq!(slow.min_cutoff, 1.0);
        assert_relative_eq!(slow.beta, 0.007);

        let mut fast = OneEuroFilter::new(1.0, 0.007, 1.0);
        fast.set_dynamic_params(500.0);
        assert_relative_eq!(fast.min_cutoff, 4.0);
        assert_relative_eq!(fast.beta, 0.057);

        let mut faster = OneEuroFilter::new(1.0, 0.007, 1.0);
        faster.set_dynamic_params(2000.0);
        assert_relative_eq!(faster.min_cutoff, 4.0);
    }

    #[test]
    fn kalman_seeds_on_first_measurement() {
        let mut kalman = KalmanFilter2D::new();
        assert_eq!(kalman.update(320.0, 240.0, 0.0), (320.0, 240.0));
    }

    #[test]
    fn kalman_tracks_linear_motion() {
        let mut kalman = KalmanFilter2D::new();
        let mut t = 0.0;
        let mut estimate = (0.0, 0.0);
        for i in 0..100 {
            let x = 10.0 * i as f64;
            estimate = kalman.update(x, 100.0, t);
            t += 33.0;
        }
        // after convergence the estimate should closely follow the target
        assert!((estimate.0 - 990.0).abs() < 30.0, "{estimate:?}");
        assert!((estimate.1 - 100.0).abs() < 5.0, "{estimate:?}");
    }
}
