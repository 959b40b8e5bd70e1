//! The personalised gaze regression model.
//!
//! [`GazeModel`] maps [`EyeFeatures`] to screen coordinates. Training fits a
//! weighted ridge regression over the selective polynomial basis ([`poly`])
//! with cross-validated regularisation, outlier purging and a residual-based
//! refit; prediction applies the learned mapping followed by an affine or
//! drift post-correction, a velocity-aware outlier gate and adaptive
//! smoothing.
//!
//! The model exclusively owns its weights and filter state. Between tracking
//! sessions it must be [`reset`](GazeModel::reset); partial reuse would leak
//! filter state from one session into the next.

pub mod poly;
pub mod ridge;
mod storage;

use std::collections::{BTreeMap, VecDeque};

use itertools::Itertools;
use regard_utils::num::TotalF64;
use regard_utils::timer::Timer;

use crate::error::{Error, Result};
use crate::features::EyeFeatures;
use crate::filter::{KalmanFilter2D, OneEuroFilter};

use poly::{BASIS_TERMS, RAW_FEATURES};
use ridge::NormalSystem;

/// One calibration observation: the features seen while the user looked at a
/// known screen target.
#[derive(Debug, Clone)]
pub struct CalibrationSample {
    pub features: EyeFeatures,
    pub target_x: f64,
    pub target_y: f64,
}

/// A predicted point of regard, in screen pixels unless the caller has
/// explicitly transformed it into image-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
    pub confidence: f64,
}

/// Mean head pose observed during calibration; prediction-time pose enters
/// the feature vector as a delta from this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub face_scale: f64,
}

/// Result summary of a successful training run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingReport {
    /// Mean pixel error over the samples used in the final fit.
    pub mean_error_px: f64,
    /// Worst pixel error over the samples used in the final fit.
    pub max_error_px: f64,
    /// Samples surviving outlier purge, NaN rejection and the residual cut.
    pub samples_used: usize,
    /// Regularisation chosen by the cross-validation search.
    pub lambda: f64,
}

/// Affine post-correction fitted from validation samples.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AffineCorrection {
    pub a11: f64,
    pub a12: f64,
    pub tx: f64,
    pub a21: f64,
    pub a22: f64,
    pub ty: f64,
}

/// A (predicted, actual) screen-position pair from validation.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionPair {
    pub predicted: [f64; 2],
    pub actual: [f64; 2],
}

/// The post-correction in effect. Affine and drift are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Correction {
    None,
    Drift { dx: f64, dy: f64 },
    Affine(AffineCorrection),
}

/// Counters for silently absorbed per-frame anomalies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictStats {
    pub low_confidence: u32,
    pub blink: u32,
    pub non_finite: u32,
    pub velocity_rejected: u32,
    pub teleports: u32,
}

/// Model construction parameters.
#[derive(Debug, Clone)]
pub struct GazeModelConfig {
    pub screen_width: f64,
    pub screen_height: f64,
    /// Layer a constant-velocity Kalman filter on top of the One-Euro output.
    pub use_kalman: bool,
    pub min_cutoff: f64,
    pub beta: f64,
    pub d_cutoff: f64,
}

impl Default for GazeModelConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920.0,
            screen_height: 1080.0,
            use_kalman: false,
            min_cutoff: 1.0,
            beta: 0.007,
            d_cutoff: 1.0,
        }
    }
}

/// Optional overrides merged into a [`GazeModelConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterPatch {
    pub use_kalman: Option<bool>,
    pub min_cutoff: Option<f64>,
    pub beta: Option<f64>,
    pub d_cutoff: Option<f64>,
}

impl GazeModelConfig {
    pub fn merged(mut self, patch: &FilterPatch) -> Self {
        if let Some(v) = patch.use_kalman {
            self.use_kalman = v;
        }
        if let Some(v) = patch.min_cutoff {
            self.min_cutoff = v;
        }
        if let Some(v) = patch.beta {
            self.beta = v;
        }
        if let Some(v) = patch.d_cutoff {
            self.d_cutoff = v;
        }
        self
    }
}

/// Minimum usable samples for training, after cleansing.
pub const MIN_TRAIN_SAMPLES: usize = 80;
/// Training aborts when NaN rejection leaves fewer rows than this.
const MIN_FINITE_ROWS: usize = 70;
/// Regularisation values tried by the leave-one-group-out search.
const LAMBDA_LADDER: [f64; 9] = [0.0005, 0.001, 0.002, 0.004, 0.008, 0.015, 0.02, 0.05, 0.1];
/// Fallback when there are too few target groups to cross-validate.
const DEFAULT_LAMBDA: f64 = 0.008;
/// Fraction of worst residuals dropped before the refit.
const RESIDUAL_DROP_FRACTION: f64 = 0.12;
/// Mean EAR below which the frame counts as a blink.
const BLINK_EAR: f64 = 0.18;
/// Minimum input confidence for prediction.
const MIN_PREDICT_CONFIDENCE: f64 = 0.3;
/// Size of the recent-prediction ring.
const HISTORY_LEN: usize = 11;

pub struct GazeModel {
    config: GazeModelConfig,
    weights_x: Vec<f64>,
    weights_y: Vec<f64>,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
    lambda: f64,
    reference_pose: Option<ReferencePose>,
    correction: Correction,
    filter_x: OneEuroFilter,
    filter_y: OneEuroFilter,
    kalman: Option<KalmanFilter2D>,
    history: VecDeque<GazePoint>,
    stats: PredictStats,
    basis_buf: Vec<f64>,
    last_predict_ts: f64,
    jump_pending: bool,
    t_purge: Timer,
    t_lambda: Timer,
    t_fit: Timer,
}

impl GazeModel {
    pub fn new(config: GazeModelConfig) -> Self {
        let filter_x = OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff);
        let filter_y = OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff);
        let kalman = config.use_kalman.then(KalmanFilter2D::new);
        Self {
            config,
            weights_x: Vec::new(),
            weights_y: Vec::new(),
            feature_means: Vec::new(),
            feature_stds: Vec::new(),
            lambda: DEFAULT_LAMBDA,
            reference_pose: None,
            correction: Correction::None,
            filter_x,
            filter_y,
            kalman,
            history: VecDeque::with_capacity(HISTORY_LEN),
            stats: PredictStats::default(),
            basis_buf: Vec::with_capacity(BASIS_TERMS),
            last_predict_ts: f64::NEG_INFINITY,
            jump_pending: false,
            t_purge: Timer::new("purge"),
            t_lambda: Timer::new("lambda search"),
            t_fit: Timer::new("fit"),
        }
    }

    #[inline]
    pub fn is_trained(&self) -> bool {
        !self.weights_x.is_empty()
    }

    #[inline]
    pub fn config(&self) -> &GazeModelConfig {
        &self.config
    }

    /// Counters for absorbed per-frame anomalies since the last reset.
    #[inline]
    pub fn stats(&self) -> PredictStats {
        self.stats
    }

    /// Profiling timers for the training stages.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_purge, &self.t_lambda, &self.t_fit].into_iter()
    }

    /// Clears all runtime state (filters, history, counters) while keeping
    /// the trained weights. Must be called between tracking sessions.
    pub fn reset(&mut self) {
        self.filter_x.reset();
        self.filter_y.reset();
        if let Some(kalman) = &mut self.kalman {
            kalman.reset();
        }
        self.history.clear();
        self.stats = PredictStats::default();
        self.last_predict_ts = f64::NEG_INFINITY;
        self.jump_pending = false;
    }

    // ------------------------------------------------------------------
    // training
    // ------------------------------------------------------------------

    /// Trains the model on calibration samples.
    ///
    /// Requires at least [`MIN_TRAIN_SAMPLES`] usable samples after the
    /// group-wise outlier purge; on any error the model state is unchanged.
    pub fn train(&mut self, samples: &[CalibrationSample]) -> Result<TrainingReport> {
        if samples.len() < MIN_TRAIN_SAMPLES {
            return Err(Error::InsufficientCalibrationData {
                got: samples.len(),
                need: MIN_TRAIN_SAMPLES,
            });
        }

        let retained = self.t_purge.time(|| purge_group_outliers(samples));
        log::debug!(
            "calibration cleansing kept {}/{} samples",
            retained.len(),
            samples.len()
        );
        if retained.len() < MIN_TRAIN_SAMPLES {
            return Err(Error::InsufficientCalibrationData {
                got: retained.len(),
                need: MIN_TRAIN_SAMPLES,
            });
        }

        let reference = mean_reference_pose(&retained);

        // raw features and z-score moments over the retained set
        let raws: Vec<[f64; RAW_FEATURES]> = retained
            .iter()
            .map(|s| poly::raw_features(&s.features, &reference))
            .collect();
        let (means, stds) = feature_moments(&raws);

        // normalise, expand, and reject rows with non-finite entries into an
        // explicitly filtered set
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(raws.len());
        let mut targets: Vec<[f64; 2]> = Vec::with_capacity(raws.len());
        let mut weights: Vec<f64> = Vec::with_capacity(raws.len());
        let mut group_keys: Vec<(u64, u64)> = Vec::with_capacity(raws.len());
        for (raw, sample) in raws.iter().zip(&retained) {
            let mut normalised = [0.0; RAW_FEATURES];
            for i in 0..RAW_FEATURES {
                normalised[i] = (raw[i] - means[i]) / stds[i];
            }
            let mut row = Vec::with_capacity(BASIS_TERMS);
            poly::expand_into(&normalised, &mut row);
            if !row.iter().all(|v| v.is_finite()) {
                continue;
            }
            let weight = ridge::sample_weight(
                sample.features.confidence,
                sample.target_x,
                sample.target_y,
                self.config.screen_width,
                self.config.screen_height,
            );
            rows.push(row);
            targets.push([sample.target_x, sample.target_y]);
            weights.push(weight);
            group_keys.push((sample.target_x.to_bits(), sample.target_y.to_bits()));
        }
        if rows.len() < MIN_FINITE_ROWS {
            return Err(Error::NonFiniteTraining);
        }

        // accumulate the total normal system plus one partial per target group
        let mut groups: BTreeMap<(u64, u64), Vec<usize>> = BTreeMap::new();
        for (i, key) in group_keys.iter().enumerate() {
            groups.entry(*key).or_default().push(i);
        }
        let mut total = NormalSystem::new(BASIS_TERMS);
        let mut group_systems: Vec<(NormalSystem, &Vec<usize>)> = Vec::with_capacity(groups.len());
        for members in groups.values() {
            let mut partial = NormalSystem::new(BASIS_TERMS);
            for &i in members {
                partial.accumulate(&rows[i], weights[i], targets[i][0], targets[i][1]);
            }
            total.add(&partial);
            group_systems.push((partial, members));
        }

        let lambda = if groups.len() >= 5 {
            self.t_lambda
                .time(|| search_lambda(&total, &group_systems, &rows, &targets))
        } else {
            DEFAULT_LAMBDA
        };
        log::debug!("ridge regularisation lambda = {lambda}");

        let (mut weights_x, mut weights_y) = self.t_fit.time(|| total.solve(lambda));

        // residual refit: drop the worst centre-normalised residuals once
        let diagonal = (self.config.screen_width.powi(2) + self.config.screen_height.powi(2))
            .sqrt()
            .max(1.0);
        let cx = self.config.screen_width / 2.0;
        let cy = self.config.screen_height / 2.0;
        let mut residuals: Vec<(usize, f64)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let err = prediction_error(row, &weights_x, &weights_y, targets[i]);
                let dist = ((targets[i][0] - cx).powi(2) + (targets[i][1] - cy).powi(2)).sqrt();
                (i, err / (1.0 + 0.5 * dist / diagonal))
            })
            .collect();
        residuals.sort_by_key(|(_, r)| std::cmp::Reverse(TotalF64(*r)));
        let drop_count = ((rows.len() as f64 * RESIDUAL_DROP_FRACTION) as usize)
            .min(rows.len().saturating_sub(MIN_TRAIN_SAMPLES));
        let kept: Vec<usize> = if drop_count > 0 {
            let mut kept: Vec<usize> = residuals[drop_count..].iter().map(|(i, _)| *i).collect();
            kept.sort_unstable();
            let mut refit = NormalSystem::new(BASIS_TERMS);
            for &i in &kept {
                refit.accumulate(&rows[i], weights[i], targets[i][0], targets[i][1]);
            }
            let solved = self.t_fit.time(|| refit.solve(lambda));
            weights_x = solved.0;
            weights_y = solved.1;
            kept
        } else {
            (0..rows.len()).collect()
        };

        let mut mean_error = 0.0;
        let mut max_error = 0.0_f64;
        for &i in &kept {
            let err = prediction_error(&rows[i], &weights_x, &weights_y, targets[i]);
            mean_error += err;
            max_error = max_error.max(err);
        }
        mean_error /= kept.len() as f64;
        if !mean_error.is_finite() {
            return Err(Error::NonFiniteTraining);
        }

        let report = TrainingReport {
            mean_error_px: mean_error,
            max_error_px: max_error,
            samples_used: kept.len(),
            lambda,
        };
        log::debug!(
            "trained on {} samples: mean error {:.1}px, max {:.1}px ({}, {}, {})",
            report.samples_used,
            report.mean_error_px,
            report.max_error_px,
            self.t_purge,
            self.t_lambda,
            self.t_fit,
        );

        self.weights_x = weights_x;
        self.weights_y = weights_y;
        self.feature_means = means.to_vec();
        self.feature_stds = stds.to_vec();
        self.lambda = lambda;
        self.reference_pose = Some(reference);
        self.correction = Correction::None;
        self.reset();
        Ok(report)
    }

    // ------------------------------------------------------------------
    // prediction
    // ------------------------------------------------------------------

    /// Predicts the current point of regard in screen pixels.
    ///
    /// Returns `None` (and counts the cause) for blinks, low-confidence
    /// frames, non-finite intermediates and velocity outliers. Calls must be
    /// issued in monotonic `features.timestamp_ms` order.
    pub fn predict(&mut self, features: &EyeFeatures) -> Option<GazePoint> {
        if !self.is_trained() {
            return None;
        }
        let t = features.timestamp_ms;
        if t < self.last_predict_ts {
            log::warn!(
                "predict called with non-monotonic timestamp ({t} < {})",
                self.last_predict_ts
            );
            debug_assert!(t >= self.last_predict_ts, "non-monotonic predict timestamps");
        }
        self.last_predict_ts = t;

        if features.eye_openness < BLINK_EAR {
            self.stats.blink += 1;
            return None;
        }
        if features.confidence < MIN_PREDICT_CONFIDENCE {
            self.stats.low_confidence += 1;
            return None;
        }

        let reference = self.reference_pose?;
        let raw = poly::raw_features(features, &reference);
        let mut normalised = [0.0; RAW_FEATURES];
        for i in 0..RAW_FEATURES {
            normalised[i] = (raw[i] - self.feature_means[i]) / self.feature_stds[i];
        }
        let mut basis = std::mem::take(&mut self.basis_buf);
        poly::expand_into(&normalised, &mut basis);
        let mut x = dot(&self.weights_x, &basis);
        let mut y = dot(&self.weights_y, &basis);
        self.basis_buf = basis;

        if !x.is_finite() || !y.is_finite() {
            self.stats.non_finite += 1;
            return None;
        }

        match self.correction {
            Correction::None => {}
            Correction::Drift { dx, dy } => {
                x += dx;
                y += dy;
            }
            Correction::Affine(c) => {
                let (rx, ry) = (x, y);
                x = c.a11 * rx + c.a12 * ry + c.tx;
                y = c.a21 * rx + c.a22 * ry + c.ty;
            }
        }

        // penalise confidence when the head has wandered from the pose the
        // model was calibrated in
        let mut confidence = features.confidence;
        let d_yaw = (features.head_pose.yaw - reference.yaw).abs();
        if d_yaw > 0.15 {
            confidence *= (1.0 - 2.0 * (d_yaw - 0.15)).max(0.3);
        }
        let d_pitch = (features.head_pose.pitch - reference.pitch).abs();
        if d_pitch > 0.12 {
            confidence *= (1.0 - 2.0 * (d_pitch - 0.12)).max(0.3);
        }

        // velocity-aware outlier gate, in px/ms
        let avg_velocity = self.history_velocity();
        if let Some(prev) = self.history.back() {
            let dist = ((x - prev.x).powi(2) + (y - prev.y).powi(2)).sqrt();
            let screen_max = self.config.screen_width.max(self.config.screen_height);
            let jump_threshold = 0.22 * screen_max + (120.0 * avg_velocity).min(0.2 * screen_max);
            if dist > jump_threshold {
                if self.jump_pending {
                    // two large steps in a row: the gaze genuinely teleported
                    log::trace!("teleport recovery at ({x:.0}, {y:.0})");
                    self.history.clear();
                    self.filter_x.reset();
                    self.filter_y.reset();
                    if let Some(kalman) = &mut self.kalman {
                        kalman.reset();
                    }
                    self.jump_pending = false;
                    self.stats.teleports += 1;
                } else {
                    self.jump_pending = true;
                    self.stats.velocity_rejected += 1;
                    return None;
                }
            } else {
                self.jump_pending = false;
            }
        }

        let velocity_px_s = avg_velocity * 1000.0;
        self.filter_x.set_dynamic_params(velocity_px_s);
        self.filter_y.set_dynamic_params(velocity_px_s);
        let mut fx = self.filter_x.filter(x, t);
        let mut fy = self.filter_y.filter(y, t);
        if let Some(kalman) = &mut self.kalman {
            (fx, fy) = kalman.update(fx, fy, t);
        }

        let point = GazePoint {
            x: fx,
            y: fy,
            timestamp_ms: t,
            confidence,
        };
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(point);
        Some(point)
    }

    /// Mean speed over the most recent history points, in px/ms.
    fn history_velocity(&self) -> f64 {
        let start = self.history.len().saturating_sub(3);
        let (sum, count) = self
            .history
            .iter()
            .skip(start)
            .tuple_windows()
            .filter_map(|(a, b)| {
                let dt = b.timestamp_ms - a.timestamp_ms;
                if dt > 0.0 {
                    Some(((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt() / dt)
                } else {
                    None
                }
            })
            .fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    // ------------------------------------------------------------------
    // post-correction
    // ------------------------------------------------------------------

    /// Fits the affine post-correction from validation pairs.
    ///
    /// With fewer than 3 pairs, or when the fitted per-axis scale leaves
    /// `[0.5, 2]`, only the mean translation offset is stored instead.
    pub fn set_affine_correction(&mut self, pairs: &[CorrectionPair]) {
        use nalgebra::{Matrix3, Vector3};

        if pairs.len() < 3 {
            self.set_translation_from(pairs);
            return;
        }

        let mut m = Matrix3::zeros();
        let mut bx = Vector3::zeros();
        let mut by = Vector3::zeros();
        for pair in pairs {
            let v = Vector3::new(pair.predicted[0], pair.predicted[1], 1.0);
            m += v * v.transpose();
            bx += v * pair.actual[0];
            by += v * pair.actual[1];
        }
        m += Matrix3::identity() * 1e-6;

        let Some(inverse) = m.try_inverse() else {
            log::warn!("affine correction system is singular, falling back to translation");
            self.set_translation_from(pairs);
            return;
        };
        let row_x = inverse * bx;
        let row_y = inverse * by;

        let scale_x = (row_x[0] * row_x[0] + row_x[1] * row_x[1]).sqrt();
        let scale_y = (row_y[0] * row_y[0] + row_y[1] * row_y[1]).sqrt();
        if !(0.5..=2.0).contains(&scale_x) || !(0.5..=2.0).contains(&scale_y) {
            log::warn!(
                "affine correction ill-conditioned (scales {scale_x:.2}/{scale_y:.2}), \
                 falling back to translation"
            );
            self.set_translation_from(pairs);
            return;
        }

        self.correction = Correction::Affine(AffineCorrection {
            a11: row_x[0],
            a12: row_x[1],
            tx: row_x[2],
            a21: row_y[0],
            a22: row_y[1],
            ty: row_y[2],
        });
        log::debug!("affine correction fitted from {} validation pairs", pairs.len());
    }

    fn set_translation_from(&mut self, pairs: &[CorrectionPair]) {
        if pairs.is_empty() {
            return;
        }
        let n = pairs.len() as f64;
        let dx = pairs.iter().map(|p| p.actual[0] - p.predicted[0]).sum::<f64>() / n;
        let dy = pairs.iter().map(|p| p.actual[1] - p.predicted[1]).sum::<f64>() / n;
        self.set_drift_offset(dx, dy);
    }

    /// Replaces the post-correction with a pure translation offset.
    pub fn set_drift_offset(&mut self, dx: f64, dy: f64) {
        self.correction = Correction::Drift { dx, dy };
        log::debug!("drift offset set to ({dx:.1}, {dy:.1})");
    }

    /// Exponentially updates the drift estimate from a known-true anchor:
    /// `drift <- 0.3 * (actual - predicted) + 0.7 * drift`.
    pub fn update_drift(&mut self, predicted: [f64; 2], actual: [f64; 2]) {
        let ex = actual[0] - predicted[0];
        let ey = actual[1] - predicted[1];
        match &mut self.correction {
            Correction::Affine(c) => {
                c.tx += 0.3 * ex;
                c.ty += 0.3 * ey;
            }
            Correction::Drift { dx, dy } => {
                *dx = 0.3 * ex + 0.7 * *dx;
                *dy = 0.3 * ey + 0.7 * *dy;
            }
            Correction::None => {
                self.correction = Correction::Drift {
                    dx: 0.3 * ex,
                    dy: 0.3 * ey,
                };
            }
        }
    }

    /// Returns the affine correction, if one is in effect.
    pub fn affine_correction(&self) -> Option<AffineCorrection> {
        match self.correction {
            Correction::Affine(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the drift offset, if one is in effect.
    pub fn drift_offset(&self) -> Option<(f64, f64)> {
        match self.correction {
            Correction::Drift { dx, dy } => Some((dx, dy)),
            _ => None,
        }
    }
}

fn dot(weights: &[f64], basis: &[f64]) -> f64 {
    weights.iter().zip(basis).map(|(w, b)| w * b).sum()
}

fn prediction_error(row: &[f64], wx: &[f64], wy: &[f64], target: [f64; 2]) -> f64 {
    let px = dot(wx, row);
    let py = dot(wy, row);
    ((px - target[0]).powi(2) + (py - target[1]).powi(2)).sqrt()
}

/// Per-target-group outlier purge.
///
/// Within each group of at least 5 samples, the distance of every sample's
/// iris vector to the group's component-wise *median* is computed, and
/// samples beyond `Q3 + k * IQR` are dropped, with `k` loosened for small
/// groups.
fn purge_group_outliers(samples: &[CalibrationSample]) -> Vec<CalibrationSample> {
    let mut groups: BTreeMap<(u64, u64), Vec<usize>> = BTreeMap::new();
    for (i, sample) in samples.iter().enumerate() {
        let key = (sample.target_x.to_bits(), sample.target_y.to_bits());
        groups.entry(key).or_default().push(i);
    }

    let mut keep = vec![true; samples.len()];
    for members in groups.values() {
        if members.len() < 5 {
            continue;
        }
        let median = iris_median(samples, members);
        let mut distances: Vec<f64> = members
            .iter()
            .map(|&i| {
                let v = iris_vector(&samples[i]);
                v.iter()
                    .zip(&median)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();

        let mut sorted = distances.clone();
        sorted.sort_by_key(|d| TotalF64(*d));
        let q1 = percentile(&sorted, 0.25);
        let q3 = percentile(&sorted, 0.75);
        let iqr = q3 - q1;
        let k = if members.len() < 10 {
            2.5
        } else if members.len() < 20 {
            2.0
        } else {
            1.5
        };
        let cutoff = q3 + k * iqr;
        for (&i, dist) in members.iter().zip(distances.drain(..)) {
            if dist > cutoff {
                keep[i] = false;
            }
        }
    }

    samples
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(s, _)| s.clone())
        .collect()
}

fn iris_vector(sample: &CalibrationSample) -> [f64; 4] {
    [
        sample.features.left_iris_rel[0],
        sample.features.left_iris_rel[1],
        sample.features.right_iris_rel[0],
        sample.features.right_iris_rel[1],
    ]
}

fn iris_median(samples: &[CalibrationSample], members: &[usize]) -> [f64; 4] {
    let mut median = [0.0; 4];
    let mut component = Vec::with_capacity(members.len());
    for (c, out) in median.iter_mut().enumerate() {
        component.clear();
        component.extend(members.iter().map(|&i| iris_vector(&samples[i])[c]));
        component.sort_by_key(|v| TotalF64(*v));
        let mid = component.len() / 2;
        *out = if component.len() % 2 == 0 {
            0.5 * (component[mid - 1] + component[mid])
        } else {
            component[mid]
        };
    }
    median
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx]
}

fn mean_reference_pose(samples: &[CalibrationSample]) -> ReferencePose {
    let n = samples.len() as f64;
    let mut pose = ReferencePose {
        yaw: 0.0,
        pitch: 0.0,
        roll: 0.0,
        face_scale: 0.0,
    };
    for sample in samples {
        pose.yaw += sample.features.head_pose.yaw;
        pose.pitch += sample.features.head_pose.pitch;
        pose.roll += sample.features.head_pose.roll;
        pose.face_scale += sample.features.face_scale;
    }
    pose.yaw /= n;
    pose.pitch /= n;
    pose.roll /= n;
    pose.face_scale /= n;
    pose
}

fn feature_moments(raws: &[[f64; RAW_FEATURES]]) -> ([f64; RAW_FEATURES], [f64; RAW_FEATURES]) {
    let n = raws.len() as f64;
    let mut means = [0.0; RAW_FEATURES];
    for raw in raws {
        for (m, v) in means.iter_mut().zip(raw) {
            *m += *v;
        }
    }
    for m in &mut means {
        *m /= n;
    }
    let mut stds = [0.0; RAW_FEATURES];
    for raw in raws {
        for i in 0..RAW_FEATURES {
            let d = raw[i] - means[i];
            stds[i] += d * d;
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt().max(1e-6);
    }
    (means, stds)
}

/// Leave-one-group-out search over [`LAMBDA_LADDER`], minimising the summed
/// held-out mean pixel error.
fn search_lambda(
    total: &NormalSystem,
    group_systems: &[(NormalSystem, &Vec<usize>)],
    rows: &[Vec<f64>],
    targets: &[[f64; 2]],
) -> f64 {
    let mut best = (TotalF64(f64::INFINITY), DEFAULT_LAMBDA);
    for &lambda in &LAMBDA_LADDER {
        let mut total_error = 0.0;
        for (partial, members) in group_systems {
            let mut held_out = total.clone();
            held_out.subtract(partial);
            let (wx, wy) = held_out.solve(lambda);
            let mut group_error = 0.0;
            for &i in members.iter() {
                group_error += prediction_error(&rows[i], &wx, &wy, targets[i]);
            }
            total_error += group_error / members.len() as f64;
        }
        log::trace!("lambda {lambda}: held-out error {total_error:.1}px");
        if TotalF64(total_error) < best.0 {
            best = (TotalF64(total_error), lambda);
        }
    }
    best.1
}
