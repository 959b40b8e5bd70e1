//! Weighted ridge regression over the polynomial basis.
//!
//! The design matrices involved are small (a few hundred rows by ~82
//! columns), so the solver forms the normal system `(XᵀWX + λI) w = XᵀWy`
//! explicitly and runs Gaussian elimination with partial pivoting on it.
//! Columns whose pivot collapses below [`PIVOT_EPS`] keep a zero coefficient
//! instead of poisoning the solve; this is what makes constant (zero after
//! normalisation) feature columns harmless.
//!
//! Both screen axes share one design matrix, so the normal system carries two
//! right-hand sides and solves them in a single elimination pass.

/// Pivots below this magnitude are treated as a rank deficiency.
pub const PIVOT_EPS: f64 = 1e-12;

/// Per-sample fit weight: confidence-floored and spatially up-weighted
/// towards the screen edges so that peripheral calibration points keep their
/// influence against the denser centre.
pub fn sample_weight(confidence: f64, x: f64, y: f64, screen_w: f64, screen_h: f64) -> f64 {
    let diagonal = (screen_w * screen_w + screen_h * screen_h).sqrt().max(1.0);
    let dx = x - screen_w / 2.0;
    let dy = y - screen_h / 2.0;
    let dist = (dx * dx + dy * dy).sqrt();
    confidence.max(0.15) * (1.0 + 0.6 * dist / diagonal)
}

/// Accumulated normal system for a two-target weighted ridge fit.
///
/// Supports subtraction of previously accumulated partial systems, which is
/// what makes the leave-one-group-out search cheap: the fit for "all groups
/// but g" is the total system minus g's partial sums.
#[derive(Debug, Clone)]
pub struct NormalSystem {
    cols: usize,
    /// Upper triangle of XᵀWX, row-major over the full square.
    xtx: Vec<f64>,
    xty_x: Vec<f64>,
    xty_y: Vec<f64>,
}

impl NormalSystem {
    pub fn new(cols: usize) -> Self {
        Self {
            cols,
            xtx: vec![0.0; cols * cols],
            xty_x: vec![0.0; cols],
            xty_y: vec![0.0; cols],
        }
    }

    /// Adds one design row with weight `w` and targets `(tx, ty)`.
    pub fn accumulate(&mut self, row: &[f64], w: f64, tx: f64, ty: f64) {
        assert_eq!(row.len(), self.cols);
        for i in 0..self.cols {
            let wxi = w * row[i];
            self.xty_x[i] += wxi * tx;
            self.xty_y[i] += wxi * ty;
            let base = i * self.cols;
            for j in i..self.cols {
                self.xtx[base + j] += wxi * row[j];
            }
        }
    }

    /// Adds another partial system into this one.
    pub fn add(&mut self, other: &NormalSystem) {
        assert_eq!(self.cols, other.cols);
        for (a, b) in self.xtx.iter_mut().zip(&other.xtx) {
            *a += b;
        }
        for (a, b) in self.xty_x.iter_mut().zip(&other.xty_x) {
            *a += b;
        }
        for (a, b) in self.xty_y.iter_mut().zip(&other.xty_y) {
            *a += b;
        }
    }

    /// Removes a previously added partial system.
    pub fn subtract(&mut self, other: &NormalSystem) {
        assert_eq!(self.cols, other.cols);
        for (a, b) in self.xtx.iter_mut().zip(&other.xtx) {
            *a -= b;
        }
        for (a, b) in self.xty_x.iter_mut().zip(&other.xty_x) {
            *a -= b;
        }
        for (a, b) in self.xty_y.iter_mut().zip(&other.xty_y) {
            *a -= b;
        }
    }

    /// Solves the ridge system for both targets with regularisation `lambda`.
    pub fn solve(&self, lambda: f64) -> (Vec<f64>, Vec<f64>) {
        let n = self.cols;
        let mut a = self.xtx.clone();
        // mirror the lower triangle and add the ridge term
        for i in 0..n {
            for j in 0..i {
                a[i * n + j] = a[j * n + i];
            }
            a[i * n + i] += lambda;
        }
        let mut rhs = [self.xty_x.clone(), self.xty_y.clone()];
        eliminate(&mut a, &mut rhs, n);
        let [wx, wy] = rhs;
        (wx, wy)
    }
}

/// In-place Gaussian elimination with partial pivoting and two right-hand
/// sides; the solutions are written back into `rhs`.
fn eliminate(a: &mut [f64], rhs: &mut [Vec<f64>; 2], n: usize) {
    for col in 0..n {
        let mut pivot_row = col;
        let mut best = a[col * n + col].abs();
        for row in col + 1..n {
            let v = a[row * n + col].abs();
            if v > best {
                best = v;
                pivot_row = row;
            }
        }

        if best < PIVOT_EPS {
            // rank-deficient column: pin its coefficient to zero
            for row in 0..n {
                a[row * n + col] = 0.0;
                a[col * n + row] = 0.0;
            }
            a[col * n + col] = 1.0;
            rhs[0][col] = 0.0;
            rhs[1][col] = 0.0;
            continue;
        }

        if pivot_row != col {
            for c in 0..n {
                a.swap(col * n + c, pivot_row * n + c);
            }
            rhs[0].swap(col, pivot_row);
            rhs[1].swap(col, pivot_row);
        }

        let pivot = a[col * n + col];
        for row in col + 1..n {
            let factor = a[row * n + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[row * n + c] -= factor * a[col * n + c];
            }
            rhs[0][row] -= factor * rhs[0][col];
            rhs[1][row] -= factor * rhs[1][col];
        }
    }

    // back substitution
    for target in rhs.iter_mut() {
        for col in (0..n).rev() {
            let mut acc = target[col];
            for c in col + 1..n {
                acc -= a[col * n + c] * target[c];
            }
            let pivot = a[col * n + col];
            target[col] = if pivot.abs() < PIVOT_EPS {
                0.0
            } else {
                acc / pivot
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fit(rows: &[&[f64]], tx: &[f64], ty: &[f64], lambda: f64) -> (Vec<f64>, Vec<f64>) {
        let mut sys = NormalSystem::new(rows[0].len());
        for (i, row) in rows.iter().enumerate() {
            sys.accumulate(row, 1.0, tx[i], ty[i]);
        }
        sys.solve(lambda)
    }

    #[test]
    fn recovers_exact_linear_map() {
        // y = 2*x0 - x1 + 3, x axis only
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let x0 = i as f64 * 0.1;
                let x1 = (i % 5) as f64;
                vec![1.0, x0, x1]
            })
            .collect();
        let tx: Vec<f64> = rows.iter().map(|r| 3.0 + 2.0 * r[1] - r[2]).collect();
        let ty: Vec<f64> = rows.iter().map(|r| 1.0 - r[1]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();

        let (wx, wy) = fit(&refs, &tx, &ty, 0.0);
        assert_relative_eq!(wx[0], 3.0, epsilon = 1e-8);
        assert_relative_eq!(wx[1], 2.0, epsilon = 1e-8);
        assert_relative_eq!(wx[2], -1.0, epsilon = 1e-8);
        assert_relative_eq!(wy[1], -1.0, epsilon = 1e-8);
    }

    #[test]
    fn zero_column_gets_zero_coefficient() {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![1.0, i as f64, 0.0])
            .collect();
        let tx: Vec<f64> = rows.iter().map(|r| 5.0 * r[1]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();

        let (wx, _) = fit(&refs, &tx, &tx, 0.0);
        assert_eq!(wx[2], 0.0);
        assert_relative_eq!(wx[1], 5.0, epsilon = 1e-8);
    }

    #[test]
    fn solving_twice_is_identical() {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![1.0, (i as f64).sin(), (i as f64 * 0.7).cos()])
            .collect();
        let tx: Vec<f64> = rows.iter().map(|r| r[1] * 4.0 + r[2]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();

        let a = fit(&refs, &tx, &tx, 0.01);
        let b = fit(&refs, &tx, &tx, 0.01);
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn subtract_reverses_accumulate() {
        let mut total = NormalSystem::new(2);
        let mut part = NormalSystem::new(2);
        total.accumulate(&[1.0, 2.0], 1.0, 3.0, 4.0);
        total.accumulate(&[1.0, -1.0], 0.5, 1.0, 0.0);
        part.accumulate(&[1.0, -1.0], 0.5, 1.0, 0.0);

        let mut reduced = total.clone();
        reduced.subtract(&part);

        let mut only_first = NormalSystem::new(2);
        only_first.accumulate(&[1.0, 2.0], 1.0, 3.0, 4.0);
        assert_eq!(reduced.solve(0.1), only_first.solve(0.1));
    }

    #[test]
    fn edge_samples_weigh_more() {
        let center = sample_weight(1.0, 960.0, 540.0, 1920.0, 1080.0);
        let corner = sample_weight(1.0, 0.0, 0.0, 1920.0, 1080.0);
        assert_relative_eq!(center, 1.0);
        assert!(corner > center);
        assert!(corner <= 1.3 + 1e-9);

        // low confidence is floored rather than discarded
        assert_relative_eq!(sample_weight(0.0, 960.0, 540.0, 1920.0, 1080.0), 0.15);
    }
}
