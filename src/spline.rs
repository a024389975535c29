//! Natural cubic spline fit and evaluation.

use crate::constants::MIN_SPLINE_POINTS;
use crate::error::{BoomError, BoomResult};

/// Fitted natural cubic spline through `(x, y)` knots
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots
    y2: Vec<f64>,
}

/// Spline value and whether it came from outside the fitted domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineValue {
    pub value: f64,
    pub extrapolated: bool,
}

impl CubicSpline {
    /// Fit the spline: solve the tridiagonal system for the knot second
    /// derivatives with natural (zero curvature) end conditions.
    pub fn fit(x: &[f64], y: &[f64]) -> BoomResult<Self> {
        let n = x.len();
        if n != y.len() {
            return Err(BoomError::SingularFit(format!("{} abscissae but {} ordinates", n, y.len())));
        }
        if n < MIN_SPLINE_POINTS {
            return Err(BoomError::SingularFit(format!(
                "need at least {MIN_SPLINE_POINTS} points, got {n}"
            )));
        }
        if let Some(i) = x.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(BoomError::SingularFit(format!(
                "abscissae not strictly increasing at index {}: {} then {}",
                i + 1,
                x[i],
                x[i + 1]
            )));
        }

        // Thomas algorithm on the interior equations
        let mut y2 = vec![0.0; n];
        let mut u = vec![0.0; n];
        for i in 1..n - 1 {
            let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
            let p = sig * y2[i - 1] + 2.0;
            y2[i] = (sig - 1.0) / p;
            let slope_diff = (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
            u[i] = (6.0 * slope_diff / (x[i + 1] - x[i - 1]) - sig * u[i - 1]) / p;
        }
        y2[n - 1] = 0.0;
        for k in (0..n - 1).rev() {
            y2[k] = y2[k] * y2[k + 1] + u[k];
        }
        y2[0] = 0.0;

        Ok(Self { x: x.to_vec(), y: y.to_vec(), y2 })
    }

    /// Second derivatives at the knots
    pub fn second_derivatives(&self) -> &[f64] {
        &self.y2
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Evaluate anywhere; outside the knots the end polynomial is continued
    /// and the result is flagged as extrapolated.
    pub fn evaluate(&self, xq: f64) -> SplineValue {
        let n = self.x.len();
        let (lo_x, hi_x) = self.domain();
        let extrapolated = xq < lo_x || xq > hi_x;

        let hi = self.x.partition_point(|&v| v < xq).clamp(1, n - 1);
        let lo = hi - 1;
        let h = self.x[hi] - self.x[lo];
        let a = (self.x[hi] - xq) / h;
        let b = (xq - self.x[lo]) / h;
        let value = a * self.y[lo]
            + b * self.y[hi]
            + ((a * a * a - a) * self.y2[lo] + (b * b * b - b) * self.y2[hi]) * (h * h) / 6.0;

        SplineValue { value, extrapolated }
    }

    /// Evaluate on `n` equally spaced points spanning the fitted domain
    pub fn resample(&self, n: usize) -> (Vec<f64>, Vec<f64>) {
        let (lo, hi) = self.domain();
        if n < 2 {
            return (vec![lo], vec![self.y[0]]);
        }
        let dx = (hi - lo) / (n - 1) as f64;
        let xs: Vec<f64> = (0..n)
            .map(|i| if i == n - 1 { hi } else { lo + dx * i as f64 })
            .collect();
        let ys = xs.iter().map(|&x| self.evaluate(x).value).collect();
        (xs, ys)
    }
}
