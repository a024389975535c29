//! Generic fixed-step integration and root finding.
//!
//! The stepper knows nothing about rays or waveforms: a caller implements
//! [`OdeSystem`] on an immutable context value and hands it in by reference.

use crate::constants::MIN_DIVISION_THRESHOLD;
use crate::error::{BoomError, BoomResult};

/// A first-order ODE system `dy/dx = f(x, y)` bound to its parameters
pub trait OdeSystem {
    /// Write the derivatives at `(x, y)` into `dydx` (same length as `y`)
    fn derivatives(&self, x: f64, y: &[f64], dydx: &mut [f64]);
}

/// Advance `y0` from `x0` by one classical fourth-order Runge-Kutta step `dx`
pub fn rk4_step<S: OdeSystem + ?Sized>(system: &S, x0: f64, y0: &[f64], dx: f64) -> Vec<f64> {
    let n = y0.len();
    let half = 0.5 * dx;

    let mut k1 = vec![0.0; n];
    let mut k2 = vec![0.0; n];
    let mut k3 = vec![0.0; n];
    let mut k4 = vec![0.0; n];
    let mut stage = vec![0.0; n];

    // k1
    system.derivatives(x0, y0, &mut k1);

    // k2
    for i in 0..n {
        stage[i] = y0[i] + half * k1[i];
    }
    system.derivatives(x0 + half, &stage, &mut k2);

    // k3
    for i in 0..n {
        stage[i] = y0[i] + half * k2[i];
    }
    system.derivatives(x0 + half, &stage, &mut k3);

    // k4
    for i in 0..n {
        stage[i] = y0[i] + dx * k3[i];
    }
    system.derivatives(x0 + dx, &stage, &mut k4);

    (0..n)
        .map(|i| y0[i] + dx / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
        .collect()
}

/// Root of `f` in `[lo, hi]` by Brent's method: inverse quadratic or secant
/// steps where they stay inside the bracket, bisection otherwise.
///
/// Converges when `|f| < tolerance` or the bracket half-width falls below
/// it. Fails with [`BoomError::RootFinding`] if the interval does not
/// bracket a sign change, the tolerance is not positive, or the iteration
/// cap is hit.
pub fn brent_root_find<F>(f: F, lo: f64, hi: f64, tolerance: f64, max_iterations: usize) -> BoomResult<f64>
where
    F: Fn(f64) -> f64,
{
    if !(tolerance > 0.0) {
        return Err(BoomError::RootFinding(format!("tolerance must be positive, got {tolerance}")));
    }

    let (mut a, mut b) = (lo, hi);
    let mut fa = f(a);
    let mut fb = f(b);
    if !(fa.is_finite() && fb.is_finite()) {
        return Err(BoomError::RootFinding(format!("non-finite end value on [{lo}, {hi}]")));
    }
    if fa * fb > 0.0 {
        return Err(BoomError::RootFinding(format!("no sign change: f({lo}) = {fa}, f({hi}) = {fb}")));
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }

    // Contrapoint c keeps the sign opposite to b
    let (mut c, mut fc) = (a, fa);
    let mut step = b - a;
    let mut last_step = step;

    for _ in 0..max_iterations {
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * tolerance;
        let half = 0.5 * (c - b);
        if fb.abs() < tolerance || half.abs() <= tol {
            return Ok(b);
        }

        let interpolate = last_step.abs() >= tol && fa.abs() > fb.abs() && fa.abs() > MIN_DIVISION_THRESHOLD;
        if interpolate {
            let s = fb / fa;
            let (mut p, mut q) = if (a - c).abs() < f64::EPSILON || fc.abs() < MIN_DIVISION_THRESHOLD {
                (2.0 * half * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * half * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            } else {
                p = -p;
            }

            let accept = q.abs() > f64::EPSILON
                && 2.0 * p < 3.0 * half * q - (tol * q).abs()
                && p < (0.5 * last_step * q).abs();
            last_step = step;
            step = if accept { p / q } else { half };
            if !accept {
                last_step = step;
            }
        } else {
            step = half;
            last_step = step;
        }

        a = b;
        fa = fb;
        b += if step.abs() > tol { step } else { tol.copysign(half) };
        fb = f(b);
        if !fb.is_finite() {
            return Err(BoomError::RootFinding(format!("non-finite value at {b}")));
        }

        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            step = b - a;
            last_step = step;
        }
    }

    Err(BoomError::RootFinding(format!("no convergence after {max_iterations} iterations")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        rate: f64,
    }

    impl OdeSystem for Decay {
        fn derivatives(&self, _x: f64, y: &[f64], dydx: &mut [f64]) {
            dydx[0] = -self.rate * y[0];
        }
    }

    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn derivatives(&self, _x: f64, y: &[f64], dydx: &mut [f64]) {
            dydx[0] = y[1];
            dydx[1] = -y[0];
        }
    }

    #[test]
    fn test_rk4_exponential_decay() {
        let system = Decay { rate: 2.0 };
        let mut y = vec![1.0];
        let dx = 0.01;
        for i in 0..100 {
            y = rk4_step(&system, i as f64 * dx, &y, dx);
        }
        assert!((y[0] - (-2.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_rk4_negative_step() {
        // Integrating back over the same ten steps recovers the initial value
        let system = Decay { rate: 1.0 };
        let dx = 0.01;
        let mut y = vec![1.0];
        for i in 0..10 {
            y = rk4_step(&system, i as f64 * dx, &y, dx);
        }
        assert!((y[0] - (-0.1f64).exp()).abs() < 1e-11);
        for i in (1..=10).rev() {
            y = rk4_step(&system, i as f64 * dx, &y, -dx);
        }
        assert!((y[0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_rk4_oscillator_energy() {
        let mut y = vec![1.0, 0.0];
        let dx = 0.01;
        for i in 0..628 {
            y = rk4_step(&Oscillator, i as f64 * dx, &y, dx);
        }
        let energy = y[0] * y[0] + y[1] * y[1];
        assert!((energy - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_brent_root_find() {
        // x^2 - 4 = 0, root at x = 2
        let f = |x: f64| x * x - 4.0;
        let root = brent_root_find(f, 1.0, 3.0, 1e-10, 100).unwrap();
        assert!((root - 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_brent_unbracketed() {
        let f = |x: f64| x * x + 1.0;
        assert!(matches!(brent_root_find(f, -1.0, 1.0, 1e-10, 100), Err(BoomError::RootFinding(_))));
    }

    #[test]
    fn test_brent_rejects_zero_tolerance() {
        let f = |x: f64| x - 0.5;
        assert!(matches!(brent_root_find(f, 0.0, 1.0, 0.0, 100), Err(BoomError::RootFinding(_))));
    }

    #[test]
    fn test_brent_root_at_bracket_end() {
        // f(a) == 0 must not reach a division by f(a)
        let f = |x: f64| x * (x - 3.0);
        assert_eq!(brent_root_find(f, 0.0, 1.0, 1e-12, 100).unwrap(), 0.0);
        assert_eq!(brent_root_find(f, 2.0, 3.0, 1e-12, 100).unwrap(), 3.0);
    }

    #[test]
    fn test_brent_flat_then_steep() {
        // Nearly flat side makes interpolation degenerate; bisection carries it
        let f = |x: f64| if x < 0.7 { -1e-6 } else { x - 0.7 };
        let root = brent_root_find(f, 0.0, 1.0, 1e-9, 200).unwrap();
        assert!((root - 0.7).abs() < 1e-6);
    }
}
