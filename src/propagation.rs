//! Nonlinear propagation of the waveform-parameter form down a ray.
//!
//! Between shocks the signal is piecewise linear. Each slope steepens or
//! relaxes under the quadratic nonlinearity (`c1`) and scales with the
//! Blokhintzev invariant (`c2`); jumps travel at the mean of the pressures
//! on their two sides, which fixes how every segment length changes. A
//! segment whose length collapses has become part of a shock and is
//! merged into the following jump.

use serde::Serialize;
use tracing::trace;

use crate::atmosphere::ScaleFactors;
use crate::error::{BoomError, BoomResult};
use crate::integrator::{rk4_step, OdeSystem};
use crate::signature::{OdeTerms, Waveform};
use crate::sorting::merge_sort;

/// Jumps below this (non-dimensional) are treated as continuous
const JUMP_EPSILON: f64 = 1e-12;

/// Relative overshoot past a predicted segment closure, so the closed
/// length lands at or below zero instead of approaching it
const CLOSE_OVERSHOOT: f64 = 1e-6;

/// Waveform ODE context valid between terms samples `k` and `k + 1`
pub struct WaveformSystem<'a> {
    terms: &'a OdeTerms,
    k: usize,
    segments: usize,
}

impl<'a> WaveformSystem<'a> {
    pub fn new(terms: &'a OdeTerms, k: usize, segments: usize) -> Self {
        Self { terms, k, segments }
    }
}

impl OdeSystem for WaveformSystem<'_> {
    fn derivatives(&self, z: f64, y: &[f64], dydz: &mut [f64]) {
        let n = self.segments;
        let (c1, c2) = self.terms.at(self.k, z);
        let m = &y[..n];
        let dp = &y[n..2 * n];
        let lambda = &y[2 * n..3 * n];

        let rise: f64 = m.iter().zip(lambda).map(|(mi, li)| mi * li).sum();
        let tail = -(dp.iter().sum::<f64>() + rise);

        for i in 0..n {
            let m_prev = if i == 0 { 0.0 } else { m[i - 1] };
            let dp_next = if i + 1 < n { dp[i + 1] } else { tail };

            dydz[i] = c1 * m[i] * m[i] + c2 * m[i];
            dydz[n + i] = c2 * dp[i] + c1 * dp[i] * 0.5 * (m_prev + m[i]);
            dydz[2 * n + i] = -c1 * (m[i] * lambda[i] + 0.5 * (dp[i] + dp_next));
        }
        dydz[3 * n] = -c1 * 0.5 * dp[0];
    }
}

fn merge_segments(waveform: &mut Waveform, collapsed: impl Fn(usize) -> bool) -> usize {
    let n = waveform.len();
    let mut slopes = Vec::with_capacity(n);
    let mut jumps = Vec::with_capacity(n);
    let mut lengths = Vec::with_capacity(n);
    let mut carry = 0.0;
    let mut removed = 0;

    for i in 0..n {
        if collapsed(i) {
            // Pressure change across the segment joins the next jump
            carry += waveform.jumps[i] + waveform.slopes[i] * waveform.lengths[i].max(0.0);
            removed += 1;
            continue;
        }
        slopes.push(waveform.slopes[i]);
        jumps.push(waveform.jumps[i] + carry);
        lengths.push(waveform.lengths[i]);
        carry = 0.0;
    }
    // A trailing carry is absorbed by the implied tail jump

    waveform.slopes = slopes;
    waveform.jumps = jumps;
    waveform.lengths = lengths;
    removed
}

/// Merge every segment with length at or below `tol_l` into the following
/// jump; the last segment is simply dropped. Returns the number of
/// segments removed. Applying it twice removes nothing more.
pub fn clip_lambda_zero_segment(waveform: &mut Waveform, tol_l: f64, max_passes: usize) -> Result<usize, String> {
    let mut removed = 0;
    for _ in 0..max_passes {
        let state_ok = waveform
            .slopes
            .iter()
            .chain(&waveform.jumps)
            .chain(&waveform.lengths)
            .all(|v| v.is_finite())
            && waveform.front_time.is_finite();
        if !state_ok {
            return Err("non-finite waveform parameter".to_string());
        }

        let lengths = waveform.lengths.clone();
        if !lengths.iter().any(|&l| l <= tol_l) {
            return Ok(removed);
        }
        removed += merge_segments(waveform, |i| lengths[i] <= tol_l);
        if waveform.is_empty() {
            return Err("every segment collapsed into a shock".to_string());
        }
    }
    Err(format!("segments still collapsing after {max_passes} passes"))
}

/// Solver limits for one propagation
#[derive(Debug, Clone, Copy)]
pub struct PropagationControl {
    pub tol_l: f64,
    pub tol_m: f64,
    pub max_substeps: usize,
    pub max_clip_passes: usize,
}

/// Waveform at the ground and how it got there
#[derive(Debug, Clone)]
pub struct Propagation {
    pub waveform: Waveform,
    /// Segment count after each altitude step, origin first
    pub segment_counts: Vec<usize>,
    pub substeps: usize,
}

fn shock_error(z: f64, scale: &ScaleFactors, reason: String) -> BoomError {
    BoomError::ShockMerge { altitude_m: z * scale.altitude_m, reason }
}

/// Integrate the waveform parameters from the origin to the ground.
///
/// Each altitude step is split so that no slope changes by more than about
/// `tol_m` per sub-step and no segment length is carried past zero: a
/// sub-step ends where the first shrinking segment closes, and the closed
/// segment is then merged into its jump.
pub fn propagate_signal(
    waveform: &Waveform,
    terms: &OdeTerms,
    scale: &ScaleFactors,
    control: &PropagationControl,
) -> BoomResult<Propagation> {
    let mut w = waveform.clone();
    let start = terms.z.first().copied().unwrap_or(0.0);
    clip_lambda_zero_segment(&mut w, control.tol_l, control.max_clip_passes)
        .map_err(|e| shock_error(start, scale, e))?;

    let mut segment_counts = vec![w.len()];
    let mut substeps = 0;

    for k in 0..terms.len().saturating_sub(1) {
        let dz = terms.z[k + 1] - terms.z[k];
        let direction = dz.signum();
        let mut z = terms.z[k];
        let mut remaining = dz.abs();

        for _ in 0..=control.max_substeps {
            if remaining <= 0.0 {
                break;
            }
            let n = w.len();
            let system = WaveformSystem::new(terms, k, n);
            let state = w.to_state();
            let mut rates = vec![0.0; state.len()];
            system.derivatives(z, &state, &mut rates);

            // Distance to the nearest segment closing at the current rates
            let closing = (0..n)
                .filter_map(|i| {
                    let shrink = -direction * rates[2 * n + i];
                    (shrink > 0.0).then(|| w.lengths[i] / shrink)
                })
                .fold(f64::INFINITY, f64::min);

            let c1 = terms.at(k, z).0.abs().max(terms.at(k, z + direction * remaining).0.abs());
            let steepest = w.slopes.iter().fold(0.0f64, |acc, &m| acc.max(m));
            let steepening = if steepest > 0.0 && c1 > 0.0 {
                control.tol_m / (c1 * steepest)
            } else {
                f64::INFINITY
            };

            let mut h = steepening.min(closing * (1.0 + CLOSE_OVERSHOOT)).min(remaining);
            if h >= remaining * (1.0 - 1e-12) {
                h = remaining;
            }

            let step = h * direction;
            let next = rk4_step(&system, z, &state, step);
            w = Waveform::from_state(&next, n);
            z += step;
            remaining -= h;
            substeps += 1;

            clip_lambda_zero_segment(&mut w, control.tol_l, control.max_clip_passes)
                .map_err(|e| shock_error(z, scale, e))?;
        }
        if remaining > 1e-9 * dz.abs() {
            return Err(shock_error(z, scale, format!("sub-step limit {} reached", control.max_substeps)));
        }
        trace!(step = k, segments = w.len(), "waveform step");
        segment_counts.push(w.len());
    }

    Ok(Propagation { waveform: w, segment_counts, substeps })
}

/// Dimensional pressure signal
#[derive(Debug, Clone, Default, Serialize)]
pub struct PressureSignal {
    pub time_s: Vec<f64>,
    pub pressure_pa: Vec<f64>,
}

/// Expand the waveform into time/pressure samples.
///
/// Each shock contributes two samples at the same time, before and after
/// the jump. Samples are sorted by time with a stable sort so shock pairs
/// keep their order.
pub fn waveform_to_pressure_signal(waveform: &Waveform, scale: &ScaleFactors, time_offset_s: f64) -> PressureSignal {
    let mut time = Vec::with_capacity(2 * waveform.len() + 2);
    let mut pressure = Vec::with_capacity(2 * waveform.len() + 2);
    let mut push = |tau: f64, p: f64| {
        time.push(tau * scale.time_s + time_offset_s);
        pressure.push(p * scale.pressure_pa);
    };

    let mut tau = waveform.front_time;
    let mut p = 0.0;
    for i in 0..waveform.len() {
        let jump = waveform.jumps[i];
        if jump.abs() > JUMP_EPSILON {
            push(tau, p);
        }
        p += jump;
        push(tau, p);
        p += waveform.slopes[i] * waveform.lengths[i];
        tau += waveform.lengths[i];
    }
    push(tau, p);
    if p.abs() > JUMP_EPSILON {
        push(tau, 0.0);
    }

    merge_sort(&mut time, &mut pressure);
    PressureSignal { time_s: time, pressure_pa: pressure }
}

/// Loudness-related figures of a pressure signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignatureMetrics {
    pub p_max_pa: f64,
    pub p_min_pa: f64,
    /// Largest pressure increase over one monotone rise (a shock is a rise of zero duration)
    pub p_rise_pa: f64,
    /// Duration of the initial rise (s)
    pub rise_time_s: f64,
    pub duration_s: f64,
    /// Integral of p² over the signal (Pa²·s)
    pub p_int2: f64,
}

/// Figures of a time-sorted signal
pub fn signature_metrics(time_s: &[f64], pressure_pa: &[f64]) -> SignatureMetrics {
    let n = time_s.len().min(pressure_pa.len());
    if n == 0 {
        return SignatureMetrics::default();
    }

    let p_max = pressure_pa[..n].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let p_min = pressure_pa[..n].iter().copied().fold(f64::INFINITY, f64::min);

    let mut p_rise: f64 = 0.0;
    let mut run_start = 0;
    for k in 1..n {
        if pressure_pa[k] < pressure_pa[k - 1] {
            run_start = k;
        }
        p_rise = p_rise.max(pressure_pa[k] - pressure_pa[run_start]);
    }

    // Initial rise: from the first sample to the first local maximum
    let mut crest = 0;
    while crest + 1 < n && pressure_pa[crest + 1] >= pressure_pa[crest] {
        crest += 1;
    }
    let rise_time = time_s[crest] - time_s[0];

    let p_int2 = (1..n)
        .map(|k| {
            let (pa, pb) = (pressure_pa[k - 1], pressure_pa[k]);
            (time_s[k] - time_s[k - 1]) * (pa * pa + pa * pb + pb * pb) / 3.0
        })
        .sum();

    SignatureMetrics {
        p_max_pa: p_max,
        p_min_pa: p_min,
        p_rise_pa: p_rise,
        rise_time_s: rise_time,
        duration_s: time_s[n - 1] - time_s[0],
        p_int2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_scale() -> ScaleFactors {
        ScaleFactors {
            length_m: 1.0,
            time_s: 1.0,
            pressure_pa: 1.0,
            slope_pa_per_s: 1.0,
            altitude_m: 1.0,
            c1: 1.0,
            c2: 1.0,
        }
    }

    fn constant_terms(c1: f64, c2: f64, n: usize) -> OdeTerms {
        let z: Vec<f64> = (0..n).map(|k| 1.0 - k as f64 / (n - 1) as f64).collect();
        OdeTerms {
            c1: vec![c1; n],
            c2: vec![c2; n],
            dc1: vec![0.0; n],
            dc2: vec![0.0; n],
            z,
        }
    }

    fn control() -> PropagationControl {
        PropagationControl { tol_l: 1e-7, tol_m: 0.2, max_substeps: 256, max_clip_passes: 50 }
    }

    fn n_wave(points: usize) -> Waveform {
        // 0 -> +1 in 1% of the duration, down to -1, back to 0
        let tau = [0.0, 0.01, 0.99, 1.0];
        let p = [0.0, 1.0, -1.0, 0.0];
        let mut t = Vec::new();
        let mut v = Vec::new();
        for i in 0..points {
            let s = i as f64 / (points - 1) as f64;
            let j = tau.partition_point(|&x| x <= s).clamp(1, 3);
            let frac = (s - tau[j - 1]) / (tau[j] - tau[j - 1]);
            t.push(s);
            v.push(p[j - 1] + (p[j] - p[j - 1]) * frac);
        }
        Waveform::from_samples(&t, &v)
    }

    #[test]
    fn test_clip_merges_short_segment() {
        let mut w = Waveform {
            slopes: vec![1.0, 5.0, -2.0],
            jumps: vec![0.5, 0.1, 0.0],
            lengths: vec![0.4, 1e-9, 0.6],
            front_time: 0.0,
        };
        let removed = clip_lambda_zero_segment(&mut w, 1e-7, 10).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(w.len(), 2);
        assert!((w.jumps[1] - (0.1 + 5.0 * 1e-9)).abs() < 1e-15);
        assert_eq!(w.lengths, vec![0.4, 0.6]);
    }

    #[test]
    fn test_clip_is_idempotent() {
        let mut w = Waveform {
            slopes: vec![3.0, 1.0, 2.0, -1.0],
            jumps: vec![0.0, 0.2, 0.0, 0.1],
            lengths: vec![-1e-8, 0.5, 0.0, 0.5],
            front_time: 0.25,
        };
        clip_lambda_zero_segment(&mut w, 1e-7, 10).unwrap();
        let once = w.clone();
        assert_eq!(clip_lambda_zero_segment(&mut w, 1e-7, 10).unwrap(), 0);
        assert_eq!(w, once);
        assert!((w.jumps[0] - 0.2).abs() < 1e-15);
        assert!((w.jumps[1] - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_clip_drops_last_segment_and_keeps_tail_consistent() {
        let mut w = Waveform {
            slopes: vec![-1.0, 4.0],
            jumps: vec![1.0, 0.0],
            lengths: vec![1.0, 1e-10],
            front_time: 0.0,
        };
        clip_lambda_zero_segment(&mut w, 1e-7, 10).unwrap();
        assert_eq!(w.len(), 1);
        assert!(w.tail_jump().abs() < 1e-12);
    }

    #[test]
    fn test_clip_rejects_collapse_and_nan() {
        let mut w = Waveform { slopes: vec![1.0], jumps: vec![0.0], lengths: vec![0.0], front_time: 0.0 };
        assert!(clip_lambda_zero_segment(&mut w, 1e-7, 10).is_err());

        let mut w = Waveform { slopes: vec![f64::NAN], jumps: vec![0.0], lengths: vec![1.0], front_time: 0.0 };
        assert!(clip_lambda_zero_segment(&mut w, 1e-7, 10).is_err());
    }

    #[test]
    fn test_linear_propagation_scales_amplitude() {
        // Without nonlinearity the waveform scales by exp(c2 Δz) and keeps its shape
        let w = n_wave(51);
        let terms = constant_terms(0.0, -0.3, 21);
        let result = propagate_signal(&w, &terms, &unit_scale(), &control()).unwrap();
        let factor = (0.3f64).exp();

        assert_eq!(result.waveform.len(), w.len());
        for i in 0..w.len() {
            assert!((result.waveform.slopes[i] - w.slopes[i] * factor).abs() < 1e-8 * factor.max(w.slopes[i].abs()));
            assert!((result.waveform.lengths[i] - w.lengths[i]).abs() < 1e-12);
        }
        assert!((result.waveform.front_time - w.front_time).abs() < 1e-12);
    }

    /// Aged N-wave of unit peak and unit duration: `L = sqrt(1 + 2 |m0| σ)`
    /// with `σ = |c1 Δz|`, peak `1 / L`, both shocks equal.
    fn aged_n_wave(initial_slope: f64, sigma: f64) -> (f64, f64) {
        let slope = initial_slope.abs() / (1.0 + sigma * initial_slope.abs());
        let duration = (2.0 / slope).sqrt();
        (duration, 1.0 / duration)
    }

    #[test]
    fn test_nonlinear_propagation_forms_shocks() {
        let w = n_wave(101);
        // Descending with c1 < 0 steepens compressions
        let terms = constant_terms(-20.0, 0.0, 101);
        let result = propagate_signal(&w, &terms, &unit_scale(), &control()).unwrap();

        // Segment count never grows
        assert!(result.segment_counts.windows(2).all(|c| c[1] <= c[0]));
        assert!(result.waveform.len() < w.len());
        // Lengths stay positive and every value finite
        assert!(result.waveform.lengths.iter().all(|&l| l > 0.0));
        assert!(result.waveform.to_state().iter().all(|v| v.is_finite()));

        // Both ramps became shocks of the aged N-wave
        let (duration, peak) = aged_n_wave(2.0 / 0.98, 20.0);
        let front = result.waveform.jumps[0];
        let tail = result.waveform.tail_jump();
        assert!((front - peak).abs() < 0.02 * peak, "front {front}, expected {peak}");
        assert!((tail - front).abs() < 0.01 * front, "front {front}, tail {tail}");
        let total: f64 = result.waveform.lengths.iter().sum();
        assert!((total - duration).abs() < 0.02 * duration, "duration {total}, expected {duration}");
    }

    #[test]
    fn test_shocks_eat_expansion_segments_without_losing_area() {
        // Shocked N-wave: unit front and tail jumps, ten segments of slope -2
        let mut jumps = vec![0.0; 10];
        jumps[0] = 1.0;
        let w = Waveform { slopes: vec![-2.0; 10], jumps, lengths: vec![0.1; 10], front_time: 0.0 };
        let terms = constant_terms(-20.0, 0.0, 101);
        let result = propagate_signal(&w, &terms, &unit_scale(), &control()).unwrap();

        let (duration, peak) = aged_n_wave(2.0, 20.0);
        let front = result.waveform.jumps[0];
        let tail = result.waveform.tail_jump();
        let total: f64 = result.waveform.lengths.iter().sum();
        assert!((front - peak).abs() < 5e-3 * peak, "front {front}, expected {peak}");
        assert!((tail - peak).abs() < 5e-3 * peak, "tail {tail}, expected {peak}");
        assert!((total - duration).abs() < 5e-3 * duration, "duration {total}, expected {duration}");

        // Zero net impulse survives the merging
        let signal = waveform_to_pressure_signal(&result.waveform, &unit_scale(), 0.0);
        let impulse: f64 = signal
            .time_s
            .windows(2)
            .zip(signal.pressure_pa.windows(2))
            .map(|(t, p)| 0.5 * (t[1] - t[0]) * (p[0] + p[1]))
            .sum();
        assert!(impulse.abs() < 1e-3 * peak * duration, "impulse {impulse}");
    }

    #[test]
    fn test_result_does_not_depend_on_substep_cap() {
        let w = n_wave(101);
        let terms = constant_terms(-20.0, 0.0, 101);
        let coarse = propagate_signal(&w, &terms, &unit_scale(), &control()).unwrap();
        let fine_control = PropagationControl { max_substeps: 100_000, ..control() };
        let fine = propagate_signal(&w, &terms, &unit_scale(), &fine_control).unwrap();
        assert!((coarse.waveform.jumps[0] - fine.waveform.jumps[0]).abs() < 1e-9);
        assert_eq!(coarse.waveform.len(), fine.waveform.len());
    }

    #[test]
    fn test_substep_cap_is_an_error() {
        let w = n_wave(101);
        let terms = constant_terms(-20.0, 0.0, 101);
        let tight = PropagationControl { max_substeps: 2, ..control() };
        assert!(matches!(
            propagate_signal(&w, &terms, &unit_scale(), &tight),
            Err(BoomError::ShockMerge { .. })
        ));
    }

    #[test]
    fn test_pressure_signal_round_trip() {
        let t: Vec<f64> = (0..9).map(|i| i as f64 * 0.125).collect();
        let p = vec![0.0, 0.4, 0.8, 0.2, -0.3, -0.8, -0.5, -0.2, 0.0];
        let w = Waveform::from_samples(&t, &p);
        let signal = waveform_to_pressure_signal(&w, &unit_scale(), 0.0);
        assert_eq!(signal.time_s.len(), 9);
        for i in 0..9 {
            assert!((signal.time_s[i] - t[i]).abs() < 1e-12);
            assert!((signal.pressure_pa[i] - p[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pressure_signal_with_shocks() {
        let w = Waveform { slopes: vec![-2.0], jumps: vec![1.0], lengths: vec![1.0], front_time: 0.5 };
        let signal = waveform_to_pressure_signal(&w, &unit_scale(), 2.0);
        assert_eq!(signal.time_s, vec![2.5, 2.5, 3.5, 3.5]);
        assert_eq!(signal.pressure_pa, vec![0.0, 1.0, -1.0, 0.0]);

        let m = signature_metrics(&signal.time_s, &signal.pressure_pa);
        assert_eq!(m.p_max_pa, 1.0);
        assert_eq!(m.p_min_pa, -1.0);
        assert_eq!(m.p_rise_pa, 1.0);
        assert_eq!(m.rise_time_s, 0.0);
        assert_eq!(m.duration_s, 1.0);
        // ∫ (1 - 2t)² dt over [0, 1] = 1/3
        assert!((m.p_int2 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_of_ramped_rise() {
        let t = [0.0, 0.1, 0.2, 1.0];
        let p = [0.0, 2.0, 3.0, -3.0];
        let m = signature_metrics(&t, &p);
        assert_eq!(m.p_rise_pa, 3.0);
        assert!((m.rise_time_s - 0.2).abs() < 1e-15);
        assert_eq!(signature_metrics(&[], &[]), SignatureMetrics::default());
    }
}
