//! Near-field input and conversion to the waveform-parameter form.
//!
//! The near-field pressure trace recorded along a probe line at radius
//! `r0` from the flight axis is converted to a signal in retarded time,
//! fitted with a cubic spline, resampled, and broken into linear segments
//! `(m_i, dp_i, λ_i)` that the nonlinear propagator evolves.

use serde::{Deserialize, Serialize};

use crate::atmosphere::{AtmosphereProfile, ScaleFactors};
use crate::constants::{BETA_NONLINEAR, MIN_DIVISION_THRESHOLD, MIN_SPLINE_POINTS};
use crate::error::{BoomError, BoomResult, CausticWarning};
use crate::propagation::{signature_metrics, SignatureMetrics};
use crate::ray_tracing::Ray;
use crate::spline::CubicSpline;

/// One point of a near-field pressure trace
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearFieldSample {
    /// Position along the probe line, in the flight direction (m)
    pub coordinate_m: f64,
    /// Overpressure (Pa)
    pub pressure_pa: f64,
    /// Identifier of the mesh point the sample came from
    pub point_id: u64,
}

/// Near-field trace for one azimuth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearFieldSignature {
    pub samples: Vec<NearFieldSample>,
}

impl NearFieldSignature {
    pub fn from_columns(coordinate_m: &[f64], pressure_pa: &[f64], first_point_id: u64) -> Self {
        let samples = coordinate_m
            .iter()
            .zip(pressure_pa)
            .enumerate()
            .map(|(j, (&x, &p))| NearFieldSample { coordinate_m: x, pressure_pa: p, point_id: first_point_id + j as u64 })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest |pressure| in the trace (Pa)
    pub fn peak_pa(&self) -> f64 {
        self.samples.iter().fold(0.0, |acc: f64, s| acc.max(s.pressure_pa.abs()))
    }

    /// Check the trace can be splined
    pub fn validate(&self) -> BoomResult<()> {
        if self.samples.len() < MIN_SPLINE_POINTS {
            return Err(BoomError::SplineFit(format!(
                "near-field trace has {} points, need at least {MIN_SPLINE_POINTS}",
                self.samples.len()
            )));
        }
        if let Some(s) = self
            .samples
            .iter()
            .find(|s| !s.coordinate_m.is_finite() || !s.pressure_pa.is_finite())
        {
            return Err(BoomError::SplineFit(format!("non-finite sample at point {}", s.point_id)));
        }
        if let Some(j) = self
            .samples
            .windows(2)
            .position(|w| !(w[1].coordinate_m > w[0].coordinate_m))
        {
            return Err(BoomError::SplineFit(format!(
                "near-field coordinates not strictly increasing at sample {}",
                j + 1
            )));
        }
        Ok(())
    }
}

/// Supplier of near-field traces, one per azimuth.
///
/// Implementations must be shareable across ray workers.
pub trait NearFieldSource: Sync {
    /// Trace for azimuth `azimuth_index` at probe radius `radius_m`,
    /// matched to within `tolerance_m`.
    fn extract(
        &self,
        azimuth_index: usize,
        azimuth_deg: f64,
        radius_m: f64,
        tolerance_m: f64,
    ) -> BoomResult<NearFieldSignature>;
}

/// Pre-extracted traces held in memory, indexed by azimuth.
/// A single trace is reused for every azimuth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearFieldTable {
    pub signatures: Vec<NearFieldSignature>,
}

impl NearFieldSource for NearFieldTable {
    fn extract(&self, azimuth_index: usize, _azimuth_deg: f64, _radius_m: f64, _tolerance_m: f64) -> BoomResult<NearFieldSignature> {
        let signature = match self.signatures.len() {
            1 => self.signatures.first(),
            _ => self.signatures.get(azimuth_index),
        };
        signature.cloned().ok_or_else(|| BoomError::NearField {
            azimuth_index,
            reason: format!("no trace supplied ({} available)", self.signatures.len()),
        })
    }
}

/// Idealized N-wave: a short linear rise to `+peak`, a linear fall to
/// `-peak`, and a short recompression to ambient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticNWave {
    pub peak_pa: f64,
    /// Extent along the probe line (m)
    pub length_m: f64,
    pub points: usize,
    /// Fraction of the length taken by each of the rise and recompression
    pub rise_fraction: f64,
}

impl SyntheticNWave {
    /// N-wave lasting `duration_s` for a vehicle moving at `flight_speed_mps`
    pub fn from_duration(peak_pa: f64, duration_s: f64, points: usize, flight_speed_mps: f64) -> Self {
        Self {
            peak_pa,
            length_m: duration_s * flight_speed_mps,
            points,
            rise_fraction: 0.02,
        }
    }

    fn shape(&self, s: f64) -> f64 {
        let r = self.rise_fraction;
        if s < r {
            self.peak_pa * s / r
        } else if s <= 1.0 - r {
            self.peak_pa * (1.0 - 2.0 * (s - r) / (1.0 - 2.0 * r))
        } else {
            -self.peak_pa * (1.0 - s) / r
        }
    }

    pub fn signature(&self) -> NearFieldSignature {
        let n = self.points.max(2);
        let coordinates: Vec<f64> = (0..n).map(|j| self.length_m * j as f64 / (n - 1) as f64).collect();
        let pressures: Vec<f64> = (0..n).map(|j| self.shape(j as f64 / (n - 1) as f64)).collect();
        NearFieldSignature::from_columns(&coordinates, &pressures, 0)
    }
}

impl NearFieldSource for SyntheticNWave {
    fn extract(&self, azimuth_index: usize, _azimuth_deg: f64, _radius_m: f64, _tolerance_m: f64) -> BoomResult<NearFieldSignature> {
        if !(self.rise_fraction > 0.0 && self.rise_fraction < 0.5) || !(self.length_m > 0.0) {
            return Err(BoomError::NearField {
                azimuth_index,
                reason: "synthetic N-wave needs positive length and rise fraction below 0.5".to_string(),
            });
        }
        Ok(self.signature())
    }
}

/// Convert probe-line coordinates to retarded time, `τ = (x - x0) / (M a_h)`
pub fn distance_to_time(coordinate_m: &[f64], mach: f64, sound_speed_mps: f64) -> Vec<f64> {
    let speed = mach * sound_speed_mps;
    let x0 = coordinate_m.first().copied().unwrap_or(0.0);
    coordinate_m.iter().map(|x| (x - x0) / speed).collect()
}

/// Signal as linear segments between shocks, non-dimensional.
///
/// Segment `i` starts with a jump `jumps[i]`, then rises with slope
/// `slopes[i]` over duration `lengths[i]`. The jump closing the last segment
/// back to ambient is implied by the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub slopes: Vec<f64>,
    pub jumps: Vec<f64>,
    pub lengths: Vec<f64>,
    /// Time of the leading shock
    pub front_time: f64,
}

impl Waveform {
    /// Segments joining consecutive `(τ, p)` samples
    pub fn from_samples(tau: &[f64], pressure: &[f64]) -> Self {
        let n = tau.len().saturating_sub(1);
        let mut slopes = Vec::with_capacity(n);
        let mut lengths = Vec::with_capacity(n);
        for i in 0..n {
            let dt = tau[i + 1] - tau[i];
            lengths.push(dt);
            slopes.push((pressure[i + 1] - pressure[i]) / dt);
        }
        let mut jumps = vec![0.0; n];
        if let (Some(j), Some(&p0)) = (jumps.first_mut(), pressure.first()) {
            *j = p0;
        }
        Self { slopes, jumps, lengths, front_time: tau.first().copied().unwrap_or(0.0) }
    }

    pub fn len(&self) -> usize {
        self.slopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slopes.is_empty()
    }

    /// Jump at the end of the last segment returning the signal to ambient
    pub fn tail_jump(&self) -> f64 {
        let rise: f64 = self.slopes.iter().zip(&self.lengths).map(|(m, l)| m * l).sum();
        -(self.jumps.iter().sum::<f64>() + rise)
    }

    /// Flatten to `[m.., dp.., λ.., τ_front]`
    pub fn to_state(&self) -> Vec<f64> {
        let mut state = Vec::with_capacity(3 * self.len() + 1);
        state.extend_from_slice(&self.slopes);
        state.extend_from_slice(&self.jumps);
        state.extend_from_slice(&self.lengths);
        state.push(self.front_time);
        state
    }

    pub fn from_state(state: &[f64], segments: usize) -> Self {
        Self {
            slopes: state[..segments].to_vec(),
            jumps: state[segments..2 * segments].to_vec(),
            lengths: state[2 * segments..3 * segments].to_vec(),
            front_time: state[3 * segments],
        }
    }
}

/// Near-field trace with its waveform, ready for propagation
#[derive(Debug, Clone)]
pub struct Signature {
    /// Retarded time of each near-field sample (s)
    pub time_s: Vec<f64>,
    pub pressure_pa: Vec<f64>,
    pub point_ids: Vec<u64>,
    pub waveform: Waveform,
    /// Metrics of the near-field trace itself
    pub reference: SignatureMetrics,
}

/// Build the propagated waveform from a near-field trace
pub fn create_signature(
    near_field: &NearFieldSignature,
    scale: &ScaleFactors,
    mach: f64,
    sound_speed_mps: f64,
    signal_points: Option<usize>,
) -> BoomResult<Signature> {
    near_field.validate()?;

    let coordinates: Vec<f64> = near_field.samples.iter().map(|s| s.coordinate_m).collect();
    let pressure_pa: Vec<f64> = near_field.samples.iter().map(|s| s.pressure_pa).collect();
    let point_ids = near_field.samples.iter().map(|s| s.point_id).collect();
    let time_s = distance_to_time(&coordinates, mach, sound_speed_mps);

    let tau: Vec<f64> = time_s.iter().map(|t| t / scale.time_s).collect();
    let p: Vec<f64> = pressure_pa.iter().map(|p| p / scale.pressure_pa).collect();

    let spline = CubicSpline::fit(&tau, &p)?;
    let n = signal_points.unwrap_or(tau.len());
    if n < 2 {
        return Err(BoomError::SplineFit(format!("cannot resample to {n} points")));
    }
    let (tau_s, p_s) = spline.resample(n);
    let waveform = Waveform::from_samples(&tau_s, &p_s);
    let reference = signature_metrics(&time_s, &pressure_pa);

    Ok(Signature { time_s, pressure_pa, point_ids, waveform, reference })
}

/// Coefficients of the waveform ODEs sampled along one ray, non-dimensional.
///
/// `c1` drives steepening (`dm/dz = c1 m² + c2 m`), `c2` the amplitude
/// change from spreading and impedance. Altitudes descend from the
/// propagation origin to the ground.
#[derive(Debug, Clone, Default)]
pub struct OdeTerms {
    pub z: Vec<f64>,
    pub c1: Vec<f64>,
    pub c2: Vec<f64>,
    pub dc1: Vec<f64>,
    pub dc2: Vec<f64>,
}

impl OdeTerms {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    /// First-order expansion of `(c1, c2)` about sample `k`
    #[inline]
    pub fn at(&self, k: usize, z: f64) -> (f64, f64) {
        let dz = z - self.z[k];
        (self.c1[k] + self.dc1[k] * dz, self.c2[k] + self.dc2[k] * dz)
    }
}

/// Derivative of `values` against (non-uniform) `z` by central differences
fn finite_difference(z: &[f64], values: &[f64]) -> Vec<f64> {
    let n = z.len();
    (0..n)
        .map(|k| {
            let (lo, hi) = match k {
                0 => (0, 1.min(n - 1)),
                k if k == n - 1 => (k - 1, k),
                k => (k - 1, k + 1),
            };
            let dz = z[hi] - z[lo];
            if dz.abs() < MIN_DIVISION_THRESHOLD { 0.0 } else { (values[hi] - values[lo]) / dz }
        })
        .collect()
}

/// Evaluate the waveform ODE coefficients from the propagation origin down.
///
/// Ray-tube areas at or below `caustic_area_ratio` times the origin area are
/// held at that threshold and reported.
pub fn ode_terms(
    ray: &Ray,
    profile: &AtmosphereProfile,
    scale: &ScaleFactors,
    caustic_area_ratio: f64,
) -> BoomResult<(OdeTerms, Option<CausticWarning>)> {
    let origin = ray
        .origin
        .ok_or_else(|| BoomError::Geometry("ray has no propagation origin".to_string()))?;
    if !(origin.area > 0.0) {
        return Err(BoomError::Geometry(format!("ray-tube area at origin is {}", origin.area)));
    }
    let floor = (caustic_area_ratio * origin.area).max(MIN_DIVISION_THRESHOLD * origin.area);

    let path = &ray.path;
    let samples = std::iter::once((origin.altitude_m, origin.xi, origin.area)).chain(
        (origin.next_index..path.len()).map(|k| (path.z[k], path.xi[k], ray.area[k])),
    );

    let mut caustic = None;
    let mut z = Vec::new();
    let mut c1 = Vec::new();
    let mut log_b = Vec::new();
    for (altitude, xi, area) in samples {
        let air = profile.at(altitude)?;
        let sin_theta = (1.0 - xi * xi).max(0.0).sqrt();
        if !(sin_theta > 0.0) {
            return Err(BoomError::RayDivergence {
                altitude_m: altitude,
                reason: "ray horizontal during propagation".to_string(),
            });
        }
        if area <= floor && caustic.is_none() {
            caustic = Some(CausticWarning {
                azimuth_index: ray.azimuth_index,
                altitude_m: altitude,
                area_ratio: area / origin.area,
            });
        }
        let area = area.max(floor);

        let rho_a = air.density_kg_m3 * air.sound_speed_mps;
        let a3 = air.sound_speed_mps.powi(3);
        z.push(altitude / scale.altitude_m);
        c1.push(-BETA_NONLINEAR / (air.density_kg_m3 * a3 * sin_theta) / scale.c1);
        log_b.push(0.5 * (rho_a / area).ln());
    }
    if z.len() < 2 {
        return Err(BoomError::Geometry("fewer than two propagation samples".to_string()));
    }

    // d ln B / dz* is already non-dimensional
    let c2 = finite_difference(&z, &log_b);
    let dc1 = finite_difference(&z, &c1);
    let dc2 = finite_difference(&z, &c2);
    Ok((OdeTerms { z, c1, c2, dc1, dc2 }, caustic))
}
