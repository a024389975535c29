//! Atmosphere models and the tabulated profile used by the ray tracer.
//!
//! Two closures are available behind [`AtmosphereModel`]: the International
//! Standard Atmosphere up to 86 km, and a user-supplied altitude table of
//! sound speed and density. Whichever is selected is sampled once into an
//! [`AtmosphereProfile`] covering ground to flight altitude; that profile is
//! immutable and shared read-only by every ray worker.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::{AtmosphereConfig, FlightCondition};
use crate::constants::{
    EARTH_RADIUS_M, GAMMA, G_ACCEL_MPS2, NUMERICAL_TOLERANCE, R_AIR, SEA_LEVEL_PRESSURE_PA,
    SEA_LEVEL_TEMPERATURE_K,
};
use crate::error::{BoomError, BoomResult};

/// ISA layer definition (geopotential altitude)
#[derive(Debug, Clone)]
struct AtmosphereLayer {
    /// Base geopotential altitude of this layer (m)
    base_altitude: f64,
    /// Base temperature at layer start (K)
    base_temperature: f64,
    /// Base pressure at layer start (Pa)
    base_pressure: f64,
    /// Temperature lapse rate (K/m)
    lapse_rate: f64,
}

/// Layer bases and lapse rates of the 1976 standard atmosphere
const ISA_LAPSE_RATES: &[(f64, f64)] = &[
    (0.0, -0.0065),    // Troposphere
    (11_000.0, 0.0),   // Tropopause
    (20_000.0, 0.001), // Stratosphere 1
    (32_000.0, 0.0028), // Stratosphere 2
    (47_000.0, 0.0),   // Stratopause
    (51_000.0, -0.0028), // Mesosphere 1
    (71_000.0, -0.002), // Mesosphere 2
];

/// Top of the standard closure, geopotential (m)
const GEOPOTENTIAL_CEILING_M: f64 = 84_852.0;

/// Top of the standard closure, geometric altitude (m)
pub const STANDARD_CEILING_M: f64 =
    EARTH_RADIUS_M * GEOPOTENTIAL_CEILING_M / (EARTH_RADIUS_M - GEOPOTENTIAL_CEILING_M);

/// Layer table with base temperatures and pressures chained from sea level,
/// so the closure is continuous across every layer boundary.
static ISA_LAYERS: Lazy<Vec<AtmosphereLayer>> = Lazy::new(|| {
    let mut layers = Vec::with_capacity(ISA_LAPSE_RATES.len());
    let mut temperature = SEA_LEVEL_TEMPERATURE_K;
    let mut pressure = SEA_LEVEL_PRESSURE_PA;

    for (i, &(base, lapse)) in ISA_LAPSE_RATES.iter().enumerate() {
        layers.push(AtmosphereLayer {
            base_altitude: base,
            base_temperature: temperature,
            base_pressure: pressure,
            lapse_rate: lapse,
        });
        let top = ISA_LAPSE_RATES
            .get(i + 1)
            .map(|&(next, _)| next)
            .unwrap_or(GEOPOTENTIAL_CEILING_M);
        let (t, p) = layer_state(&layers[i], top - base);
        temperature = t;
        pressure = p;
    }
    layers
});

/// Thermodynamic state of the air at one altitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AtmosphereState {
    pub temperature_k: f64,
    pub pressure_pa: f64,
    pub density_kg_m3: f64,
    pub sound_speed_mps: f64,
    /// Local gravitational acceleration (m/s²)
    pub gravity_mps2: f64,
}

/// Temperature and pressure a height `dh` above a layer base
fn layer_state(layer: &AtmosphereLayer, dh: f64) -> (f64, f64) {
    let temperature = layer.base_temperature + layer.lapse_rate * dh;
    let pressure = if layer.lapse_rate.abs() < 1e-10 {
        // Isothermal layer
        layer.base_pressure * (-G_ACCEL_MPS2 * dh / (R_AIR * layer.base_temperature)).exp()
    } else {
        let temp_ratio = temperature / layer.base_temperature;
        layer.base_pressure * temp_ratio.powf(-G_ACCEL_MPS2 / (layer.lapse_rate * R_AIR))
    };
    (temperature, pressure)
}

/// Gravity falls off with the square of the distance from the Earth's centre
fn gravity_at(altitude_m: f64) -> f64 {
    let ratio = EARTH_RADIUS_M / (EARTH_RADIUS_M + altitude_m);
    G_ACCEL_MPS2 * ratio * ratio
}

/// Standard atmosphere at a geometric altitude.
///
/// Valid from sea level to [`STANDARD_CEILING_M`].
pub fn standard_atmosphere(altitude_m: f64) -> BoomResult<AtmosphereState> {
    if !(altitude_m >= -NUMERICAL_TOLERANCE && altitude_m <= STANDARD_CEILING_M) {
        return Err(BoomError::AtmosphereRange {
            altitude_m,
            min_m: 0.0,
            max_m: STANDARD_CEILING_M,
        });
    }
    let h = altitude_m.max(0.0);
    let geopotential = EARTH_RADIUS_M * h / (EARTH_RADIUS_M + h);

    let layer = ISA_LAYERS
        .iter()
        .rev()
        .find(|layer| geopotential >= layer.base_altitude)
        .unwrap_or(&ISA_LAYERS[0]);
    let (temperature, pressure) = layer_state(layer, geopotential - layer.base_altitude);

    Ok(AtmosphereState {
        temperature_k: temperature,
        pressure_pa: pressure,
        density_kg_m3: pressure / (R_AIR * temperature),
        sound_speed_mps: (GAMMA * R_AIR * temperature).sqrt(),
        gravity_mps2: gravity_at(h),
    })
}

/// User-supplied atmosphere: sound speed and density against altitude.
/// Temperature and pressure are derived from the ideal-gas relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtmosphereTable {
    pub altitude_m: Vec<f64>,
    pub sound_speed_mps: Vec<f64>,
    pub density_kg_m3: Vec<f64>,
}

impl AtmosphereTable {
    /// Isothermal, constant-density table; handy for refraction-free checks
    pub fn uniform(top_m: f64, sound_speed_mps: f64, density_kg_m3: f64) -> Self {
        Self {
            altitude_m: vec![0.0, top_m],
            sound_speed_mps: vec![sound_speed_mps; 2],
            density_kg_m3: vec![density_kg_m3; 2],
        }
    }

    pub fn validate(&self) -> BoomResult<()> {
        let n = self.altitude_m.len();
        if n < 2 {
            return Err(BoomError::Config("atmosphere table needs at least 2 rows".to_string()));
        }
        if self.sound_speed_mps.len() != n || self.density_kg_m3.len() != n {
            return Err(BoomError::Config(format!(
                "atmosphere table columns differ in length: {} altitudes, {} sound speeds, {} densities",
                n,
                self.sound_speed_mps.len(),
                self.density_kg_m3.len()
            )));
        }
        if self.altitude_m.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(BoomError::Config("atmosphere table altitudes must be strictly increasing".to_string()));
        }
        if self.sound_speed_mps.iter().chain(&self.density_kg_m3).any(|&v| !(v > 0.0)) {
            return Err(BoomError::Config("atmosphere table values must be positive".to_string()));
        }
        Ok(())
    }

    /// Linear interpolation into the table
    pub fn evaluate(&self, altitude_m: f64) -> BoomResult<AtmosphereState> {
        let n = self.altitude_m.len();
        let (lo, hi) = (self.altitude_m[0], self.altitude_m[n - 1]);
        let span = (hi - lo).max(1.0);
        if !(altitude_m >= lo - NUMERICAL_TOLERANCE * span && altitude_m <= hi + NUMERICAL_TOLERANCE * span) {
            return Err(BoomError::AtmosphereRange { altitude_m, min_m: lo, max_m: hi });
        }

        let (idx, frac) = bracket(&self.altitude_m, altitude_m);
        let a = lerp(self.sound_speed_mps[idx], self.sound_speed_mps[idx + 1], frac);
        let rho = lerp(self.density_kg_m3[idx], self.density_kg_m3[idx + 1], frac);

        Ok(AtmosphereState {
            temperature_k: a * a / (GAMMA * R_AIR),
            pressure_pa: rho * a * a / GAMMA,
            density_kg_m3: rho,
            sound_speed_mps: a,
            gravity_mps2: gravity_at(altitude_m.max(0.0)),
        })
    }
}

/// Atmosphere closure selected for a run
#[derive(Debug, Clone)]
pub enum AtmosphereModel {
    Standard,
    Tabulated(AtmosphereTable),
}

impl AtmosphereModel {
    pub fn from_config(config: &AtmosphereConfig) -> BoomResult<Self> {
        match config {
            AtmosphereConfig::Standard => Ok(AtmosphereModel::Standard),
            AtmosphereConfig::Tabulated { table } => {
                table.validate()?;
                Ok(AtmosphereModel::Tabulated(table.clone()))
            }
        }
    }

    /// Evaluate the closure at an altitude
    pub fn evaluate(&self, altitude_m: f64) -> BoomResult<AtmosphereState> {
        match self {
            AtmosphereModel::Standard => standard_atmosphere(altitude_m),
            AtmosphereModel::Tabulated(table) => table.evaluate(altitude_m),
        }
    }
}

/// Atmosphere sampled on a uniform altitude grid from the ground up
#[derive(Debug, Clone)]
pub struct AtmosphereProfile {
    pub altitude_m: Vec<f64>,
    pub sound_speed_mps: Vec<f64>,
    pub density_kg_m3: Vec<f64>,
    pub pressure_pa: Vec<f64>,
    pub temperature_k: Vec<f64>,
    pub gravity_mps2: Vec<f64>,
}

impl AtmosphereProfile {
    /// Tabulate `model` on `n_samples` points from 0 to `top_m`
    pub fn build(model: &AtmosphereModel, top_m: f64, n_samples: usize) -> BoomResult<Self> {
        if n_samples < 2 || !(top_m > 0.0) {
            return Err(BoomError::Config(format!(
                "profile needs a positive top and at least 2 samples (top {top_m}, n {n_samples})"
            )));
        }
        let mut profile = AtmosphereProfile {
            altitude_m: Vec::with_capacity(n_samples),
            sound_speed_mps: Vec::with_capacity(n_samples),
            density_kg_m3: Vec::with_capacity(n_samples),
            pressure_pa: Vec::with_capacity(n_samples),
            temperature_k: Vec::with_capacity(n_samples),
            gravity_mps2: Vec::with_capacity(n_samples),
        };

        let dz = top_m / (n_samples - 1) as f64;
        for i in 0..n_samples {
            let z = if i == n_samples - 1 { top_m } else { dz * i as f64 };
            let state = model.evaluate(z)?;
            profile.altitude_m.push(z);
            profile.sound_speed_mps.push(state.sound_speed_mps);
            profile.density_kg_m3.push(state.density_kg_m3);
            profile.pressure_pa.push(state.pressure_pa);
            profile.temperature_k.push(state.temperature_k);
            profile.gravity_mps2.push(state.gravity_mps2);
        }
        Ok(profile)
    }

    pub fn top(&self) -> f64 {
        self.altitude_m[self.altitude_m.len() - 1]
    }

    /// Interpolated state at an altitude inside the profile
    pub fn at(&self, altitude_m: f64) -> BoomResult<AtmosphereState> {
        let top = self.top();
        let slack = NUMERICAL_TOLERANCE * top.max(1.0);
        if !(altitude_m >= -slack && altitude_m <= top + slack) {
            return Err(BoomError::AtmosphereRange { altitude_m, min_m: 0.0, max_m: top });
        }
        let (i, frac) = bracket(&self.altitude_m, altitude_m);
        Ok(AtmosphereState {
            temperature_k: lerp(self.temperature_k[i], self.temperature_k[i + 1], frac),
            pressure_pa: lerp(self.pressure_pa[i], self.pressure_pa[i + 1], frac),
            density_kg_m3: lerp(self.density_kg_m3[i], self.density_kg_m3[i + 1], frac),
            sound_speed_mps: lerp(self.sound_speed_mps[i], self.sound_speed_mps[i + 1], frac),
            gravity_mps2: lerp(self.gravity_mps2[i], self.gravity_mps2[i + 1], frac),
        })
    }

    /// Sound speed only; the hot path of the ray ODE.
    /// Altitudes are clamped into the profile.
    #[inline]
    pub fn sound_speed(&self, altitude_m: f64) -> f64 {
        let (i, frac) = bracket(&self.altitude_m, altitude_m);
        lerp(self.sound_speed_mps[i], self.sound_speed_mps[i + 1], frac)
    }
}

/// Non-dimensionalization constants for one flight condition.
///
/// Non-dimensional value = dimensional value / scale.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScaleFactors {
    /// Reference length (m)
    pub length_m: f64,
    /// Time for the flow to pass the reference length (s)
    pub time_s: f64,
    /// Ambient pressure at flight altitude (Pa)
    pub pressure_pa: f64,
    /// Waveform slope scale (Pa/s)
    pub slope_pa_per_s: f64,
    /// Altitude scale (m)
    pub altitude_m: f64,
    /// Scale of the nonlinear coefficient C1 (s/(Pa·m))
    pub c1: f64,
    /// Scale of the amplitude coefficient C2 (1/m)
    pub c2: f64,
}

impl ScaleFactors {
    pub fn new(flight: &FlightCondition, at_flight: &AtmosphereState) -> Self {
        let length_m = flight.reference_length_m;
        let time_s = length_m / (flight.mach * at_flight.sound_speed_mps);
        let pressure_pa = at_flight.pressure_pa;
        let altitude_m = flight.altitude_m;
        Self {
            length_m,
            time_s,
            pressure_pa,
            slope_pa_per_s: pressure_pa / time_s,
            altitude_m,
            c1: time_s / (pressure_pa * altitude_m),
            c2: 1.0 / altitude_m,
        }
    }
}

/// Index of the interval containing `x` and the fraction along it.
/// Values outside the table clamp to the end intervals.
fn bracket(xs: &[f64], x: f64) -> (usize, f64) {
    let n = xs.len();
    let idx = xs.partition_point(|&v| v <= x).clamp(1, n - 1) - 1;
    let width = xs[idx + 1] - xs[idx];
    let frac = ((x - xs[idx]) / width).clamp(0.0, 1.0);
    (idx, frac)
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_sea_level() {
        let s = standard_atmosphere(0.0).unwrap();
        assert!((s.temperature_k - 288.15).abs() < 1e-9);
        assert!((s.pressure_pa - 101_325.0).abs() < 1e-6);
        assert!((s.density_kg_m3 - crate::constants::SEA_LEVEL_DENSITY).abs() < 1e-3);
        assert!((s.sound_speed_mps - 340.29).abs() < 0.05);
        assert!((s.gravity_mps2 - G_ACCEL_MPS2).abs() < 1e-12);
    }

    #[test]
    fn test_standard_tropopause() {
        // 11 km geopotential
        let h = EARTH_RADIUS_M * 11_000.0 / (EARTH_RADIUS_M - 11_000.0);
        let s = standard_atmosphere(h).unwrap();
        assert!((s.temperature_k - 216.65).abs() < 1e-6);
        assert!((s.pressure_pa - 22_632.0).abs() < 2.0);
    }

    #[test]
    fn test_layers_are_continuous() {
        for layer in ISA_LAYERS.iter().skip(1) {
            let hg = layer.base_altitude;
            let h = EARTH_RADIUS_M * hg / (EARTH_RADIUS_M - hg);
            let below = standard_atmosphere(h - 1e-3).unwrap();
            let above = standard_atmosphere(h + 1e-3).unwrap();
            assert!((below.temperature_k - above.temperature_k).abs() < 1e-3);
            assert!((below.pressure_pa - above.pressure_pa).abs() / above.pressure_pa < 1e-5);
        }
    }

    #[test]
    fn test_standard_range_error() {
        assert!(matches!(
            standard_atmosphere(STANDARD_CEILING_M + 10.0),
            Err(BoomError::AtmosphereRange { .. })
        ));
        assert!(standard_atmosphere(-100.0).is_err());
        assert!(standard_atmosphere(80_000.0).is_ok());
    }

    #[test]
    fn test_table_interpolation_and_range() {
        let table = AtmosphereTable {
            altitude_m: vec![0.0, 1000.0, 2000.0],
            sound_speed_mps: vec![340.0, 330.0, 320.0],
            density_kg_m3: vec![1.2, 1.1, 1.0],
        };
        table.validate().unwrap();
        let s = table.evaluate(500.0).unwrap();
        assert!((s.sound_speed_mps - 335.0).abs() < 1e-12);
        assert!((s.density_kg_m3 - 1.15).abs() < 1e-12);
        assert!((s.pressure_pa - 1.15 * 335.0 * 335.0 / GAMMA).abs() < 1e-6);

        assert!(matches!(table.evaluate(2500.0), Err(BoomError::AtmosphereRange { .. })));
    }

    #[test]
    fn test_table_rejects_non_monotone_altitudes() {
        let table = AtmosphereTable {
            altitude_m: vec![0.0, 1000.0, 1000.0],
            sound_speed_mps: vec![340.0; 3],
            density_kg_m3: vec![1.0; 3],
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_profile_lookup_matches_closure() {
        let profile = AtmosphereProfile::build(&AtmosphereModel::Standard, 15_000.0, 1501).unwrap();
        assert_eq!(profile.altitude_m.len(), 1501);
        assert!((profile.top() - 15_000.0).abs() < 1e-9);

        let exact = standard_atmosphere(7_321.0).unwrap();
        let interp = profile.at(7_321.0).unwrap();
        assert!((exact.sound_speed_mps - interp.sound_speed_mps).abs() < 1e-3);
        assert!((exact.density_kg_m3 - interp.density_kg_m3).abs() / exact.density_kg_m3 < 1e-4);

        assert!(profile.at(15_100.0).is_err());
    }

    #[test]
    fn test_scale_factors() {
        let flight = FlightCondition::default();
        let at = standard_atmosphere(flight.altitude_m).unwrap();
        let scale = ScaleFactors::new(&flight, &at);
        assert!((scale.time_s - flight.reference_length_m / (flight.mach * at.sound_speed_mps)).abs() < 1e-12);
        assert!((scale.slope_pa_per_s * scale.time_s - scale.pressure_pa).abs() < 1e-6);
        assert!((scale.c2 * scale.altitude_m - 1.0).abs() < 1e-12);
    }
}
