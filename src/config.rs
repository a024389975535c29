//! Run configuration: flight condition, ray fan, tolerances and solver settings.
//!
//! Every struct deserializes from JSON with missing fields filled from
//! `Default`, so a config file only needs to name what it changes.

use serde::{Deserialize, Serialize};

use crate::atmosphere::AtmosphereTable;
use crate::constants::ROOT_FINDING_TOLERANCE;
use crate::error::{BoomError, BoomResult};

/// Steady flight condition of the vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightCondition {
    pub altitude_m: f64,
    pub mach: f64,
    /// Heading angle, degrees from the x axis towards y
    pub heading_deg: f64,
    /// Flight-path (climb) angle, degrees
    pub flight_path_deg: f64,
    /// Bank angle, degrees; rotates the azimuth origin about the flight axis
    pub bank_deg: f64,
    /// Reference length used for the time scale (vehicle length, m)
    pub reference_length_m: f64,
}

impl Default for FlightCondition {
    fn default() -> Self {
        Self {
            altitude_m: 15_000.0,
            mach: 1.4,
            heading_deg: 0.0,
            flight_path_deg: 0.0,
            bank_deg: 0.0,
            reference_length_m: 30.0,
        }
    }
}

/// Azimuths to trace and the near-field probe radius
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RayFan {
    /// Explicit azimuths in degrees; overrides `count`/`min_deg`/`max_deg`
    pub azimuths_deg: Option<Vec<f64>>,
    pub count: usize,
    pub min_deg: f64,
    pub max_deg: f64,
    /// Radius of the near-field probe line from the flight axis (m)
    pub radius_m: f64,
}

impl Default for RayFan {
    fn default() -> Self {
        Self {
            azimuths_deg: None,
            count: 1,
            min_deg: 0.0,
            max_deg: 0.0,
            radius_m: 100.0,
        }
    }
}

impl RayFan {
    /// Azimuths of the fan in degrees, equally spaced unless listed explicitly
    pub fn azimuths(&self) -> Vec<f64> {
        if let Some(ref list) = self.azimuths_deg {
            return list.clone();
        }
        match self.count {
            0 => Vec::new(),
            1 => vec![self.min_deg],
            n => {
                let step = (self.max_deg - self.min_deg) / (n - 1) as f64;
                (0..n).map(|i| self.min_deg + step * i as f64).collect()
            }
        }
    }
}

/// Numerical tolerances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Altitude step as a fraction of flight altitude
    pub integrate: f64,
    /// Azimuth offset of the neighboring ray used for the ray-tube Jacobian (rad)
    pub dphi: f64,
    /// Radius tolerance handed to the near-field extraction (m)
    pub dr: f64,
    /// Relative pressure perturbation for finite-difference sensitivities
    pub dp: f64,
    /// Non-dimensional segment length at or below which a segment is clipped
    pub l: f64,
    /// Largest allowed |C1 m dz| in one waveform sub-step
    pub m: f64,
    /// Distance tolerance when matching the near-field radius on a ray (m)
    pub match_radius: f64,
    /// Area ratio A(z)/A(origin) at or below which a caustic is reported
    pub caustic_area_ratio: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            integrate: 2e-3,
            dphi: 1e-3,
            dr: 1e-3,
            dp: 1e-3,
            l: 1e-7,
            m: 0.2,
            match_radius: ROOT_FINDING_TOLERANCE,
            caustic_area_ratio: 1e-6,
        }
    }
}

/// Atmosphere model selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum AtmosphereConfig {
    #[default]
    Standard,
    Tabulated { table: AtmosphereTable },
}

/// Solver sizes and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationSettings {
    /// Samples in the tabulated atmosphere profile
    pub n_profile: usize,
    /// Waveform samples after resampling; `None` keeps the near-field count
    pub signal_points: Option<usize>,
    /// Upper bound on altitude steps per ray
    pub max_steps: usize,
    /// Upper bound on clipping passes per step
    pub max_clip_passes: usize,
    /// Upper bound on waveform sub-steps per altitude step
    pub max_substeps: usize,
    /// Fraction of failed rays above which the run aborts
    pub max_failure_fraction: f64,
    pub compute_sensitivities: bool,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            n_profile: 2001,
            signal_points: None,
            max_steps: 100_000,
            max_clip_passes: 50,
            max_substeps: 4096,
            max_failure_fraction: 0.5,
            compute_sensitivities: false,
        }
    }
}

/// Complete configuration of one boom case
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BoomConfig {
    pub flight: FlightCondition,
    pub fan: RayFan,
    pub tolerances: Tolerances,
    pub atmosphere: AtmosphereConfig,
    pub settings: PropagationSettings,
}

impl BoomConfig {
    /// Parse a JSON configuration
    pub fn from_json(text: &str) -> BoomResult<Self> {
        let config: BoomConfig =
            serde_json::from_str(text).map_err(|e| BoomError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that would otherwise surface as obscure numerical failures
    pub fn validate(&self) -> BoomResult<()> {
        let f = &self.flight;
        if !(f.altitude_m > 0.0) {
            return Err(BoomError::Config(format!("flight altitude must be positive, got {}", f.altitude_m)));
        }
        if !(f.mach > 1.0) {
            return Err(BoomError::Config(format!("Mach number must exceed 1, got {}", f.mach)));
        }
        if !(f.reference_length_m > 0.0) {
            return Err(BoomError::Config("reference length must be positive".to_string()));
        }
        if self.fan.azimuths().is_empty() {
            return Err(BoomError::Config("ray fan has no azimuths".to_string()));
        }
        if !(self.fan.radius_m > 0.0) {
            return Err(BoomError::Config("near-field radius must be positive".to_string()));
        }

        let t = &self.tolerances;
        if !(t.integrate > 0.0 && t.integrate < 1.0) {
            return Err(BoomError::Config(format!("integration tolerance must be in (0, 1), got {}", t.integrate)));
        }
        if !(t.dphi > 0.0) || !(t.dp > 0.0) || !(t.m > 0.0) {
            return Err(BoomError::Config("dphi, dp and m tolerances must be positive".to_string()));
        }
        if !(t.l > 0.0) {
            return Err(BoomError::Config(format!("segment length tolerance must be positive, got {}", t.l)));
        }
        if !(t.match_radius > 0.0) {
            return Err(BoomError::Config(format!("radius match tolerance must be positive, got {}", t.match_radius)));
        }
        if !(t.caustic_area_ratio >= 0.0 && t.caustic_area_ratio < 1.0) {
            return Err(BoomError::Config("caustic area ratio must be in [0, 1)".to_string()));
        }

        let s = &self.settings;
        if s.n_profile < 2 {
            return Err(BoomError::Config("atmosphere profile needs at least 2 samples".to_string()));
        }
        if let Some(n) = s.signal_points {
            if n < 2 {
                return Err(BoomError::Config("signal needs at least 2 points".to_string()));
            }
        }
        if s.max_clip_passes == 0 || s.max_substeps == 0 {
            return Err(BoomError::Config("clip passes and sub-steps must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&s.max_failure_fraction) {
            return Err(BoomError::Config("failure fraction must be in [0, 1]".to_string()));
        }
        Ok(())
    }
}
