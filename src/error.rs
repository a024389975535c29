//! Error and warning types for the propagation pipeline

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for boom calculations
pub type BoomResult<T> = Result<T, BoomError>;

/// Errors raised by the atmosphere, ray tracing and propagation stages
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoomError {
    /// Altitude outside the valid domain of the atmosphere model
    #[error("altitude {altitude_m:.1} m outside atmosphere domain [{min_m:.1}, {max_m:.1}] m")]
    AtmosphereRange { altitude_m: f64, min_m: f64, max_m: f64 },

    /// Degenerate initial wave normal or unreachable near-field radius
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Ray integration failed to reach the ground
    #[error("ray diverged at altitude {altitude_m:.1} m: {reason}")]
    RayDivergence { altitude_m: f64, reason: String },

    /// Near-field trace is malformed or too sparse for a spline fit
    #[error("spline fit error: {0}")]
    SplineFit(String),

    /// Root finding could not bracket or converge
    #[error("root finding failed: {0}")]
    RootFinding(String),

    /// Spline coefficient system is singular
    #[error("singular spline fit: {0}")]
    SingularFit(String),

    /// Shock clipping could not restore a single-valued waveform
    #[error("shock merge failed at altitude {altitude_m:.1} m: {reason}")]
    ShockMerge { altitude_m: f64, reason: String },

    /// The near-field extraction collaborator could not supply a trace
    #[error("near-field input error for azimuth {azimuth_index}: {reason}")]
    NearField { azimuth_index: usize, reason: String },

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Too many rays failed for the run to be meaningful
    #[error("{failed} of {total} rays failed: {summary}")]
    FanFailure { failed: usize, total: usize, summary: String },
}

/// Pipeline stage a ray was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitialWaveNormals,
    RayTracer,
    RayTubeArea,
    FindInitialRayTime,
    NearField,
    CreateSignature,
    OdeTerms,
    PropagateSignal,
    Sensitivity,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::InitialWaveNormals => "initial wave normals",
            Stage::RayTracer => "ray tracer",
            Stage::RayTubeArea => "ray tube area",
            Stage::FindInitialRayTime => "initial ray time",
            Stage::NearField => "near-field extraction",
            Stage::CreateSignature => "signature",
            Stage::OdeTerms => "ODE terms",
            Stage::PropagateSignal => "signal propagation",
            Stage::Sensitivity => "sensitivity",
        };
        write!(f, "{name}")
    }
}

/// A single ray's failure, isolated from the rest of the fan
#[derive(Debug, Clone, Serialize)]
pub struct RayFailure {
    pub azimuth_index: usize,
    pub azimuth_deg: f64,
    pub stage: Stage,
    pub reason: String,
}

impl RayFailure {
    pub fn new(azimuth_index: usize, azimuth_deg: f64, stage: Stage, error: &BoomError) -> Self {
        Self {
            azimuth_index,
            azimuth_deg,
            stage,
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for RayFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "azimuth #{} ({:.1}°) failed in {}: {}",
            self.azimuth_index, self.azimuth_deg, self.stage, self.reason
        )
    }
}

/// Ray-tube area fell to (or through) zero: a caustic.
///
/// Non-fatal. The propagation continues with the area held at the
/// threshold value below the caustic, and the warning is returned with
/// the ray's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausticWarning {
    pub azimuth_index: usize,
    /// Altitude of the first sample at or below the threshold (m)
    pub altitude_m: f64,
    /// Area ratio A(z) / A(origin) at that sample
    pub area_ratio: f64,
}

impl fmt::Display for CausticWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "caustic on azimuth #{} at {:.1} m (area ratio {:.3e})",
            self.azimuth_index, self.altitude_m, self.area_ratio
        )
    }
}
