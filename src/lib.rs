//! # Sonic Boom Engine
//!
//! Propagates near-field pressure signatures of a supersonic vehicle to the
//! ground: geometric-acoustics ray tracing through a stratified atmosphere,
//! ray-tube areas, and nonlinear waveform evolution with shock formation.
//!
//! ```no_run
//! use sonic_boom_engine::{BoomConfig, BoomSolver, SyntheticNWave};
//!
//! let solver = BoomSolver::new(BoomConfig::default())?;
//! let source = SyntheticNWave::from_duration(50.0, 0.2, 201, solver.flight_speed());
//! let report = solver.run(&source)?;
//! for ground in &report.signatures {
//!     println!("{:.1}°: {:.2} Pa", ground.azimuth_deg, ground.metrics.p_max_pa);
//! }
//! # Ok::<(), sonic_boom_engine::BoomError>(())
//! ```

// Re-export the main types and functions
pub use atmosphere::{
    standard_atmosphere, AtmosphereModel, AtmosphereProfile, AtmosphereState, AtmosphereTable, ScaleFactors,
};
pub use config::{AtmosphereConfig, BoomConfig, FlightCondition, PropagationSettings, RayFan, Tolerances};
pub use error::{BoomError, BoomResult, CausticWarning, RayFailure, Stage};
pub use propagation::{PressureSignal, SignatureMetrics};
pub use sensitivity::{SensitivityAggregator, SensitivityContribution, SensitivityRecord};
pub use signature::{NearFieldSample, NearFieldSignature, NearFieldSource, NearFieldTable, SyntheticNWave, Waveform};
pub use solver::{BoomReport, BoomSolver, GroundSignature};

// Module declarations
pub mod atmosphere;
pub mod config;
pub mod constants;
pub mod error;
pub mod integrator;
pub mod logging;
pub mod propagation;
pub mod ray_tracing;
pub mod sensitivity;
pub mod signature;
pub mod solver;
pub mod sorting;
pub mod spline;
