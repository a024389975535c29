/// Physical constants used in atmosphere and propagation calculations

/// Standard gravitational acceleration in m/s²
pub const G_ACCEL_MPS2: f64 = 9.80665;

/// Specific gas constant for dry air (J/(kg·K))
pub const R_AIR: f64 = 287.053;

/// Heat capacity ratio for air
pub const GAMMA: f64 = 1.4;

/// Coefficient of nonlinearity for an ideal gas, (γ + 1) / 2
///
/// Controls how fast a pressure disturbance steepens: a waveform point with
/// overpressure `p` advances in retarded time at a rate `β p / (ρ a³)` per
/// metre of ray path.
pub const BETA_NONLINEAR: f64 = (GAMMA + 1.0) / 2.0;

/// Earth radius used for the geometric/geopotential altitude conversion (m)
pub const EARTH_RADIUS_M: f64 = 6_356_766.0;

/// Sea-level standard temperature (K)
pub const SEA_LEVEL_TEMPERATURE_K: f64 = 288.15;

/// Sea-level standard pressure (Pa)
pub const SEA_LEVEL_PRESSURE_PA: f64 = 101_325.0;

/// Sea-level standard density (kg/m³)
pub const SEA_LEVEL_DENSITY: f64 = 1.225;

// Numerical stability constants
/// General numerical tolerance for floating point comparisons
pub const NUMERICAL_TOLERANCE: f64 = 1e-9;

/// Minimum threshold for preventing division by zero in general calculations
pub const MIN_DIVISION_THRESHOLD: f64 = 1e-12;

/// Root finding tolerance used when matching the near-field radius on a ray (m)
pub const ROOT_FINDING_TOLERANCE: f64 = 1e-6;

/// Iteration cap for Brent's method
pub const ROOT_FINDING_MAX_ITER: usize = 100;

/// Minimum number of near-field samples for a well-posed spline fit
pub const MIN_SPLINE_POINTS: usize = 3;
