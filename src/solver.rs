//! End-to-end boom calculation over a fan of azimuths.
//!
//! Stages per ray: initial wave normals, ray tracing (ray and neighbor),
//! then, once every ray of the fan is traced, ray-tube area, propagation
//! origin, near-field extraction, signature, ODE terms and nonlinear
//! propagation to the ground. Rays run in parallel and fail independently.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::atmosphere::{AtmosphereModel, AtmosphereProfile, AtmosphereState, ScaleFactors};
use crate::config::BoomConfig;
use crate::error::{BoomError, BoomResult, CausticWarning, RayFailure, Stage};
use crate::propagation::{
    propagate_signal, signature_metrics, waveform_to_pressure_signal, Propagation, PropagationControl,
    PressureSignal, SignatureMetrics,
};
use crate::ray_tracing::{altitude_steps, find_initial_ray_time, ray_tube_area, FlightGeometry, Ray};
use crate::sensitivity::{near_field_sensitivities, SensitivityAggregator, SensitivityContribution, SensitivityRecord};
use crate::signature::{create_signature, ode_terms, NearFieldSignature, NearFieldSource, OdeTerms, Signature};

/// Ground result for one azimuth
#[derive(Debug, Clone, Serialize)]
pub struct GroundSignature {
    pub azimuth_index: usize,
    pub azimuth_deg: f64,
    /// Ground impact point relative to the point below the vehicle (m)
    pub ground_x_m: f64,
    pub ground_y_m: f64,
    /// Travel time from the near-field probe to the ground (s)
    pub arrival_time_s: f64,
    /// Altitude where the near-field trace was taken (m)
    pub origin_altitude_m: f64,
    pub signal: PressureSignal,
    pub metrics: SignatureMetrics,
    /// Metrics of the near-field trace, for comparison
    pub near_field: SignatureMetrics,
    pub segments_initial: usize,
    pub segments_final: usize,
}

/// Everything a run produces
#[derive(Debug, Clone, Serialize)]
pub struct BoomReport {
    pub signatures: Vec<GroundSignature>,
    pub failures: Vec<RayFailure>,
    pub caustics: Vec<CausticWarning>,
    /// Sum over successful rays of ∫p² dt at the ground (Pa²·s)
    pub objective: f64,
    pub sensitivities: Option<SensitivityRecord>,
}

struct RayOutcome {
    ground: GroundSignature,
    caustic: Option<CausticWarning>,
    sensitivities: Vec<SensitivityContribution>,
}

/// Solver for one flight condition and atmosphere
#[derive(Debug, Clone)]
pub struct BoomSolver {
    config: BoomConfig,
    profile: AtmosphereProfile,
    at_flight: AtmosphereState,
    scale: ScaleFactors,
    geometry: FlightGeometry,
}

impl BoomSolver {
    /// Validate the configuration and tabulate the atmosphere once
    pub fn new(config: BoomConfig) -> BoomResult<Self> {
        config.validate()?;
        let model = AtmosphereModel::from_config(&config.atmosphere)?;
        let profile = AtmosphereProfile::build(&model, config.flight.altitude_m, config.settings.n_profile)?;
        let at_flight = profile.at(config.flight.altitude_m)?;
        let scale = ScaleFactors::new(&config.flight, &at_flight);
        let geometry = FlightGeometry::new(&config.flight, at_flight.sound_speed_mps);

        info!(
            altitude_m = config.flight.altitude_m,
            mach = config.flight.mach,
            sound_speed_mps = at_flight.sound_speed_mps,
            "atmosphere profile ready"
        );
        Ok(Self { config, profile, at_flight, scale, geometry })
    }

    pub fn config(&self) -> &BoomConfig {
        &self.config
    }

    pub fn profile(&self) -> &AtmosphereProfile {
        &self.profile
    }

    pub fn scale_factors(&self) -> &ScaleFactors {
        &self.scale
    }

    /// Air at flight altitude
    pub fn flight_state(&self) -> &AtmosphereState {
        &self.at_flight
    }

    pub fn geometry(&self) -> &FlightGeometry {
        &self.geometry
    }

    /// Vehicle speed (m/s)
    pub fn flight_speed(&self) -> f64 {
        self.config.flight.mach * self.at_flight.sound_speed_mps
    }

    fn control(&self) -> PropagationControl {
        PropagationControl {
            tol_l: self.config.tolerances.l,
            tol_m: self.config.tolerances.m,
            max_substeps: self.config.settings.max_substeps,
            max_clip_passes: self.config.settings.max_clip_passes,
        }
    }

    /// Trace every azimuth of the fan. Stage results only; no area or origin yet.
    pub fn trace_fan(&self) -> Vec<Result<Ray, RayFailure>> {
        let azimuths = self.config.fan.azimuths();
        azimuths
            .par_iter()
            .enumerate()
            .map(|(index, &azimuth_deg)| self.trace_azimuth(index, azimuth_deg))
            .collect()
    }

    fn trace_azimuth(&self, index: usize, azimuth_deg: f64) -> Result<Ray, RayFailure> {
        let tol = &self.config.tolerances;
        let n_steps = altitude_steps(self.config.flight.altitude_m, tol.integrate, self.config.settings.max_steps)
            .map_err(|e| RayFailure::new(index, azimuth_deg, Stage::RayTracer, &e))?;

        let ray = Ray::trace(index, azimuth_deg.to_radians(), &self.geometry, &self.profile, tol.dphi, n_steps)
            .map_err(|e| {
                let stage = match e {
                    BoomError::Geometry(_) => Stage::InitialWaveNormals,
                    _ => Stage::RayTracer,
                };
                RayFailure::new(index, azimuth_deg, stage, &e)
            })?;
        debug!(azimuth = index, theta0_deg = ray.normal.theta0.to_degrees(), "ray traced");
        Ok(ray)
    }

    /// Near-field trace to ground signal along a prepared ray
    fn ground_waveform(
        &self,
        near_field: &NearFieldSignature,
        terms: &OdeTerms,
    ) -> Result<(Signature, Propagation), (Stage, BoomError)> {
        let signature = create_signature(
            near_field,
            &self.scale,
            self.config.flight.mach,
            self.at_flight.sound_speed_mps,
            self.config.settings.signal_points,
        )
        .map_err(|e| (Stage::CreateSignature, e))?;
        let propagation = propagate_signal(&signature.waveform, terms, &self.scale, &self.control())
            .map_err(|e| (Stage::PropagateSignal, e))?;
        Ok((signature, propagation))
    }

    /// Ground ∫p² dt for a near-field trace along a prepared ray
    fn objective_for(&self, near_field: &NearFieldSignature, terms: &OdeTerms) -> BoomResult<f64> {
        let (_, propagation) = self.ground_waveform(near_field, terms).map_err(|(_, e)| e)?;
        let signal = waveform_to_pressure_signal(&propagation.waveform, &self.scale, 0.0);
        Ok(signature_metrics(&signal.time_s, &signal.pressure_pa).p_int2)
    }

    /// Tube areas and the near-field origin of a traced ray
    fn prepare_ray(&self, ray: &mut Ray) -> Result<(), RayFailure> {
        let index = ray.azimuth_index;
        let azimuth_deg = ray.azimuth_deg();
        ray_tube_area(ray, &self.geometry, &self.profile)
            .map_err(|e| RayFailure::new(index, azimuth_deg, Stage::RayTubeArea, &e))?;
        find_initial_ray_time(ray, &self.geometry, self.config.fan.radius_m, self.config.tolerances.match_radius)
            .map_err(|e| RayFailure::new(index, azimuth_deg, Stage::FindInitialRayTime, &e))
    }

    fn propagate_ray<S: NearFieldSource + ?Sized>(&self, mut ray: Ray, source: &S) -> Result<RayOutcome, RayFailure> {
        self.prepare_ray(&mut ray)?;
        self.propagate_prepared(ray, source)
    }

    fn propagate_prepared<S: NearFieldSource + ?Sized>(&self, ray: Ray, source: &S) -> Result<RayOutcome, RayFailure> {
        let index = ray.azimuth_index;
        let azimuth_deg = ray.azimuth_deg();
        let fail = move |stage: Stage| move |e: BoomError| RayFailure::new(index, azimuth_deg, stage, &e);
        let tol = &self.config.tolerances;
        let radius = self.config.fan.radius_m;

        let origin = ray
            .origin
            .ok_or_else(|| fail(Stage::FindInitialRayTime)(BoomError::Geometry("origin not set".to_string())))?;

        let near_field = source
            .extract(index, azimuth_deg, radius, tol.dr)
            .map_err(fail(Stage::NearField))?;
        let (terms, caustic) = ode_terms(&ray, &self.profile, &self.scale, tol.caustic_area_ratio)
            .map_err(fail(Stage::OdeTerms))?;
        let (signature, propagation) = self
            .ground_waveform(&near_field, &terms)
            .map_err(|(stage, e)| fail(stage)(e))?;

        let (ground_x_m, ground_y_m) = ray.ground_point();
        let arrival_time_s = ray.path.t[ray.path.len() - 1];
        let signal = waveform_to_pressure_signal(&propagation.waveform, &self.scale, arrival_time_s);
        let metrics = signature_metrics(&signal.time_s, &signal.pressure_pa);
        debug!(
            azimuth = index,
            p_max_pa = metrics.p_max_pa,
            segments = propagation.waveform.len(),
            substeps = propagation.substeps,
            "ray propagated"
        );

        let sensitivities = if self.config.settings.compute_sensitivities {
            near_field_sensitivities(&near_field, tol.dp, |nf| self.objective_for(nf, &terms))
                .map_err(fail(Stage::Sensitivity))?
        } else {
            Vec::new()
        };

        Ok(RayOutcome {
            ground: GroundSignature {
                azimuth_index: index,
                azimuth_deg,
                ground_x_m,
                ground_y_m,
                arrival_time_s,
                origin_altitude_m: origin.altitude_m,
                signal,
                metrics,
                near_field: signature.reference,
                segments_initial: signature.waveform.len(),
                segments_final: propagation.waveform.len(),
            },
            caustic,
            sensitivities,
        })
    }

    /// Run the whole fan against a near-field source.
    ///
    /// Individual ray failures are returned in the report; the run fails
    /// only when more than `max_failure_fraction` of the rays fail.
    pub fn run<S: NearFieldSource + ?Sized>(&self, source: &S) -> BoomResult<BoomReport> {
        let traced = self.trace_fan();
        let total = traced.len();

        // All rays exist before any tube area is formed
        let outcomes: Vec<Result<RayOutcome, RayFailure>> = traced
            .into_par_iter()
            .map(|traced| traced.and_then(|ray| self.propagate_ray(ray, source)))
            .collect();

        let mut signatures = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut caustics = Vec::new();
        let mut aggregator = SensitivityAggregator::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    if let Some(caustic) = result.caustic {
                        warn!("{caustic}");
                        caustics.push(caustic);
                    }
                    aggregator.extend(result.sensitivities);
                    signatures.push(result.ground);
                }
                Err(failure) => {
                    warn!("{failure}");
                    failures.push(failure);
                }
            }
        }

        let max_fraction = self.config.settings.max_failure_fraction;
        if failures.len() as f64 > max_fraction * total as f64 {
            let summary = failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ");
            return Err(BoomError::FanFailure { failed: failures.len(), total, summary });
        }

        let objective = signatures.iter().map(|s| s.metrics.p_int2).sum();
        let sensitivities = self.config.settings.compute_sensitivities.then(|| aggregator.finish());
        info!(
            rays = total,
            succeeded = signatures.len(),
            failed = failures.len(),
            caustics = caustics.len(),
            "boom propagation finished"
        );

        Ok(BoomReport { signatures, failures, caustics, objective, sensitivities })
    }
}
