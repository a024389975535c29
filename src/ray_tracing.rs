//! Geometric-acoustics ray tracing through a horizontally stratified,
//! windless atmosphere.
//!
//! Each azimuth around the flight axis gets one [`Ray`]. A ray is traced
//! together with a neighbor at a slightly larger azimuth; the pair gives
//! the azimuthal derivative of the ray-fan mapping used for the ray-tube
//! area. Snell's law makes `a(z) / cos θ(z)` constant along a ray, so the
//! state integrated against altitude is only position and travel time.

use nalgebra::Vector3;

use crate::atmosphere::AtmosphereProfile;
use crate::config::FlightCondition;
use crate::constants::{NUMERICAL_TOLERANCE, ROOT_FINDING_MAX_ITER};
use crate::error::{BoomError, BoomResult};
use crate::integrator::{brent_root_find, rk4_step, OdeSystem};

/// Spherical to Cartesian conversion.
/// `azimuth` is measured in the x-y plane from x, `elevation` from that plane towards +z.
pub fn sph2cart(azimuth: f64, elevation: f64, r: f64) -> Vector3<f64> {
    Vector3::new(
        r * elevation.cos() * azimuth.cos(),
        r * elevation.cos() * azimuth.sin(),
        r * elevation.sin(),
    )
}

/// Vehicle kinematics shared by every ray of a case
#[derive(Debug, Clone)]
pub struct FlightGeometry {
    pub altitude_m: f64,
    pub mach: f64,
    /// Unit vector along the flight direction
    pub heading: Vector3<f64>,
    /// Vehicle velocity (m/s)
    pub velocity: Vector3<f64>,
    pub bank_rad: f64,
    /// Sound speed at flight altitude (m/s)
    pub sound_speed_mps: f64,
}

impl FlightGeometry {
    pub fn new(flight: &FlightCondition, sound_speed_mps: f64) -> Self {
        let heading = sph2cart(flight.heading_deg.to_radians(), flight.flight_path_deg.to_radians(), 1.0);
        Self {
            altitude_m: flight.altitude_m,
            mach: flight.mach,
            heading,
            velocity: heading * (flight.mach * sound_speed_mps),
            bank_rad: flight.bank_deg.to_radians(),
            sound_speed_mps,
        }
    }
}

/// Initial wave normal of one azimuth on the Mach cone
#[derive(Debug, Clone, Copy)]
pub struct WaveNormal {
    pub azimuth_rad: f64,
    pub normal: Vector3<f64>,
    /// Depression of the normal below the horizontal (rad)
    pub theta0: f64,
    /// Direction of the horizontal part of the normal (rad)
    pub nu: f64,
    /// Horizontal fraction of the unit normal, `cos θ0`
    pub cos_theta0: f64,
    /// Ray constant `a(h) / cos θ0`; infinite for a vertical normal
    pub c0: f64,
}

/// Wave normal on the Mach cone for azimuth `azimuth_rad`, measured about the
/// flight axis from the (banked) downward direction towards the right wing.
pub fn initial_wave_normal(geometry: &FlightGeometry, azimuth_rad: f64) -> BoomResult<WaveNormal> {
    if !(geometry.mach > 1.0) {
        return Err(BoomError::Geometry(format!("no Mach cone at Mach {}", geometry.mach)));
    }
    let heading = geometry.heading;
    let down = Vector3::new(0.0, 0.0, -1.0);

    // Frame perpendicular to the flight axis
    let down_perp = down - heading * down.dot(&heading);
    let down_norm = down_perp.norm();
    if down_norm < NUMERICAL_TOLERANCE {
        return Err(BoomError::Geometry("flight axis is vertical".to_string()));
    }
    let e_down = down_perp / down_norm;
    let e_side = heading.cross(&e_down);

    let angle = azimuth_rad + geometry.bank_rad;
    let radial = e_down * angle.cos() + e_side * angle.sin();

    let inv_mach = 1.0 / geometry.mach;
    let normal = heading * inv_mach + radial * (1.0 - inv_mach * inv_mach).sqrt();

    let magnitude = normal.norm();
    if !magnitude.is_finite() || (magnitude - 1.0).abs() > 1e-9 {
        return Err(BoomError::Geometry(format!("wave normal has magnitude {magnitude}")));
    }
    if normal.z >= -NUMERICAL_TOLERANCE {
        return Err(BoomError::Geometry(format!(
            "wave normal at azimuth {:.2}° does not point towards the ground (n_z = {:.3e})",
            azimuth_rad.to_degrees(),
            normal.z
        )));
    }

    let horizontal = (normal.x * normal.x + normal.y * normal.y).sqrt();
    let c0 = if horizontal > 0.0 { geometry.sound_speed_mps / horizontal } else { f64::INFINITY };

    Ok(WaveNormal {
        azimuth_rad,
        normal,
        theta0: (-normal.z).atan2(horizontal),
        nu: normal.y.atan2(normal.x),
        cos_theta0: horizontal,
        c0,
    })
}

/// Ray-path ODE context: `d(x, y, t)/dz` for a fixed ray constant
pub struct RayPathSystem<'a> {
    profile: &'a AtmosphereProfile,
    /// `1 / c0`, so the sound-speed ratio is `a(z) * inv_c0`
    inv_c0: f64,
    cos_nu: f64,
    sin_nu: f64,
}

impl<'a> RayPathSystem<'a> {
    pub fn new(profile: &'a AtmosphereProfile, normal: &WaveNormal) -> Self {
        let a_h = profile.sound_speed(profile.top());
        Self {
            profile,
            inv_c0: normal.cos_theta0 / a_h,
            cos_nu: normal.nu.cos(),
            sin_nu: normal.nu.sin(),
        }
    }

    /// Sound-speed ratio `a(z)/c0 = cos θ(z)`
    #[inline]
    pub fn sound_speed_ratio(&self, z: f64) -> f64 {
        self.profile.sound_speed(z) * self.inv_c0
    }

    /// Horizontal slopes `(dx/dz, dy/dz)` of the ray at altitude `z`
    pub fn slopes(&self, z: f64) -> (f64, f64) {
        let xi = self.sound_speed_ratio(z);
        let cot = xi / (1.0 - xi * xi).sqrt();
        (-cot * self.cos_nu, -cot * self.sin_nu)
    }
}

impl OdeSystem for RayPathSystem<'_> {
    fn derivatives(&self, z: f64, _y: &[f64], dydz: &mut [f64]) {
        let a = self.profile.sound_speed(z);
        let xi = a * self.inv_c0;
        // Past the turning point the root goes NaN and the step is rejected
        let sin_theta = (1.0 - xi * xi).sqrt();
        let cot = xi / sin_theta;
        dydz[0] = -cot * self.cos_nu;
        dydz[1] = -cot * self.sin_nu;
        dydz[2] = -1.0 / (a * sin_theta);
    }
}

/// Samples of one traced ray, ordered from flight altitude down to the ground
#[derive(Debug, Clone, Default)]
pub struct RayPath {
    pub z: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub t: Vec<f64>,
    /// Sound-speed ratio `a(z)/c0`
    pub xi: Vec<f64>,
}

impl RayPath {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    fn push(&mut self, z: f64, state: &[f64], xi: f64) {
        self.z.push(z);
        self.x.push(state[0]);
        self.y.push(state[1]);
        self.t.push(state[2]);
        self.xi.push(xi);
    }
}

/// Number of uniform altitude steps from `top_m` to the ground
pub fn altitude_steps(top_m: f64, tol_integrate: f64, max_steps: usize) -> BoomResult<usize> {
    let n = (1.0 / tol_integrate).ceil();
    if !n.is_finite() || n as usize > max_steps {
        return Err(BoomError::RayDivergence {
            altitude_m: top_m,
            reason: format!("{n} steps needed, limit is {max_steps}"),
        });
    }
    Ok((n as usize).max(1))
}

/// Integrate one ray from flight altitude to the ground
pub fn trace_ray(profile: &AtmosphereProfile, normal: &WaveNormal, n_steps: usize) -> BoomResult<RayPath> {
    let system = RayPathSystem::new(profile, normal);
    let top = profile.top();
    let dz = -top / n_steps as f64;

    let mut path = RayPath::default();
    let mut state = vec![0.0, 0.0, 0.0];
    let xi0 = system.sound_speed_ratio(top);
    if !(xi0 < 1.0) {
        return Err(BoomError::RayDivergence {
            altitude_m: top,
            reason: format!("initial sound-speed ratio {xi0:.6} is not below 1"),
        });
    }
    path.push(top, &state, xi0);

    for k in 0..n_steps {
        let z = top + dz * k as f64;
        let z_next = if k + 1 == n_steps { 0.0 } else { top + dz * (k + 1) as f64 };
        state = rk4_step(&system, z, &state, z_next - z);

        let xi = system.sound_speed_ratio(z_next);
        if !(xi < 1.0) || state.iter().any(|v| !v.is_finite()) {
            return Err(BoomError::RayDivergence {
                altitude_m: z_next,
                reason: format!("ray turned horizontal (sound-speed ratio {xi:.6})"),
            });
        }
        path.push(z_next, &state, xi);
    }
    Ok(path)
}

/// Where the ray crosses the near-field radius; the propagation origin
#[derive(Debug, Clone, Copy)]
pub struct RayOrigin {
    pub altitude_m: f64,
    /// Index of the first path sample strictly below the origin
    pub next_index: usize,
    pub x: f64,
    pub y: f64,
    /// Travel time from the vehicle, before rebasing (s)
    pub t0: f64,
    pub xi: f64,
    pub area: f64,
}

/// Per-azimuth ray record
#[derive(Debug, Clone)]
pub struct Ray {
    pub azimuth_index: usize,
    pub normal: WaveNormal,
    pub path: RayPath,
    /// Companion ray at azimuth + dphi
    pub neighbor: RayPath,
    pub dphi: f64,
    /// Ray-tube area per path sample (m²), sign-normalized near the vehicle
    pub area: Vec<f64>,
    pub origin: Option<RayOrigin>,
}

impl Ray {
    /// Wave normals and paths for azimuth `azimuth_rad` and its neighbor
    pub fn trace(
        azimuth_index: usize,
        azimuth_rad: f64,
        geometry: &FlightGeometry,
        profile: &AtmosphereProfile,
        dphi: f64,
        n_steps: usize,
    ) -> BoomResult<Self> {
        let normal = initial_wave_normal(geometry, azimuth_rad)?;
        let neighbor_normal = initial_wave_normal(geometry, azimuth_rad + dphi)?;
        let path = trace_ray(profile, &normal, n_steps)?;
        let neighbor = trace_ray(profile, &neighbor_normal, n_steps)?;
        Ok(Self {
            azimuth_index,
            normal,
            path,
            neighbor,
            dphi,
            area: Vec::new(),
            origin: None,
        })
    }

    /// Ground impact point `(x, y)` relative to the vehicle's ground track origin
    pub fn ground_point(&self) -> (f64, f64) {
        let last = self.path.len() - 1;
        (self.path.x[last], self.path.y[last])
    }

    pub fn azimuth_deg(&self) -> f64 {
        self.normal.azimuth_rad.to_degrees()
    }
}

/// Ray-tube area from the Jacobian of the ray-fan mapping.
///
/// At each altitude the tube is spanned by the displacement between rays
/// emitted `dτ` apart (the vehicle moved `V dτ`) and between neighboring
/// azimuths. Both lie in the horizontal plane, so the cross-section normal
/// to the ray is `|J| sin θ`.
pub fn ray_tube_area(ray: &mut Ray, geometry: &FlightGeometry, profile: &AtmosphereProfile) -> BoomResult<()> {
    let path = &ray.path;
    let neighbor = &ray.neighbor;
    if path.len() < 2 || neighbor.len() != path.len() {
        return Err(BoomError::Geometry("ray and neighbor paths are not aligned".to_string()));
    }
    let system = RayPathSystem::new(profile, &ray.normal);
    let v = geometry.velocity;

    let mut area = Vec::with_capacity(path.len());
    for k in 0..path.len() {
        let dx_dphi = (neighbor.x[k] - path.x[k]) / ray.dphi;
        let dy_dphi = (neighbor.y[k] - path.y[k]) / ray.dphi;

        // Along-track displacement at fixed altitude for a climbing vehicle
        let (sx, sy) = system.slopes(path.z[k]);
        let tx = v.x - sx * v.z;
        let ty = v.y - sy * v.z;

        let jacobian = tx * dy_dphi - ty * dx_dphi;
        let sin_theta = (1.0 - path.xi[k] * path.xi[k]).sqrt();
        area.push(jacobian * sin_theta);
    }

    // Orientation of the fan just below the vehicle fixes the sign
    let orientation = area[1].signum();
    if area[1] == 0.0 || !area[1].is_finite() {
        return Err(BoomError::Geometry(format!(
            "degenerate ray fan at azimuth {:.2}°",
            ray.azimuth_deg()
        )));
    }
    for a in area.iter_mut() {
        *a *= orientation;
    }
    ray.area = area;
    Ok(())
}

/// Locate the near-field radius on the ray and rebase the ray's time so that
/// `t = 0` where the near-field signature was recorded.
pub fn find_initial_ray_time(ray: &mut Ray, geometry: &FlightGeometry, radius_m: f64, tolerance: f64) -> BoomResult<()> {
    let path = &ray.path;
    let axis = geometry.heading;
    let top = geometry.altitude_m;

    let lateral = |x: f64, y: f64, z: f64| -> f64 {
        let p = Vector3::new(x, y, z - top);
        (p - axis * p.dot(&axis)).norm()
    };

    let first_outside = (1..path.len())
        .find(|&k| lateral(path.x[k], path.y[k], path.z[k]) >= radius_m)
        .ok_or_else(|| {
            BoomError::Geometry(format!(
                "near-field radius {radius_m} m not reached above the ground at azimuth {:.2}°",
                ray.azimuth_deg()
            ))
        })?;

    // Within one step the path is treated as straight
    let k = first_outside;
    let (z_hi, z_lo) = (path.z[k - 1], path.z[k]);
    let interpolate = |values: &[f64], z: f64| -> f64 {
        let frac = (z_hi - z) / (z_hi - z_lo);
        values[k - 1] + (values[k] - values[k - 1]) * frac
    };
    let miss = |z: f64| lateral(interpolate(&path.x, z), interpolate(&path.y, z), z) - radius_m;

    let z0 = brent_root_find(miss, z_lo, z_hi, tolerance, ROOT_FINDING_MAX_ITER)
        .map_err(|e| BoomError::Geometry(format!("near-field radius match failed: {e}")))?;
    let z0 = z0.clamp(z_lo, z_hi);
    // Skip a path sample that coincides with the origin
    let gap = 1e-6 * (z_hi - z_lo);
    let next_index = (k..path.len())
        .find(|&j| path.z[j] < z0 - gap)
        .ok_or_else(|| BoomError::Geometry("near-field origin lies on the ground".to_string()))?;

    let origin = RayOrigin {
        altitude_m: z0,
        next_index,
        x: interpolate(&path.x, z0),
        y: interpolate(&path.y, z0),
        t0: interpolate(&path.t, z0),
        xi: interpolate(&path.xi, z0),
        area: interpolate(&ray.area, z0),
    };

    for t in ray.path.t.iter_mut() {
        *t -= origin.t0;
    }
    ray.origin = Some(origin);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::{AtmosphereModel, AtmosphereTable};

    fn isothermal_profile(top: f64) -> AtmosphereProfile {
        let table = AtmosphereTable::uniform(top, 300.0, 1.0);
        AtmosphereProfile::build(&AtmosphereModel::Tabulated(table), top, 11).unwrap()
    }

    fn level_flight(mach: f64) -> FlightCondition {
        FlightCondition { altitude_m: 10_000.0, mach, ..Default::default() }
    }

    #[test]
    fn test_sph2cart() {
        let v = sph2cart(std::f64::consts::FRAC_PI_2, 0.0, 2.0);
        assert!(v.x.abs() < 1e-12 && (v.y - 2.0).abs() < 1e-12 && v.z.abs() < 1e-12);
        let up = sph2cart(0.3, std::f64::consts::FRAC_PI_2, 1.0);
        assert!((up.z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_wave_normal_on_mach_cone() {
        let geometry = FlightGeometry::new(&level_flight(2.0), 300.0);
        let normal = initial_wave_normal(&geometry, 0.0).unwrap();
        // n · v̂ = 1/M
        assert!((normal.normal.dot(&geometry.heading) - 0.5).abs() < 1e-12);
        // Undertrack normal stays in the vertical plane of the flight path
        assert!(normal.normal.y.abs() < 1e-12);
        assert!(normal.normal.z < 0.0);
        assert!((normal.c0 - 300.0 / 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_upward_azimuth_rejected() {
        let geometry = FlightGeometry::new(&level_flight(1.5), 300.0);
        assert!(matches!(
            initial_wave_normal(&geometry, 180f64.to_radians()),
            Err(BoomError::Geometry(_))
        ));
    }

    #[test]
    fn test_bank_rotates_azimuth() {
        let mut flight = level_flight(1.5);
        flight.bank_deg = 20.0;
        let banked = FlightGeometry::new(&flight, 300.0);
        let level = FlightGeometry::new(&level_flight(1.5), 300.0);
        let a = initial_wave_normal(&banked, 0.0).unwrap();
        let b = initial_wave_normal(&level, 20f64.to_radians()).unwrap();
        assert!((a.normal - b.normal).norm() < 1e-12);
    }

    #[test]
    fn test_isothermal_ray_is_straight() {
        let profile = isothermal_profile(10_000.0);
        let geometry = FlightGeometry::new(&level_flight(1.6), 300.0);
        let normal = initial_wave_normal(&geometry, 25f64.to_radians()).unwrap();
        let path = trace_ray(&profile, &normal, 200).unwrap();

        assert!((path.z[path.len() - 1]).abs() < 1e-9);
        let cot = normal.cos_theta0 / (1.0 - normal.cos_theta0.powi(2)).sqrt();
        for k in 0..path.len() {
            let drop = 10_000.0 - path.z[k];
            // Constant direction: horizontal distance proportional to drop
            let horizontal = (path.x[k].powi(2) + path.y[k].powi(2)).sqrt();
            assert!((horizontal - drop * cot).abs() < 1e-6 * (1.0 + drop));
            // Stays in the vertical plane of its azimuth
            assert!((path.y[k] * normal.nu.cos() - path.x[k] * normal.nu.sin()).abs() < 1e-6);
            assert!((path.xi[k] - normal.cos_theta0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ray_turns_before_ground() {
        // Sound speed rising towards the ground traps a shallow ray aloft
        let table = AtmosphereTable {
            altitude_m: vec![0.0, 10_000.0],
            sound_speed_mps: vec![400.0, 300.0],
            density_kg_m3: vec![1.2, 0.4],
        };
        let profile = AtmosphereProfile::build(&AtmosphereModel::Tabulated(table), 10_000.0, 101).unwrap();
        let geometry = FlightGeometry::new(&level_flight(1.1), 300.0);
        let normal = initial_wave_normal(&geometry, 0.0).unwrap();
        assert!(matches!(trace_ray(&profile, &normal, 500), Err(BoomError::RayDivergence { .. })));
    }

    #[test]
    fn test_step_limit() {
        assert!(altitude_steps(10_000.0, 1e-3, 500).is_err());
        assert_eq!(altitude_steps(10_000.0, 1e-2, 500).unwrap(), 100);
    }

    #[test]
    fn test_uniform_fan_area_grows_with_distance() {
        let profile = isothermal_profile(10_000.0);
        let geometry = FlightGeometry::new(&level_flight(1.5), 300.0);
        let mut ray = Ray::trace(0, 15f64.to_radians(), &geometry, &profile, 1e-3, 100).unwrap();
        ray_tube_area(&mut ray, &geometry, &profile).unwrap();

        // Cylindrical spreading from the flight axis: A ∝ (h - z)
        let reference = ray.area[10] / (10_000.0 - ray.path.z[10]);
        for k in 1..ray.path.len() {
            let expected = reference * (10_000.0 - ray.path.z[k]);
            assert!(ray.area[k] > 0.0);
            assert!((ray.area[k] - expected).abs() < 1e-6 * expected);
        }
    }

    #[test]
    fn test_initial_ray_time_matches_radius() {
        let profile = isothermal_profile(10_000.0);
        let geometry = FlightGeometry::new(&level_flight(1.5), 300.0);
        let mut ray = Ray::trace(0, 0.0, &geometry, &profile, 1e-3, 100).unwrap();
        ray_tube_area(&mut ray, &geometry, &profile).unwrap();
        find_initial_ray_time(&mut ray, &geometry, 250.0, 1e-9).unwrap();

        let origin = ray.origin.unwrap();
        // Undertrack in level flight: lateral distance is the altitude drop
        assert!((10_000.0 - origin.altitude_m - 250.0).abs() < 1e-6);
        // Straight ray at the speed of sound
        let sin_theta = (1.0 - origin.xi * origin.xi).sqrt();
        assert!((origin.t0 - 250.0 / sin_theta / 300.0).abs() < 1e-9);
        assert!(origin.area > 0.0);
        // Time rebased to the origin
        assert!(ray.path.t[0] < 0.0);
        assert!(ray.path.t[ray.path.len() - 1] > 0.0);
    }

    #[test]
    fn test_radius_beyond_ground_rejected() {
        let profile = isothermal_profile(10_000.0);
        let geometry = FlightGeometry::new(&level_flight(1.5), 300.0);
        let mut ray = Ray::trace(0, 0.0, &geometry, &profile, 1e-3, 100).unwrap();
        ray_tube_area(&mut ray, &geometry, &profile).unwrap();
        assert!(matches!(
            find_initial_ray_time(&mut ray, &geometry, 20_000.0, 1e-9),
            Err(BoomError::Geometry(_))
        ));
    }
}
