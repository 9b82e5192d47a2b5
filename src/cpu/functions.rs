//! Atmospheric scattering integrals and look-up table parameterizations
//!
//! Lengths are in the atmosphere's length unit, angles are given by their cosines: `mu` for the
//! view zenith angle, `mu_s` for the sun zenith angle and `nu` for the view-sun angle.

use std::f32::consts::PI;

use glam::{Vec2, Vec3, Vec4};

use crate::uniforms::{AtmosphereUniforms as Atmosphere, DensityProfileRaw};

/// Linearly filtered, clamp-to-edge texture reads at normalized coordinates
pub trait Sampler {
    /// `coord.z` is ignored for 2D textures
    fn sample(&self, coord: Vec3) -> Vec4;

    fn sample_2d(&self, uv: Vec2) -> Vec4 {
        self.sample(uv.extend(0.0))
    }
}

/// Textures read by scattering-order dependent lookups
pub struct ScatteringTextures<'a> {
    pub single_rayleigh: &'a dyn Sampler,
    pub single_mie: &'a dyn Sampler,
    pub multiple: &'a dyn Sampler,
}

fn clamp_cosine(mu: f32) -> f32 {
    mu.clamp(-1.0, 1.0)
}

fn clamp_distance(d: f32) -> f32 {
    d.max(0.0)
}

fn clamp_radius(atm: &Atmosphere, r: f32) -> f32 {
    r.clamp(atm.bottom_radius, atm.top_radius)
}

fn safe_sqrt(a: f32) -> f32 {
    a.max(0.0).sqrt()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn exp(v: Vec3) -> Vec3 {
    Vec3::new(v.x.exp(), v.y.exp(), v.z.exp())
}

fn horizon_distance(atm: &Atmosphere) -> f32 {
    (atm.top_radius * atm.top_radius - atm.bottom_radius * atm.bottom_radius).sqrt()
}

pub fn distance_to_top_atmosphere_boundary(atm: &Atmosphere, r: f32, mu: f32) -> f32 {
    let discriminant = r * r * (mu * mu - 1.0) + atm.top_radius * atm.top_radius;
    clamp_distance(-r * mu + safe_sqrt(discriminant))
}

pub fn distance_to_bottom_atmosphere_boundary(atm: &Atmosphere, r: f32, mu: f32) -> f32 {
    let discriminant = r * r * (mu * mu - 1.0) + atm.bottom_radius * atm.bottom_radius;
    clamp_distance(-r * mu - safe_sqrt(discriminant))
}

pub fn ray_intersects_ground(atm: &Atmosphere, r: f32, mu: f32) -> bool {
    mu < 0.0 && r * r * (mu * mu - 1.0) + atm.bottom_radius * atm.bottom_radius >= 0.0
}

fn distance_to_nearest_atmosphere_boundary(
    atm: &Atmosphere,
    r: f32,
    mu: f32,
    ray_r_mu_intersects_ground: bool,
) -> f32 {
    if ray_r_mu_intersects_ground {
        distance_to_bottom_atmosphere_boundary(atm, r, mu)
    } else {
        distance_to_top_atmosphere_boundary(atm, r, mu)
    }
}

fn compute_optical_length_to_top_atmosphere_boundary(
    atm: &Atmosphere,
    profile: &DensityProfileRaw,
    r: f32,
    mu: f32,
) -> f32 {
    const SAMPLE_COUNT: u32 = 500;
    let dx = distance_to_top_atmosphere_boundary(atm, r, mu) / SAMPLE_COUNT as f32;
    let mut result = 0.0;
    for i in 0..=SAMPLE_COUNT {
        let d_i = i as f32 * dx;
        let r_i = (d_i * d_i + 2.0 * r * mu * d_i + r * r).sqrt();
        let y_i = profile.density(r_i - atm.bottom_radius);
        // Trapezoidal rule
        let weight_i = if i == 0 || i == SAMPLE_COUNT { 0.5 } else { 1.0 };
        result += y_i * weight_i * dx;
    }
    result
}

pub fn compute_transmittance_to_top_atmosphere_boundary(atm: &Atmosphere, r: f32, mu: f32) -> Vec3 {
    exp(-(Vec3::from(atm.rayleigh_scattering)
        * compute_optical_length_to_top_atmosphere_boundary(atm, &atm.rayleigh_density, r, mu)
        + Vec3::from(atm.mie_extinction)
            * compute_optical_length_to_top_atmosphere_boundary(atm, &atm.mie_density, r, mu)
        + Vec3::from(atm.absorption_extinction)
            * compute_optical_length_to_top_atmosphere_boundary(
                atm,
                &atm.absorption_density,
                r,
                mu,
            )))
}

fn get_texture_coord_from_unit_range(x: f32, texture_size: u32) -> f32 {
    0.5 / texture_size as f32 + x * (1.0 - 1.0 / texture_size as f32)
}

fn get_unit_range_from_texture_coord(u: f32, texture_size: u32) -> f32 {
    (u - 0.5 / texture_size as f32) / (1.0 - 1.0 / texture_size as f32)
}

pub fn get_transmittance_texture_uv_from_r_mu(atm: &Atmosphere, r: f32, mu: f32) -> Vec2 {
    let h = horizon_distance(atm);
    let rho = safe_sqrt(r * r - atm.bottom_radius * atm.bottom_radius);
    let d = distance_to_top_atmosphere_boundary(atm, r, mu);
    let d_min = atm.top_radius - r;
    let d_max = rho + h;
    let x_mu = (d - d_min) / (d_max - d_min);
    let x_r = rho / h;
    Vec2::new(
        get_texture_coord_from_unit_range(x_mu, atm.transmittance_size[0]),
        get_texture_coord_from_unit_range(x_r, atm.transmittance_size[1]),
    )
}

pub fn get_r_mu_from_transmittance_texture_uv(atm: &Atmosphere, uv: Vec2) -> (f32, f32) {
    let x_mu = get_unit_range_from_texture_coord(uv.x, atm.transmittance_size[0]);
    let x_r = get_unit_range_from_texture_coord(uv.y, atm.transmittance_size[1]);
    let h = horizon_distance(atm);
    let rho = h * x_r;
    let r = (rho * rho + atm.bottom_radius * atm.bottom_radius).sqrt();
    let d_min = atm.top_radius - r;
    let d_max = rho + h;
    let d = d_min + x_mu * (d_max - d_min);
    let mu = if d == 0.0 {
        1.0
    } else {
        (h * h - rho * rho - d * d) / (2.0 * r * d)
    };
    (r, clamp_cosine(mu))
}

pub fn compute_transmittance_to_top_atmosphere_boundary_texture(
    atm: &Atmosphere,
    frag_coord: Vec2,
) -> Vec3 {
    let size = Vec2::new(
        atm.transmittance_size[0] as f32,
        atm.transmittance_size[1] as f32,
    );
    let (r, mu) = get_r_mu_from_transmittance_texture_uv(atm, frag_coord / size);
    compute_transmittance_to_top_atmosphere_boundary(atm, r, mu)
}

pub fn get_transmittance_to_top_atmosphere_boundary(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu: f32,
) -> Vec3 {
    let uv = get_transmittance_texture_uv_from_r_mu(atm, r, mu);
    transmittance.sample_2d(uv).truncate()
}

/// Transmittance between the point at radius `r` and the point `d` along direction `mu`
pub fn get_transmittance(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu: f32,
    d: f32,
    ray_r_mu_intersects_ground: bool,
) -> Vec3 {
    let r_d = clamp_radius(atm, (d * d + 2.0 * r * mu * d + r * r).sqrt());
    let mu_d = clamp_cosine((r * mu + d) / r_d);
    let ratio = if ray_r_mu_intersects_ground {
        get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r_d, -mu_d)
            / get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r, -mu)
    } else {
        get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r, mu)
            / get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r_d, mu_d)
    };
    ratio.min(Vec3::ONE)
}

/// Transmittance towards the sun, accounting for the fraction of its disc above the horizon
pub fn get_transmittance_to_sun(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu_s: f32,
) -> Vec3 {
    let sin_theta_h = atm.bottom_radius / r;
    let cos_theta_h = -safe_sqrt(1.0 - sin_theta_h * sin_theta_h);
    get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r, mu_s)
        * smoothstep(
            -sin_theta_h * atm.sun_angular_radius,
            sin_theta_h * atm.sun_angular_radius,
            mu_s - cos_theta_h,
        )
}

#[allow(clippy::too_many_arguments)]
fn compute_single_scattering_integrand(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    d: f32,
    ray_r_mu_intersects_ground: bool,
) -> (Vec3, Vec3) {
    let r_d = clamp_radius(atm, (d * d + 2.0 * r * mu * d + r * r).sqrt());
    let mu_s_d = clamp_cosine((r * mu_s + d * nu) / r_d);
    let t = get_transmittance(atm, transmittance, r, mu, d, ray_r_mu_intersects_ground)
        * get_transmittance_to_sun(atm, transmittance, r_d, mu_s_d);
    let altitude = r_d - atm.bottom_radius;
    (
        t * atm.rayleigh_density.density(altitude),
        t * atm.mie_density.density(altitude),
    )
}

/// Single Rayleigh and Mie scattering, without phase functions
pub fn compute_single_scattering(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    ray_r_mu_intersects_ground: bool,
) -> (Vec3, Vec3) {
    const SAMPLE_COUNT: u32 = 50;
    let dx = distance_to_nearest_atmosphere_boundary(atm, r, mu, ray_r_mu_intersects_ground)
        / SAMPLE_COUNT as f32;
    let mut rayleigh_sum = Vec3::ZERO;
    let mut mie_sum = Vec3::ZERO;
    for i in 0..=SAMPLE_COUNT {
        let d_i = i as f32 * dx;
        let (rayleigh_i, mie_i) = compute_single_scattering_integrand(
            atm,
            transmittance,
            r,
            mu,
            mu_s,
            nu,
            d_i,
            ray_r_mu_intersects_ground,
        );
        let weight_i = if i == 0 || i == SAMPLE_COUNT { 0.5 } else { 1.0 };
        rayleigh_sum += rayleigh_i * weight_i;
        mie_sum += mie_i * weight_i;
    }
    let solar_irradiance = Vec3::from(atm.solar_irradiance);
    (
        rayleigh_sum * dx * solar_irradiance * Vec3::from(atm.rayleigh_scattering),
        mie_sum * dx * solar_irradiance * Vec3::from(atm.mie_scattering),
    )
}

pub fn rayleigh_phase_function(nu: f32) -> f32 {
    let k = 3.0 / (16.0 * PI);
    k * (1.0 + nu * nu)
}

/// Cornette-Shanks phase function
pub fn mie_phase_function(g: f32, nu: f32) -> f32 {
    let k = 3.0 / (8.0 * PI) * (1.0 - g * g) / (2.0 + g * g);
    k * (1.0 + nu * nu) / (1.0 + g * g - 2.0 * g * nu).powf(1.5)
}

pub fn get_scattering_texture_uvwz_from_r_mu_mu_s_nu(
    atm: &Atmosphere,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    ray_r_mu_intersects_ground: bool,
) -> Vec4 {
    let [_, mu_s_size, mu_size, r_size] = atm.scattering_size;
    let h = horizon_distance(atm);
    let rho = safe_sqrt(r * r - atm.bottom_radius * atm.bottom_radius);
    let u_r = get_texture_coord_from_unit_range(rho / h, r_size);

    // Discriminant of the quadratic equation for the intersections of the ray (r,mu) with the
    // ground
    let r_mu = r * mu;
    let discriminant = r_mu * r_mu - r * r + atm.bottom_radius * atm.bottom_radius;
    let u_mu = if ray_r_mu_intersects_ground {
        let d = -r_mu - safe_sqrt(discriminant);
        let d_min = r - atm.bottom_radius;
        let d_max = rho;
        let x = if d_max == d_min {
            0.0
        } else {
            (d - d_min) / (d_max - d_min)
        };
        0.5 - 0.5 * get_texture_coord_from_unit_range(x, mu_size / 2)
    } else {
        let d = -r_mu + safe_sqrt(discriminant + h * h);
        let d_min = atm.top_radius - r;
        let d_max = rho + h;
        0.5 + 0.5 * get_texture_coord_from_unit_range((d - d_min) / (d_max - d_min), mu_size / 2)
    };

    let d = distance_to_top_atmosphere_boundary(atm, atm.bottom_radius, mu_s);
    let d_min = atm.top_radius - atm.bottom_radius;
    let d_max = h;
    let a = (d - d_min) / (d_max - d_min);
    let big_d = distance_to_top_atmosphere_boundary(atm, atm.bottom_radius, atm.mu_s_min);
    let big_a = (big_d - d_min) / (d_max - d_min);
    let u_mu_s =
        get_texture_coord_from_unit_range((1.0 - a / big_a).max(0.0) / (1.0 + a), mu_s_size);

    let u_nu = (nu + 1.0) / 2.0;
    Vec4::new(u_nu, u_mu_s, u_mu, u_r)
}

/// Inverse of `get_scattering_texture_uvwz_from_r_mu_mu_s_nu`
pub fn get_r_mu_mu_s_nu_from_scattering_texture_uvwz(
    atm: &Atmosphere,
    uvwz: Vec4,
) -> (f32, f32, f32, f32, bool) {
    let [_, mu_s_size, mu_size, r_size] = atm.scattering_size;
    let h = horizon_distance(atm);
    let rho = h * get_unit_range_from_texture_coord(uvwz.w, r_size);
    let r = (rho * rho + atm.bottom_radius * atm.bottom_radius).sqrt();

    let (mu, ray_r_mu_intersects_ground) = if uvwz.z < 0.5 {
        let d_min = r - atm.bottom_radius;
        let d_max = rho;
        let d = d_min
            + (d_max - d_min) * get_unit_range_from_texture_coord(1.0 - 2.0 * uvwz.z, mu_size / 2);
        let mu = if d == 0.0 {
            -1.0
        } else {
            clamp_cosine(-(rho * rho + d * d) / (2.0 * r * d))
        };
        (mu, true)
    } else {
        let d_min = atm.top_radius - r;
        let d_max = rho + h;
        let d = d_min
            + (d_max - d_min) * get_unit_range_from_texture_coord(2.0 * uvwz.z - 1.0, mu_size / 2);
        let mu = if d == 0.0 {
            1.0
        } else {
            clamp_cosine((h * h - rho * rho - d * d) / (2.0 * r * d))
        };
        (mu, false)
    };

    let x_mu_s = get_unit_range_from_texture_coord(uvwz.y, mu_s_size);
    let d_min = atm.top_radius - atm.bottom_radius;
    let d_max = h;
    let big_d = distance_to_top_atmosphere_boundary(atm, atm.bottom_radius, atm.mu_s_min);
    let big_a = (big_d - d_min) / (d_max - d_min);
    let a = (big_a - x_mu_s * big_a) / (1.0 + x_mu_s * big_a);
    let d = d_min + a.min(big_a) * (d_max - d_min);
    let mu_s = if d == 0.0 {
        1.0
    } else {
        clamp_cosine((h * h - d * d) / (2.0 * atm.bottom_radius * d))
    };

    let nu = clamp_cosine(uvwz.x * 2.0 - 1.0);
    (r, mu, mu_s, nu, ray_r_mu_intersects_ground)
}

/// Scattering parameters of a texel of a 4D table packed into 3D as (nu * mu_s, mu, r)
pub fn get_r_mu_mu_s_nu_from_scattering_texture_frag_coord(
    atm: &Atmosphere,
    frag_coord: Vec3,
) -> (f32, f32, f32, f32, bool) {
    let [nu_size, mu_s_size, mu_size, r_size] = atm.scattering_size;
    let size = Vec4::new(
        (nu_size - 1) as f32,
        mu_s_size as f32,
        mu_size as f32,
        r_size as f32,
    );
    let frag_coord_nu = (frag_coord.x / mu_s_size as f32).floor();
    let frag_coord_mu_s = frag_coord.x % mu_s_size as f32;
    let uvwz = Vec4::new(frag_coord_nu, frag_coord_mu_s, frag_coord.y, frag_coord.z) / size;
    let (r, mu, mu_s, nu, ray_r_mu_intersects_ground) =
        get_r_mu_mu_s_nu_from_scattering_texture_uvwz(atm, uvwz);
    // Clamp nu to its valid range of values, given mu and mu_s
    let spread = ((1.0 - mu * mu) * (1.0 - mu_s * mu_s)).sqrt();
    let nu = nu.clamp(mu * mu_s - spread, mu * mu_s + spread);
    (r, mu, mu_s, nu, ray_r_mu_intersects_ground)
}

pub fn compute_single_scattering_texture(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    frag_coord: Vec3,
) -> (Vec3, Vec3) {
    let (r, mu, mu_s, nu, ray_r_mu_intersects_ground) =
        get_r_mu_mu_s_nu_from_scattering_texture_frag_coord(atm, frag_coord);
    compute_single_scattering(atm, transmittance, r, mu, mu_s, nu, ray_r_mu_intersects_ground)
}

/// Look up a 4D scattering table, interpolating between the two nearest nu slices
pub fn get_scattering(
    atm: &Atmosphere,
    scattering: &dyn Sampler,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    ray_r_mu_intersects_ground: bool,
) -> Vec3 {
    let nu_size = atm.scattering_size[0] as f32;
    let uvwz =
        get_scattering_texture_uvwz_from_r_mu_mu_s_nu(atm, r, mu, mu_s, nu, ray_r_mu_intersects_ground);
    let tex_coord_x = uvwz.x * (nu_size - 1.0);
    let tex_x = tex_coord_x.floor();
    let lerp = tex_coord_x - tex_x;
    let uvw0 = Vec3::new((tex_x + uvwz.y) / nu_size, uvwz.z, uvwz.w);
    let uvw1 = Vec3::new((tex_x + 1.0 + uvwz.y) / nu_size, uvwz.z, uvwz.w);
    (scattering.sample(uvw0) * (1.0 - lerp) + scattering.sample(uvw1) * lerp).truncate()
}

/// Radiance of light scattered exactly `scattering_order` times
#[allow(clippy::too_many_arguments)]
pub fn get_scattering_of_order(
    atm: &Atmosphere,
    textures: &ScatteringTextures<'_>,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    ray_r_mu_intersects_ground: bool,
    scattering_order: i32,
) -> Vec3 {
    if scattering_order == 1 {
        let rayleigh = get_scattering(
            atm,
            textures.single_rayleigh,
            r,
            mu,
            mu_s,
            nu,
            ray_r_mu_intersects_ground,
        );
        let mie = get_scattering(
            atm,
            textures.single_mie,
            r,
            mu,
            mu_s,
            nu,
            ray_r_mu_intersects_ground,
        );
        rayleigh * rayleigh_phase_function(nu)
            + mie * mie_phase_function(atm.mie_phase_function_g, nu)
    } else {
        get_scattering(atm, textures.multiple, r, mu, mu_s, nu, ray_r_mu_intersects_ground)
    }
}

pub fn get_irradiance(atm: &Atmosphere, irradiance: &dyn Sampler, r: f32, mu_s: f32) -> Vec3 {
    let uv = get_irradiance_texture_uv_from_r_mu_s(atm, r, mu_s);
    irradiance.sample_2d(uv).truncate()
}

/// Radiance scattered towards direction `mu` at radius `r` by light that was scattered
/// `scattering_order - 1` times
#[allow(clippy::too_many_arguments)]
pub fn compute_scattering_density(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    textures: &ScatteringTextures<'_>,
    irradiance: &dyn Sampler,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    scattering_order: i32,
) -> Vec3 {
    // Compute unit direction vectors for the zenith, the view direction omega and the sun
    // direction omega_s, such that the cosine of the view-zenith angle is mu, the cosine of the
    // sun-zenith angle is mu_s, and the cosine of the view-sun angle is nu.
    let zenith_direction = Vec3::Z;
    let omega = Vec3::new((1.0 - mu * mu).sqrt(), 0.0, mu);
    let sun_dir_x = if omega.x == 0.0 {
        0.0
    } else {
        (nu - mu * mu_s) / omega.x
    };
    let sun_dir_y = (1.0 - sun_dir_x * sun_dir_x - mu_s * mu_s).max(0.0).sqrt();
    let omega_s = Vec3::new(sun_dir_x, sun_dir_y, mu_s);

    const SAMPLE_COUNT: u32 = 16;
    let dphi = PI / SAMPLE_COUNT as f32;
    let dtheta = PI / SAMPLE_COUNT as f32;
    let rayleigh_density = atm.rayleigh_density.density(r - atm.bottom_radius);
    let mie_density = atm.mie_density.density(r - atm.bottom_radius);
    let mut rayleigh_mie = Vec3::ZERO;

    // Nested loops for the integral over all the incident directions omega_i.
    for l in 0..SAMPLE_COUNT {
        let theta = (l as f32 + 0.5) * dtheta;
        let cos_theta = theta.cos();
        let sin_theta = theta.sin();
        let ray_r_theta_intersects_ground = ray_intersects_ground(atm, r, cos_theta);

        // The distance and transmittance to the ground only depend on theta, so we can compute
        // them in the outer loop for efficiency.
        let (distance_to_ground, transmittance_to_ground, ground_albedo) =
            if ray_r_theta_intersects_ground {
                let distance = distance_to_bottom_atmosphere_boundary(atm, r, cos_theta);
                (
                    distance,
                    get_transmittance(atm, transmittance, r, cos_theta, distance, true),
                    Vec3::from(atm.ground_albedo),
                )
            } else {
                (0.0, Vec3::ZERO, Vec3::ZERO)
            };

        for m in 0..2 * SAMPLE_COUNT {
            let phi = (m as f32 + 0.5) * dphi;
            let omega_i = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);
            let domega_i = dtheta * dphi * theta.sin();

            // The radiance L_i arriving from direction omega_i after n-1 bounces is the sum of
            // a term given by the precomputed scattering texture for the (n-1)-th order:
            let nu1 = omega_s.dot(omega_i);
            let mut incident_radiance = get_scattering_of_order(
                atm,
                textures,
                r,
                omega_i.z,
                mu_s,
                nu1,
                ray_r_theta_intersects_ground,
                scattering_order - 1,
            );

            // and of the contribution from the light paths with n-1 bounces and whose last
            // bounce is on the ground. This contribution is the product of the transmittance to
            // the ground, the ground albedo, the ground BRDF, and the irradiance received on the
            // ground after n-2 bounces.
            let ground_normal =
                (zenith_direction * r + omega_i * distance_to_ground).normalize();
            let ground_irradiance = get_irradiance(
                atm,
                irradiance,
                atm.bottom_radius,
                ground_normal.dot(omega_s),
            );
            incident_radiance +=
                transmittance_to_ground * ground_albedo * (1.0 / PI) * ground_irradiance;

            // The radiance finally scattered from direction omega_i towards direction -omega is
            // the product of the incident radiance, the scattering coefficient, and the phase
            // function for directions omega and omega_i (all this summed over all particle
            // types, i.e. Rayleigh and Mie).
            let nu2 = omega.dot(omega_i);
            rayleigh_mie += incident_radiance
                * (Vec3::from(atm.rayleigh_scattering)
                    * rayleigh_density
                    * rayleigh_phase_function(nu2)
                    + Vec3::from(atm.mie_scattering)
                        * mie_density
                        * mie_phase_function(atm.mie_phase_function_g, nu2))
                * domega_i;
        }
    }
    rayleigh_mie
}

/// Radiance scattered `n` times, integrated from the `n`th order scattering density
#[allow(clippy::too_many_arguments)]
pub fn compute_multiple_scattering(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    scattering_density: &dyn Sampler,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    ray_r_mu_intersects_ground: bool,
) -> Vec3 {
    const SAMPLE_COUNT: u32 = 50;
    let dx = distance_to_nearest_atmosphere_boundary(atm, r, mu, ray_r_mu_intersects_ground)
        / SAMPLE_COUNT as f32;
    let mut rayleigh_mie_sum = Vec3::ZERO;
    for i in 0..=SAMPLE_COUNT {
        let d_i = i as f32 * dx;

        // The r, mu and mu_s parameters at the current integration point (see the single
        // scattering section for a detailed explanation).
        let r_i = clamp_radius(atm, (d_i * d_i + 2.0 * r * mu * d_i + r * r).sqrt());
        let mu_i = clamp_cosine((r * mu + d_i) / r_i);
        let mu_s_i = clamp_cosine((r * mu_s + d_i * nu) / r_i);

        // The Rayleigh and Mie multiple scattering at the current sample point.
        let rayleigh_mie_i = get_scattering(
            atm,
            scattering_density,
            r_i,
            mu_i,
            mu_s_i,
            nu,
            ray_r_mu_intersects_ground,
        ) * get_transmittance(atm, transmittance, r, mu, d_i, ray_r_mu_intersects_ground)
            * dx;
        let weight_i = if i == 0 || i == SAMPLE_COUNT { 0.5 } else { 1.0 };
        rayleigh_mie_sum += rayleigh_mie_i * weight_i;
    }
    rayleigh_mie_sum
}

pub fn compute_direct_irradiance(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    r: f32,
    mu_s: f32,
) -> Vec3 {
    let alpha_s = atm.sun_angular_radius;
    // Approximate average of the cosine factor mu_s over the visible fraction of the Sun disc.
    let average_cosine_factor = if mu_s < -alpha_s {
        0.0
    } else if mu_s > alpha_s {
        mu_s
    } else {
        (mu_s + alpha_s) * (mu_s + alpha_s) / (4.0 * alpha_s)
    };
    Vec3::from(atm.solar_irradiance)
        * get_transmittance_to_top_atmosphere_boundary(atm, transmittance, r, mu_s)
        * average_cosine_factor
}

pub fn compute_indirect_irradiance(
    atm: &Atmosphere,
    textures: &ScatteringTextures<'_>,
    r: f32,
    mu_s: f32,
    scattering_order: i32,
) -> Vec3 {
    const SAMPLE_COUNT: u32 = 32;
    let dphi = PI / SAMPLE_COUNT as f32;
    let dtheta = PI / SAMPLE_COUNT as f32;

    let mut result = Vec3::ZERO;
    let omega_s = Vec3::new((1.0 - mu_s * mu_s).sqrt(), 0.0, mu_s);
    for j in 0..SAMPLE_COUNT / 2 {
        let theta = (j as f32 + 0.5) * dtheta;
        for i in 0..2 * SAMPLE_COUNT {
            let phi = (i as f32 + 0.5) * dphi;
            let omega = Vec3::new(
                phi.cos() * theta.sin(),
                phi.sin() * theta.sin(),
                theta.cos(),
            );
            let domega = dtheta * dphi * theta.sin();
            let nu = omega.dot(omega_s);
            result += get_scattering_of_order(
                atm,
                textures,
                r,
                omega.z,
                mu_s,
                nu,
                false,
                scattering_order,
            ) * omega.z
                * domega;
        }
    }
    result
}

pub fn get_irradiance_texture_uv_from_r_mu_s(atm: &Atmosphere, r: f32, mu_s: f32) -> Vec2 {
    let x_r = (r - atm.bottom_radius) / (atm.top_radius - atm.bottom_radius);
    let x_mu_s = mu_s * 0.5 + 0.5;
    Vec2::new(
        get_texture_coord_from_unit_range(x_mu_s, atm.irradiance_size[0]),
        get_texture_coord_from_unit_range(x_r, atm.irradiance_size[1]),
    )
}

pub fn get_r_mu_s_from_irradiance_texture_uv(atm: &Atmosphere, uv: Vec2) -> (f32, f32) {
    let x_mu_s = get_unit_range_from_texture_coord(uv.x, atm.irradiance_size[0]);
    let x_r = get_unit_range_from_texture_coord(uv.y, atm.irradiance_size[1]);
    let r = atm.bottom_radius + x_r * (atm.top_radius - atm.bottom_radius);
    let mu_s = clamp_cosine(2.0 * x_mu_s - 1.0);
    (r, mu_s)
}

fn irradiance_frag_uv(atm: &Atmosphere, frag_coord: Vec2) -> Vec2 {
    frag_coord
        / Vec2::new(
            atm.irradiance_size[0] as f32,
            atm.irradiance_size[1] as f32,
        )
}

pub fn compute_direct_irradiance_texture(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    frag_coord: Vec2,
) -> Vec3 {
    let (r, mu_s) = get_r_mu_s_from_irradiance_texture_uv(atm, irradiance_frag_uv(atm, frag_coord));
    compute_direct_irradiance(atm, transmittance, r, mu_s)
}

pub fn compute_indirect_irradiance_texture(
    atm: &Atmosphere,
    textures: &ScatteringTextures<'_>,
    frag_coord: Vec2,
    scattering_order: i32,
) -> Vec3 {
    let (r, mu_s) = get_r_mu_s_from_irradiance_texture_uv(atm, irradiance_frag_uv(atm, frag_coord));
    compute_indirect_irradiance(atm, textures, r, mu_s, scattering_order)
}

pub fn compute_scattering_density_texture(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    textures: &ScatteringTextures<'_>,
    irradiance: &dyn Sampler,
    frag_coord: Vec3,
    scattering_order: i32,
) -> Vec3 {
    let (r, mu, mu_s, nu, _) = get_r_mu_mu_s_nu_from_scattering_texture_frag_coord(atm, frag_coord);
    compute_scattering_density(
        atm,
        transmittance,
        textures,
        irradiance,
        r,
        mu,
        mu_s,
        nu,
        scattering_order,
    )
}

/// Multiple scattering for a texel, and the texel's nu
pub fn compute_multiple_scattering_texture(
    atm: &Atmosphere,
    transmittance: &dyn Sampler,
    scattering_density: &dyn Sampler,
    frag_coord: Vec3,
) -> (Vec3, f32) {
    let (r, mu, mu_s, nu, ray_r_mu_intersects_ground) =
        get_r_mu_mu_s_nu_from_scattering_texture_frag_coord(atm, frag_coord);
    (
        compute_multiple_scattering(
            atm,
            transmittance,
            scattering_density,
            r,
            mu,
            mu_s,
            nu,
            ray_r_mu_intersects_ground,
        ),
        nu,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::settings::Settings;
    use crate::spectrum::{LAMBDA_B, LAMBDA_G, LAMBDA_R};
    use approx::assert_relative_eq;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn earth() -> Atmosphere {
        let params = Parameters::from_settings(&Settings {
            use_half_precision: false,
            ..Settings::default()
        })
        .unwrap();
        Atmosphere::new(&params, [LAMBDA_R, LAMBDA_G, LAMBDA_B], IDENTITY)
    }

    /// Evaluates transmittance analytically instead of reading a table
    struct Exact<'a>(&'a Atmosphere);

    impl Sampler for Exact<'_> {
        fn sample(&self, coord: Vec3) -> Vec4 {
            let (r, mu) = get_r_mu_from_transmittance_texture_uv(self.0, coord.truncate());
            compute_transmittance_to_top_atmosphere_boundary(self.0, r, mu).extend(1.0)
        }
    }

    #[test]
    fn boundary_distances() {
        let atm = earth();
        let r = atm.bottom_radius;
        assert_relative_eq!(
            distance_to_top_atmosphere_boundary(&atm, r, 1.0),
            atm.top_radius - atm.bottom_radius,
            max_relative = 1e-4
        );
        assert!(ray_intersects_ground(&atm, atm.top_radius, -1.0));
        assert!(!ray_intersects_ground(&atm, atm.top_radius, 0.0));
        assert_relative_eq!(
            distance_to_bottom_atmosphere_boundary(&atm, atm.top_radius, -1.0),
            atm.top_radius - atm.bottom_radius,
            max_relative = 1e-4
        );
    }

    #[test]
    fn transmittance_uv_round_trips() {
        let atm = earth();
        for &(r, mu) in &[(6370.0, 0.5), (6400.0, -0.1), (6365.0, 0.9)] {
            let uv = get_transmittance_texture_uv_from_r_mu(&atm, r, mu);
            let (r2, mu2) = get_r_mu_from_transmittance_texture_uv(&atm, uv);
            assert_relative_eq!(r, r2, max_relative = 1e-4);
            assert_relative_eq!(mu, mu2, epsilon = 1e-2);
        }
    }

    #[test]
    fn irradiance_uv_round_trips() {
        let atm = earth();
        for &(r, mu_s) in &[(6360.0, -0.2), (6400.0, 0.3), (6420.0, 1.0)] {
            let uv = get_irradiance_texture_uv_from_r_mu_s(&atm, r, mu_s);
            let (r2, mu_s2) = get_r_mu_s_from_irradiance_texture_uv(&atm, uv);
            assert_relative_eq!(r, r2, max_relative = 1e-5);
            assert_relative_eq!(mu_s, mu_s2, epsilon = 1e-5);
        }
    }

    #[test]
    fn scattering_uvwz_round_trips() {
        let atm = earth();
        for &(r, mu, mu_s, nu) in &[(6370.0, 0.3, 0.5, 0.2), (6390.0, -0.2, 0.1, -0.4)] {
            let ground = ray_intersects_ground(&atm, r, mu);
            let uvwz = get_scattering_texture_uvwz_from_r_mu_mu_s_nu(&atm, r, mu, mu_s, nu, ground);
            let (r2, mu2, mu_s2, nu2, ground2) =
                get_r_mu_mu_s_nu_from_scattering_texture_uvwz(&atm, uvwz);
            assert_eq!(ground, ground2);
            assert_relative_eq!(r, r2, max_relative = 1e-4);
            assert_relative_eq!(mu, mu2, epsilon = 1e-2);
            assert_relative_eq!(mu_s, mu_s2, epsilon = 1e-2);
            assert_relative_eq!(nu, nu2, epsilon = 1e-5);
        }
    }

    #[test]
    fn transmittance_is_physical() {
        let atm = earth();
        let up = compute_transmittance_to_top_atmosphere_boundary(&atm, atm.bottom_radius, 1.0);
        let grazing =
            compute_transmittance_to_top_atmosphere_boundary(&atm, atm.bottom_radius, 0.05);
        for c in 0..3 {
            assert!(up[c] > 0.0 && up[c] <= 1.0);
            assert!(grazing[c] < up[c]);
        }
        // Blue is scattered more than red
        assert!(up.z < up.x);
        let top = compute_transmittance_to_top_atmosphere_boundary(&atm, atm.top_radius, 1.0);
        assert_eq!(top, Vec3::ONE);
    }

    #[test]
    fn phase_functions_integrate_to_one() {
        const N: u32 = 2000;
        let mut rayleigh = 0.0;
        let mut mie = 0.0;
        for i in 0..N {
            let nu = -1.0 + (i as f32 + 0.5) * 2.0 / N as f32;
            let dmu = 2.0 / N as f32;
            rayleigh += 2.0 * PI * rayleigh_phase_function(nu) * dmu;
            mie += 2.0 * PI * mie_phase_function(0.8, nu) * dmu;
        }
        assert_relative_eq!(rayleigh, 1.0, epsilon = 1e-3);
        assert_relative_eq!(mie, 1.0, epsilon = 2e-2);
    }

    #[test]
    fn direct_irradiance_follows_sun_elevation() {
        let atm = earth();
        let exact = Exact(&atm);
        let night = compute_direct_irradiance(&atm, &exact, atm.bottom_radius, -0.5);
        assert_eq!(night, Vec3::ZERO);
        let low = compute_direct_irradiance(&atm, &exact, atm.bottom_radius, 0.2);
        let high = compute_direct_irradiance(&atm, &exact, atm.bottom_radius, 0.9);
        assert!(high.x > low.x && low.x > 0.0);
        assert!(high.x <= atm.solar_irradiance[0] * 0.9);
    }

    #[test]
    fn single_scattering_is_positive() {
        let atm = earth();
        let exact = Exact(&atm);
        let (rayleigh, mie) =
            compute_single_scattering(&atm, &exact, atm.bottom_radius + 1.0, 0.5, 0.5, 0.9, false);
        assert!(rayleigh.min_element() > 0.0);
        assert!(mie.min_element() > 0.0);
        // Rayleigh scattering is strongest for blue
        assert!(rayleigh.z > rayleigh.x);
    }
}
