use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::density::{DensityProfile, DensityProfileLayer};
use crate::parameters::Parameters;
use crate::spectrum::interpolate;

/// Atmosphere description as read by every kernel, for one batch of three wavelengths
///
/// Lengths are in `length_unit_in_meters`, coefficients per length unit, and per-wavelength
/// quantities are sampled at the batch's wavelengths. The layout is std140-compatible.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct AtmosphereUniforms {
    pub solar_irradiance: [f32; 3],
    pub sun_angular_radius: f32,
    pub rayleigh_scattering: [f32; 3],
    pub bottom_radius: f32,
    pub mie_scattering: [f32; 3],
    pub top_radius: f32,
    pub mie_extinction: [f32; 3],
    pub mie_phase_function_g: f32,
    pub ground_albedo: [f32; 3],
    pub mu_s_min: f32,
    pub absorption_extinction: [f32; 3],
    pub _padding: f32,
    /// Columns of the matrix mapping radiance at the batch wavelengths to luminance
    pub luminance_from_radiance: [[f32; 4]; 3],

    /// (mu, r)
    pub transmittance_size: [u32; 2],
    /// (mu_s, r)
    pub irradiance_size: [u32; 2],
    /// (nu, mu_s, mu, r)
    pub scattering_size: [u32; 4],

    pub rayleigh_density: DensityProfileRaw,
    pub mie_density: DensityProfileRaw,
    pub absorption_density: DensityProfileRaw,
}

const_assert_eq!(std::mem::size_of::<AtmosphereUniforms>(), 368);

impl AtmosphereUniforms {
    /// Pack `params` for a batch at `lambdas` (nm)
    ///
    /// `luminance_from_radiance` is row-major: row `c` weighs the three wavelengths' radiance
    /// into output channel `c`.
    pub fn new(
        params: &Parameters,
        lambdas: [f64; 3],
        luminance_from_radiance: [[f64; 3]; 3],
    ) -> Self {
        let unit = params.length_unit_in_meters;
        let sample = |values: &[f64], scale: f64| {
            lambdas.map(|l| (interpolate(&params.wavelengths, values, l) * scale) as f32)
        };
        let mut columns = [[0.0; 4]; 3];
        for (i, column) in columns.iter_mut().enumerate() {
            for c in 0..3 {
                column[c] = luminance_from_radiance[c][i] as f32;
            }
        }
        let res = &params.resolution;
        Self {
            solar_irradiance: sample(&params.solar_irradiance, 1.0),
            sun_angular_radius: params.sun_angular_radius as f32,
            rayleigh_scattering: sample(&params.rayleigh_scattering, unit),
            bottom_radius: (params.bottom_radius / unit) as f32,
            mie_scattering: sample(&params.mie_scattering, unit),
            top_radius: (params.top_radius / unit) as f32,
            mie_extinction: sample(&params.mie_extinction, unit),
            mie_phase_function_g: params.mie_phase_function_g as f32,
            ground_albedo: sample(&params.ground_albedo, 1.0),
            mu_s_min: params.mu_s_min() as f32,
            absorption_extinction: sample(&params.absorption_extinction, unit),
            _padding: 0.0,
            luminance_from_radiance: columns,
            transmittance_size: [res.transmittance_mu_size, res.transmittance_r_size],
            irradiance_size: [res.irradiance_mu_s_size, res.irradiance_r_size],
            scattering_size: [
                res.scattering_nu_size,
                res.scattering_mu_s_size,
                res.scattering_mu_size,
                res.scattering_r_size,
            ],
            rayleigh_density: DensityProfileRaw::new(&params.rayleigh_density, unit),
            mie_density: DensityProfileRaw::new(&params.mie_density, unit),
            absorption_density: DensityProfileRaw::new(&params.absorption_density, unit),
        }
    }

    /// `luminance_from_radiance` as a row-major matrix
    pub fn luminance_matrix(&self) -> [[f32; 3]; 3] {
        let mut m = [[0.0; 3]; 3];
        for (c, row) in m.iter_mut().enumerate() {
            for (i, x) in row.iter_mut().enumerate() {
                *x = self.luminance_from_radiance[i][c];
            }
        }
        m
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DensityProfileRaw {
    pub layers: [DensityProfileLayerRaw; 2],
}

impl DensityProfileRaw {
    fn new(x: &DensityProfile, unit: f64) -> Self {
        let layers = x.layers();
        Self {
            layers: [
                DensityProfileLayerRaw::new(&layers[0], unit),
                DensityProfileLayerRaw::new(&layers[1], unit),
            ],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DensityProfileLayerRaw {
    pub width: f32,
    pub exp_term: f32,
    pub exp_scale: f32,
    pub linear_term: f32,
    pub constant_term: f32,
    pub _padding: [f32; 3],
}

const_assert_eq!(std::mem::size_of::<DensityProfileLayerRaw>(), 32);

impl DensityProfileLayerRaw {
    fn new(x: &DensityProfileLayer, unit: f64) -> Self {
        Self {
            width: (x.width / unit) as f32,
            exp_term: x.exp_term as f32,
            exp_scale: (x.exp_scale * unit) as f32,
            linear_term: (x.linear_term * unit) as f32,
            constant_term: x.constant_term as f32,
            _padding: [0.0; 3],
        }
    }

    /// Density at `altitude` in length units
    pub fn density(&self, altitude: f32) -> f32 {
        let density = self.exp_term * (self.exp_scale * altitude).exp()
            + self.linear_term * altitude
            + self.constant_term;
        density.clamp(0.0, 1.0)
    }
}

impl DensityProfileRaw {
    /// Density at `altitude` in length units
    pub fn density(&self, altitude: f32) -> f32 {
        if altitude < self.layers[0].width {
            self.layers[0].density(altitude)
        } else {
            self.layers[1].density(altitude)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::spectrum::{LAMBDA_B, LAMBDA_G, LAMBDA_R};
    use approx::assert_relative_eq;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn earth() -> AtmosphereUniforms {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        AtmosphereUniforms::new(&params, [LAMBDA_R, LAMBDA_G, LAMBDA_B], IDENTITY)
    }

    #[test]
    fn lengths_use_the_length_unit() {
        let u = earth();
        assert_eq!(u.bottom_radius, 6360.0);
        assert_eq!(u.top_radius, 6420.0);
        assert_relative_eq!(u.rayleigh_density.layers[1].exp_scale, -1.0 / 8.0);
        assert_relative_eq!(u.mie_density.layers[1].exp_scale, -1.0 / 1.2);
        assert_eq!(u.absorption_density.layers[0].width, 25.0);
        assert_relative_eq!(
            u.absorption_density.layers[0].linear_term,
            1.0 / 15.0,
            max_relative = 1e-6
        );
        // Density is unit-independent
        assert_relative_eq!(u.absorption_density.density(25.0), 1.0, epsilon = 1e-5);
        assert_relative_eq!(u.rayleigh_density.density(8.0), (-1.0f32).exp());
    }

    #[test]
    fn coefficients_are_per_length_unit() {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        let u = AtmosphereUniforms::new(&params, [LAMBDA_R, LAMBDA_G, LAMBDA_B], IDENTITY);
        // 550nm is on the grid
        assert_relative_eq!(
            u.rayleigh_scattering[1],
            (params.rayleigh_scattering[19] * 1000.0) as f32
        );
        assert_relative_eq!(
            u.mie_extinction[1],
            (params.mie_extinction[19] * 1000.0) as f32
        );
        assert_eq!(u.solar_irradiance, [1.5; 3]);
        assert_eq!(u.ground_albedo, [0.1f32; 3]);
        assert_relative_eq!(u.mu_s_min, 102.0f32.to_radians().cos(), epsilon = 1e-6);
    }

    #[test]
    fn interpolates_between_grid_points() {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        let u = AtmosphereUniforms::new(&params, [555.0, 555.0, 555.0], IDENTITY);
        let expected =
            (params.rayleigh_scattering[19] + params.rayleigh_scattering[20]) / 2.0 * 1000.0;
        assert_relative_eq!(u.rayleigh_scattering[0], expected as f32);
    }

    #[test]
    fn luminance_matrix_round_trips() {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let u = AtmosphereUniforms::new(&params, [LAMBDA_R, LAMBDA_G, LAMBDA_B], m);
        assert_eq!(u.luminance_from_radiance[0], [1.0, 4.0, 7.0, 0.0]);
        assert_eq!(
            u.luminance_matrix(),
            [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]
        );
    }

    #[test]
    fn sizes() {
        let u = earth();
        assert_eq!(u.transmittance_size, [256, 64]);
        assert_eq!(u.irradiance_size, [64, 16]);
        assert_eq!(u.scattering_size, [8, 32, 128, 32]);
        assert_eq!(bytemuck::bytes_of(&u).len(), 368);
    }
}
