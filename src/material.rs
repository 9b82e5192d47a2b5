//! What a sky material needs to consume the precomputed tables

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::backend::TextureData;
use crate::color;
use crate::parameters::{Luminance, Parameters};
use crate::precompute::Textures;
use crate::settings::Settings;
use crate::spectrum::{interpolate, LAMBDA_B, LAMBDA_G, LAMBDA_R};

pub const TRANSMITTANCE_TEXTURE: &str = "transmittance_texture";
pub const SCATTERING_TEXTURE: &str = "scattering_texture";
pub const SINGLE_MIE_SCATTERING_TEXTURE: &str = "single_mie_scattering_texture";
pub const IRRADIANCE_TEXTURE: &str = "irradiance_texture";

/// Scalar uniforms of a sky material
///
/// Lengths are in the atmosphere's length unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialBindings {
    pub exposure: f32,
    /// Planet center relative to a viewer on the ground at the origin
    pub earth_center: [f32; 3],
    /// Tangent and cosine of the sun's angular radius
    pub sun_size: [f32; 2],
    pub white_point: [f32; 3],
    pub sky_spectral_radiance_to_luminance: [f32; 3],
    pub sun_spectral_radiance_to_luminance: [f32; 3],
    /// At (680, 550, 440) nm
    pub solar_irradiance: [f32; 3],
    pub bottom_radius: f32,
    pub top_radius: f32,
    pub mu_s_min: f32,
    pub mie_phase_function_g: f32,
    /// Whether single Mie scattering must be reconstructed from the scattering table's alpha
    pub combine_scattering_textures: bool,
    pub units_to_atmosphere_boundary: f32,
    pub tonemap: bool,
    pub gamma_correction: bool,
    pub clamp_view_vector: bool,
    pub color_multiplier: [f32; 4],
}

impl MaterialBindings {
    pub fn new(settings: &Settings, params: &Parameters) -> Self {
        let unit = params.length_unit_in_meters;
        // Luminance values are much larger than radiance
        let exposure = match params.luminance {
            Luminance::None => settings.exposure,
            Luminance::Approximate | Luminance::Precomputed => settings.exposure * 1e-5,
        };
        let white_point = if settings.do_white_balance {
            color::normalize_white_point(color::white_point(params))
        } else {
            [1.0; 3]
        };
        let solar_irradiance = [LAMBDA_R, LAMBDA_G, LAMBDA_B]
            .map(|l| interpolate(&params.wavelengths, &params.solar_irradiance, l) as f32);
        Self {
            exposure,
            earth_center: [0.0, (-params.bottom_radius / unit) as f32, 0.0],
            sun_size: [
                params.sun_angular_radius.tan() as f32,
                params.sun_angular_radius.cos() as f32,
            ],
            white_point: white_point.map(|x| x as f32),
            sky_spectral_radiance_to_luminance: color::sky_spectral_radiance_to_luminance(params)
                .map(|x| x as f32),
            sun_spectral_radiance_to_luminance: color::sun_spectral_radiance_to_luminance(params)
                .map(|x| x as f32),
            solar_irradiance,
            bottom_radius: (params.bottom_radius / unit) as f32,
            top_radius: (params.top_radius / unit) as f32,
            mu_s_min: params.mu_s_min() as f32,
            mie_phase_function_g: params.mie_phase_function_g as f32,
            combine_scattering_textures: params.combine_scattering_textures,
            units_to_atmosphere_boundary: settings.units_to_atmosphere_boundary,
            tonemap: settings.tonemap,
            gamma_correction: settings.gamma_correction,
            clamp_view_vector: settings.clamp_view_vector,
            color_multiplier: settings.color_multiplier,
        }
    }
}

/// `textures` keyed by material slot
///
/// When single Mie scattering is combined into the scattering table, a black 1x1x1 volume
/// stands in for it so every slot is populated.
pub fn texture_bindings(textures: &Textures) -> [(&'static str, Cow<'_, TextureData>); 4] {
    let single_mie = match textures.single_mie_scattering {
        Some(ref x) => Cow::Borrowed(x),
        None => Cow::Owned(TextureData::black_3d(textures.scattering.format)),
    };
    [
        (TRANSMITTANCE_TEXTURE, Cow::Borrowed(&textures.transmittance)),
        (SCATTERING_TEXTURE, Cow::Borrowed(&textures.scattering)),
        (SINGLE_MIE_SCATTERING_TEXTURE, single_mie),
        (IRRADIANCE_TEXTURE, Cow::Borrowed(&textures.irradiance)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Extent, Format};
    use approx::assert_relative_eq;

    fn bindings(settings: &Settings) -> MaterialBindings {
        MaterialBindings::new(settings, &Parameters::from_settings(settings).unwrap())
    }

    #[test]
    fn exposure_tracks_luminance_mode() {
        let radiance = bindings(&Settings {
            luminance: Luminance::None,
            ..Settings::default()
        });
        assert_eq!(radiance.exposure, 10.0);
        let luminance = bindings(&Settings::default());
        assert_relative_eq!(luminance.exposure, 1e-4);
    }

    #[test]
    fn geometry() {
        let b = bindings(&Settings::default());
        assert_eq!(b.earth_center, [0.0, -6360.0, 0.0]);
        assert_relative_eq!(b.sun_size[0], (0.00935f32 / 2.0).tan());
        assert_relative_eq!(b.sun_size[1], (0.00935f32 / 2.0).cos());
        assert_eq!(b.bottom_radius, 6360.0);
        assert_eq!(b.top_radius, 6420.0);
        assert_eq!(b.solar_irradiance, [1.5; 3]);
    }

    #[test]
    fn presentation_options_pass_through() {
        let b = bindings(&Settings::default());
        assert_eq!(b.units_to_atmosphere_boundary, 6000.0);
        assert!(!b.tonemap && !b.gamma_correction && b.clamp_view_vector);
        assert_eq!(b.color_multiplier, [1.0; 4]);

        let b = bindings(&Settings {
            units_to_atmosphere_boundary: 120.0,
            tonemap: true,
            gamma_correction: true,
            clamp_view_vector: false,
            color_multiplier: [0.5, 0.25, 1.0, 1.0],
            ..Settings::default()
        });
        assert_eq!(b.units_to_atmosphere_boundary, 120.0);
        assert!(b.tonemap && b.gamma_correction && !b.clamp_view_vector);
        assert_eq!(b.color_multiplier, [0.5, 0.25, 1.0, 1.0]);
    }

    #[test]
    fn white_balance() {
        let b = bindings(&Settings::default());
        let mean = b.white_point.iter().sum::<f32>() / 3.0;
        assert_relative_eq!(mean, 1.0, epsilon = 1e-6);

        let b = bindings(&Settings {
            do_white_balance: false,
            ..Settings::default()
        });
        assert_eq!(b.white_point, [1.0; 3]);
    }

    #[test]
    fn combined_tables_get_a_placeholder() {
        let plane = TextureData {
            extent: Extent::d2(1, 1),
            format: Format::Rgba16Float,
            texels: vec![[1.0; 4]],
        };
        let textures = Textures {
            transmittance: plane.clone(),
            scattering: plane.clone(),
            single_mie_scattering: None,
            irradiance: plane,
        };
        let slots = texture_bindings(&textures);
        let names = slots.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "transmittance_texture",
                "scattering_texture",
                "single_mie_scattering_texture",
                "irradiance_texture"
            ]
        );
        assert_eq!(*slots[2].1, TextureData::black_3d(Format::Rgba16Float));
        assert_eq!(slots[2].1.extent, Extent::d3(1, 1, 1));
    }
}
