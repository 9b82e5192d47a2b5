use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::backend::{Extent, Format};
use crate::density::{DensityProfile, DensityProfileLayer};
use crate::settings::Settings;
use crate::spectrum::{self, grid_index};
use crate::{Error, Result};

/// Wavelength independent solar irradiance "spectrum" (W.m^-2.nm^-1)
///
/// Not physically realistic, but convenient for comparisons with RGB renderers.
pub const CONSTANT_SOLAR_IRRADIANCE: f64 = 1.5;
/// Molecules per square meter in one Dobson unit
pub const DOBSON_UNIT: f64 = 2.687e20;
/// Maximum number density of ozone molecules (m^-3)
///
/// 300 Dobson units spread over the 15 km integral of the ozone density profile.
pub const MAX_OZONE_NUMBER_DENSITY: f64 = 300.0 * DOBSON_UNIT / 15000.0;

pub const SUN_ANGULAR_RADIUS: f64 = 0.00935 / 2.0;
pub const BOTTOM_RADIUS: f64 = 6_360_000.0;
pub const TOP_RADIUS: f64 = 6_420_000.0;
pub const LENGTH_UNIT_IN_METERS: f64 = 1000.0;
pub const RAYLEIGH: f64 = 1.24062e-6;
pub const RAYLEIGH_SCALE_HEIGHT: f64 = 8000.0;
pub const MIE_SCALE_HEIGHT: f64 = 1200.0;
pub const MIE_ANGSTROM_ALPHA: f64 = 0.0;
pub const MIE_ANGSTROM_BETA: f64 = 5.328e-3;
pub const MIE_SINGLE_SCATTERING_ALBEDO: f64 = 0.9;
pub const MIE_PHASE_FUNCTION_G: f64 = 0.8;
pub const GROUND_ALBEDO: f64 = 0.1;

/// How radiance is turned into luminance
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Luminance {
    /// Render radiance at three wavelengths directly
    None,
    /// Approximate luminance from three precomputed wavelengths
    Approximate,
    /// Precompute luminance from 15 wavelengths
    Precomputed,
}

impl Default for Luminance {
    fn default() -> Self {
        Luminance::Precomputed
    }
}

/// Dimensions of the look-up tables
///
/// - μ (mu): view angle from vertical
/// - μ_s (mu_s): sun angle from vertical
/// - r: distance from planet origin
/// - ν (nu): view angle from sun
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resolution {
    /// View angle precision for the transmittance look-up table
    pub transmittance_mu_size: u32,
    /// Height precision for the transmittance look-up table
    pub transmittance_r_size: u32,
    /// Height precision for the scattering look-up table
    pub scattering_r_size: u32,
    /// View angle precision for the scattering look-up table
    pub scattering_mu_size: u32,
    /// Sun angle precision for the scattering look-up table
    pub scattering_mu_s_size: u32,
    /// Sun azimuth precision for the scattering look-up table
    pub scattering_nu_size: u32,
    /// Sun angle precision for the lighting look-up table
    pub irradiance_mu_s_size: u32,
    /// Height precision for the lighting look-up table
    pub irradiance_r_size: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            transmittance_mu_size: 256,
            transmittance_r_size: 64,
            scattering_r_size: 32,
            scattering_mu_size: 128,
            scattering_mu_s_size: 32,
            scattering_nu_size: 8,
            irradiance_mu_s_size: 64,
            irradiance_r_size: 16,
        }
    }
}

impl Resolution {
    pub fn transmittance_extent(&self) -> Extent {
        Extent::d2(self.transmittance_mu_size, self.transmittance_r_size)
    }

    pub fn irradiance_extent(&self) -> Extent {
        Extent::d2(self.irradiance_mu_s_size, self.irradiance_r_size)
    }

    pub fn scattering_extent(&self) -> Extent {
        Extent::d3(
            self.scattering_nu_size * self.scattering_mu_s_size,
            self.scattering_mu_size,
            self.scattering_r_size,
        )
    }

    fn validate(&self) -> Result<()> {
        let sizes = [
            ("transmittance_mu_size", self.transmittance_mu_size),
            ("transmittance_r_size", self.transmittance_r_size),
            ("scattering_r_size", self.scattering_r_size),
            ("scattering_mu_size", self.scattering_mu_size),
            ("scattering_mu_s_size", self.scattering_mu_s_size),
            ("irradiance_mu_s_size", self.irradiance_mu_s_size),
            ("irradiance_r_size", self.irradiance_r_size),
        ];
        // Every texture coordinate mapping divides by (size - 1) or (size / 2 - 1) somewhere
        for &(name, size) in &sizes {
            if size < 2 {
                return Err(Error::validation(format_args!(
                    "{} must be at least 2, got {}",
                    name, size
                )));
            }
        }
        if self.scattering_mu_size % 2 != 0 || self.scattering_mu_size < 4 {
            return Err(Error::validation(format_args!(
                "scattering_mu_size must be even and at least 4, got {}",
                self.scattering_mu_size
            )));
        }
        if self.scattering_nu_size < 2 {
            return Err(Error::validation(format_args!(
                "scattering_nu_size must be at least 2, got {}",
                self.scattering_nu_size
            )));
        }

        let scattering_width = self
            .scattering_nu_size
            .checked_mul(self.scattering_mu_s_size)
            .ok_or_else(|| {
                Error::validation(format_args!(
                    "scattering_nu_size {} times scattering_mu_s_size {} overflows",
                    self.scattering_nu_size, self.scattering_mu_s_size
                ))
            })?;
        let tables = [
            (
                "transmittance",
                [self.transmittance_mu_size, self.transmittance_r_size, 1],
            ),
            (
                "scattering",
                [
                    scattering_width,
                    self.scattering_mu_size,
                    self.scattering_r_size,
                ],
            ),
            (
                "irradiance",
                [self.irradiance_mu_s_size, self.irradiance_r_size, 1],
            ),
        ];
        for (name, [w, h, d]) in tables {
            let texels = w.checked_mul(h).and_then(|x| x.checked_mul(d));
            if !matches!(texels, Some(n) if n <= MAX_TEXELS) {
                return Err(Error::validation(format_args!(
                    "{} table of {}x{}x{} exceeds {} texels",
                    name, w, h, d, MAX_TEXELS
                )));
            }
        }
        Ok(())
    }
}

/// Largest table accepted, in texels
pub const MAX_TEXELS: u32 = 1 << 26;

/// Physical description of an atmosphere
///
/// Lengths in meters, angles in radians, wavelengths in nanometers. Per-wavelength quantities are
/// sampled at `wavelengths`. Turned into `Parameters` by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphereModel {
    /// Sample wavelengths, increasing, on the 10 nm grid
    pub wavelengths: Vec<f64>,
    /// The solar irradiance at the top of the atmosphere.
    pub solar_irradiance: Vec<f64>,
    /// The sun's angular radius. Warning: the implementation uses approximations
    /// that are valid only if this angle is smaller than 0.1 radians.
    pub sun_angular_radius: f64,
    /// The distance between the planet center and the bottom of the atmosphere.
    pub bottom_radius: f64,
    /// The distance between the planet center and the top of the atmosphere.
    pub top_radius: f64,
    /// The density profile of air molecules, i.e. a function from altitude to
    /// dimensionless values between 0 (null density) and 1 (maximum density).
    pub rayleigh_density: DensityProfile,
    /// The scattering coefficient of air molecules at the altitude where their
    /// density is maximum (usually the bottom of the atmosphere), as a function of
    /// wavelength. The scattering coefficient at altitude h is equal to
    /// 'rayleigh_scattering' times 'rayleigh_density' at this altitude.
    pub rayleigh_scattering: Vec<f64>,
    /// The density profile of aerosols, i.e. a function from altitude to
    /// dimensionless values between 0 (null density) and 1 (maximum density).
    pub mie_density: DensityProfile,
    /// The scattering coefficient of aerosols at the altitude where their density
    /// is maximum (usually the bottom of the atmosphere), as a function of
    /// wavelength.
    pub mie_scattering: Vec<f64>,
    /// The extinction coefficient of aerosols at the altitude where their density
    /// is maximum (usually the bottom of the atmosphere), as a function of
    /// wavelength.
    pub mie_extinction: Vec<f64>,
    /// The asymetry parameter for the Cornette-Shanks phase function for the
    /// aerosols.
    pub mie_phase_function_g: f64,
    /// The density profile of air molecules that absorb light (e.g. ozone).
    pub absorption_density: DensityProfile,
    /// The extinction coefficient of molecules that absorb light (e.g. ozone) at
    /// the altitude where their density is maximum, as a function of wavelength.
    pub absorption_extinction: Vec<f64>,
    /// The average albedo of the ground.
    pub ground_albedo: Vec<f64>,
    /// The maximum Sun zenith angle for which atmospheric scattering must be
    /// precomputed (for maximum precision, use the smallest Sun zenith angle
    /// yielding negligible sky light radiance values. For instance, for the
    /// Earth case, 102 degrees is a good choice - yielding mu_s_min = -0.2).
    pub max_sun_zenith_angle: f64,
    /// The length unit used in the precomputed tables and by their consumers
    pub length_unit_in_meters: f64,
    /// Store every table in 16-bit floats
    pub half_precision: bool,
    /// Pack single Mie scattering into the alpha channel of the scattering table
    pub combine_scattering_textures: bool,
    pub luminance: Luminance,
    pub resolution: Resolution,
}

/// Validated, immutable atmosphere description
///
/// Dereferences to the underlying `AtmosphereModel` for read access.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    model: AtmosphereModel,
}

impl Deref for Parameters {
    type Target = AtmosphereModel;
    fn deref(&self) -> &AtmosphereModel {
        &self.model
    }
}

impl Parameters {
    /// Validate `model`
    pub fn new(model: AtmosphereModel) -> Result<Self> {
        validate(&model)?;
        Ok(Self { model })
    }

    /// Earth's atmosphere, configured by `settings`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(earth(settings)?)
    }

    pub fn model(&self) -> &AtmosphereModel {
        &self.model
    }

    pub fn into_model(self) -> AtmosphereModel {
        self.model
    }

    /// Cosine of the maximum sun zenith angle
    pub fn mu_s_min(&self) -> f64 {
        self.max_sun_zenith_angle.cos()
    }

    /// Number of wavelengths the scattering tables are integrated over
    pub fn num_precomputed_wavelengths(&self) -> usize {
        match self.luminance {
            Luminance::Precomputed => 15,
            Luminance::None | Luminance::Approximate => 3,
        }
    }

    /// Storage format shared by every table of a precomputation
    pub fn format(&self) -> Format {
        if self.half_precision {
            Format::Rgba16Float
        } else {
            Format::Rgba32Float
        }
    }
}

fn earth(settings: &Settings) -> Result<AtmosphereModel> {
    let max_sun_zenith_angle = if settings.use_half_precision {
        102.0f64
    } else {
        120.0f64
    }
    .to_radians();

    // Linear increase from 0 to 1 between 10 and 25km, decrease back to 0 by 40km
    let absorption_density = DensityProfile::new(vec![
        DensityProfileLayer::new("absorption0", 25000.0, 0.0, 0.0, 1.0 / 15000.0, -2.0 / 3.0),
        DensityProfileLayer::new("absorption1", 0.0, 0.0, 0.0, -1.0 / 15000.0, 8.0 / 3.0),
    ])?;

    let mut model = AtmosphereModel {
        wavelengths: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        solar_irradiance: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        sun_angular_radius: SUN_ANGULAR_RADIUS,
        bottom_radius: BOTTOM_RADIUS,
        top_radius: TOP_RADIUS,
        rayleigh_density: DensityProfile::single(DensityProfileLayer::exponential(
            "rayleigh",
            RAYLEIGH_SCALE_HEIGHT,
        )),
        rayleigh_scattering: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        mie_density: DensityProfile::single(DensityProfileLayer::exponential(
            "mie",
            MIE_SCALE_HEIGHT,
        )),
        mie_scattering: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        mie_extinction: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        mie_phase_function_g: MIE_PHASE_FUNCTION_G,
        absorption_density,
        absorption_extinction: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        ground_albedo: Vec::with_capacity(spectrum::SAMPLE_COUNT),
        max_sun_zenith_angle,
        length_unit_in_meters: LENGTH_UNIT_IN_METERS,
        half_precision: settings.use_half_precision,
        combine_scattering_textures: settings.use_combined_textures,
        luminance: settings.luminance,
        resolution: settings.resolution,
    };

    for l in spectrum::wavelengths() {
        // micrometers
        let lambda = f64::from(l) * 1e-3;
        let mie = MIE_ANGSTROM_BETA / MIE_SCALE_HEIGHT * lambda.powf(-MIE_ANGSTROM_ALPHA);
        model.wavelengths.push(f64::from(l));
        model.solar_irradiance.push(if settings.use_constant_solar_spectrum {
            CONSTANT_SOLAR_IRRADIANCE
        } else {
            spectrum::solar_irradiance(l)?
        });
        model.rayleigh_scattering.push(RAYLEIGH * lambda.powi(-4));
        model.mie_scattering.push(mie * MIE_SINGLE_SCATTERING_ALBEDO);
        model.mie_extinction.push(mie);
        model.absorption_extinction.push(if settings.use_ozone {
            MAX_OZONE_NUMBER_DENSITY * spectrum::ozone_cross_section(l)?
        } else {
            0.0
        });
        model.ground_albedo.push(GROUND_ALBEDO);
    }

    Ok(model)
}

fn validate(model: &AtmosphereModel) -> Result<()> {
    if model.wavelengths.is_empty() {
        return Err(Error::validation("no wavelengths given"));
    }
    for &w in &model.wavelengths {
        if grid_index(w).is_none() {
            return Err(Error::validation(format_args!(
                "wavelength {} nm is not on the {}..={} nm grid with {} nm spacing",
                w,
                spectrum::LAMBDA_MIN,
                spectrum::LAMBDA_MAX,
                spectrum::LAMBDA_STEP
            )));
        }
    }
    if model.wavelengths.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::validation("wavelengths are not strictly increasing"));
    }

    let n = model.wavelengths.len();
    let spectra: [(&str, &[f64]); 7] = [
        ("solar_irradiance", &model.solar_irradiance),
        ("rayleigh_scattering", &model.rayleigh_scattering),
        ("mie_scattering", &model.mie_scattering),
        ("mie_extinction", &model.mie_extinction),
        ("absorption_extinction", &model.absorption_extinction),
        ("ground_albedo", &model.ground_albedo),
        ("wavelengths", &model.wavelengths),
    ];
    for &(name, values) in &spectra {
        if values.len() != n {
            return Err(Error::validation(format_args!(
                "{} has {} samples but there are {} wavelengths",
                name,
                values.len(),
                n
            )));
        }
        if values.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(Error::validation(format_args!(
                "{} contains negative or non-finite samples",
                name
            )));
        }
    }

    if !(model.bottom_radius > 0.0 && model.top_radius > model.bottom_radius)
        || !model.top_radius.is_finite()
    {
        return Err(Error::validation(format_args!(
            "radii must satisfy 0 < bottom ({}) < top ({})",
            model.bottom_radius, model.top_radius
        )));
    }
    if !(model.sun_angular_radius > 0.0 && model.sun_angular_radius < 0.1) {
        return Err(Error::validation(format_args!(
            "sun angular radius {} is outside (0, 0.1)",
            model.sun_angular_radius
        )));
    }
    if !(model.mie_phase_function_g > -1.0 && model.mie_phase_function_g < 1.0) {
        return Err(Error::validation(format_args!(
            "mie phase function g {} is outside (-1, 1)",
            model.mie_phase_function_g
        )));
    }
    // The sun must be able to reach the horizon
    if !(model.max_sun_zenith_angle >= std::f64::consts::FRAC_PI_2
        && model.max_sun_zenith_angle <= std::f64::consts::PI)
    {
        return Err(Error::validation(format_args!(
            "max sun zenith angle {} is outside [pi/2, pi]",
            model.max_sun_zenith_angle
        )));
    }
    if !(model.length_unit_in_meters > 0.0 && model.length_unit_in_meters.is_finite()) {
        return Err(Error::validation(format_args!(
            "length unit {} is not positive",
            model.length_unit_in_meters
        )));
    }

    model.rayleigh_density.validate()?;
    model.mie_density.validate()?;
    model.absorption_density.validate()?;
    model.resolution.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn all_settings() -> Vec<Settings> {
        let mut out = Vec::new();
        for &constant in &[false, true] {
            for &ozone in &[false, true] {
                for &half in &[false, true] {
                    for &combined in &[false, true] {
                        for &luminance in &[
                            Luminance::None,
                            Luminance::Approximate,
                            Luminance::Precomputed,
                        ] {
                            out.push(Settings {
                                use_constant_solar_spectrum: constant,
                                use_ozone: ozone,
                                use_half_precision: half,
                                use_combined_textures: combined,
                                luminance,
                                ..Settings::default()
                            });
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn spectra_share_the_grid() {
        for settings in all_settings() {
            let params = Parameters::from_settings(&settings).unwrap();
            let n = params.wavelengths.len();
            assert_eq!(n, spectrum::SAMPLE_COUNT);
            assert_eq!(params.solar_irradiance.len(), n);
            assert_eq!(params.rayleigh_scattering.len(), n);
            assert_eq!(params.mie_scattering.len(), n);
            assert_eq!(params.mie_extinction.len(), n);
            assert_eq!(params.absorption_extinction.len(), n);
            assert_eq!(params.ground_albedo.len(), n);
        }
    }

    #[test]
    fn sun_zenith_limit_follows_precision() {
        let half = Parameters::from_settings(&Settings {
            use_half_precision: true,
            ..Settings::default()
        })
        .unwrap();
        assert_eq!(half.max_sun_zenith_angle, 102.0f64.to_radians());
        assert_eq!(half.format(), Format::Rgba16Float);

        let full = Parameters::from_settings(&Settings {
            use_half_precision: false,
            ..Settings::default()
        })
        .unwrap();
        assert_eq!(full.max_sun_zenith_angle, 120.0f64.to_radians());
        assert_eq!(full.format(), Format::Rgba32Float);
        assert_relative_eq!(full.mu_s_min(), -0.5, epsilon = 1e-12);
    }

    #[test]
    fn ozone_toggle() {
        let without = Parameters::from_settings(&Settings {
            use_ozone: false,
            ..Settings::default()
        })
        .unwrap();
        assert!(without.absorption_extinction.iter().all(|&x| x == 0.0));

        let with = Parameters::from_settings(&Settings {
            use_ozone: true,
            ..Settings::default()
        })
        .unwrap();
        assert!(with.absorption_extinction.iter().all(|&x| x > 0.0));
        // 600nm, near the Chappuis band peak
        assert_relative_eq!(
            with.absorption_extinction[24],
            MAX_OZONE_NUMBER_DENSITY * 5.019e-25,
            max_relative = 1e-12
        );
    }

    #[test]
    fn constant_solar_spectrum() {
        let params = Parameters::from_settings(&Settings {
            use_constant_solar_spectrum: true,
            ..Settings::default()
        })
        .unwrap();
        assert!(params.solar_irradiance.iter().all(|&x| x == 1.5));

        let params = Parameters::from_settings(&Settings {
            use_constant_solar_spectrum: false,
            ..Settings::default()
        })
        .unwrap();
        assert_eq!(params.solar_irradiance[0], 1.11776);
    }

    #[test]
    fn scattering_coefficients() {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        // 550nm
        let i = 19;
        assert_eq!(params.wavelengths[i], 550.0);
        assert_relative_eq!(
            params.rayleigh_scattering[i],
            1.24062e-6 / 0.55f64.powi(4),
            max_relative = 1e-12
        );
        assert_relative_eq!(params.mie_extinction[i], 5.328e-3 / 1200.0);
        assert_relative_eq!(params.mie_scattering[i], 0.9 * 5.328e-3 / 1200.0);
        assert!(params.ground_albedo.iter().all(|&x| x == 0.1));
        assert!(params
            .rayleigh_scattering
            .windows(2)
            .all(|w| w[1] < w[0]));
    }

    #[test]
    fn building_is_deterministic() {
        let settings = Settings::default();
        assert_eq!(
            Parameters::from_settings(&settings).unwrap(),
            Parameters::from_settings(&settings).unwrap()
        );
    }

    #[test]
    fn rejects_mismatched_spectra() {
        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.mie_scattering.pop();
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_misaligned_wavelengths() {
        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.wavelengths[3] += 5.0;
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));

        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.wavelengths.swap(0, 1);
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.top_radius = model.bottom_radius;
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));

        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.resolution.scattering_mu_size = 7;
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));
    }

    #[test]
    fn sun_must_reach_the_horizon() {
        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.max_sun_zenith_angle = 1e-6;
        assert!(matches!(Parameters::new(model), Err(Error::Validation(_))));

        let mut model = Parameters::from_settings(&Settings::default())
            .unwrap()
            .into_model();
        model.max_sun_zenith_angle = std::f64::consts::FRAC_PI_2;
        let params = Parameters::new(model).unwrap();
        assert!(params.mu_s_min().abs() < 1e-12);
    }

    #[test]
    fn rejects_oversized_tables() {
        let overflowing = Settings {
            resolution: Resolution {
                scattering_nu_size: 70000,
                scattering_mu_s_size: 70000,
                ..Resolution::default()
            },
            ..Settings::default()
        };
        assert!(matches!(
            Parameters::from_settings(&overflowing),
            Err(Error::Validation(_))
        ));

        let huge = Settings {
            resolution: Resolution {
                scattering_r_size: 4096,
                ..Resolution::default()
            },
            ..Settings::default()
        };
        assert!(matches!(
            Parameters::from_settings(&huge),
            Err(Error::Validation(_))
        ));

        let default = Resolution::default();
        let texels = default.scattering_extent().texel_count();
        assert!(texels <= MAX_TEXELS as usize);
    }
}
