//! User-facing configuration with RON persistence

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::parameters::{Luminance, Resolution};

/// Errors that can occur when loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings: {0}")]
    ReadError(#[source] std::io::Error),

    /// Failed to write the settings file to disk.
    #[error("failed to write settings: {0}")]
    WriteError(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse settings: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Failed to serialize settings to RON.
    #[error("failed to serialize settings: {0}")]
    SerializeError(#[source] ron::Error),
}

/// Options controlling how Earth's atmosphere is precomputed and presented
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Use a flat 1.5 W.m^-2.nm^-1 solar spectrum instead of the measured one
    pub use_constant_solar_spectrum: bool,
    /// Include ozone absorption
    pub use_ozone: bool,
    /// Pack single Mie scattering into the alpha channel of the scattering table
    pub use_combined_textures: bool,
    /// Store tables as 16-bit floats
    pub use_half_precision: bool,
    /// Divide rendered radiance by the sun's white point
    pub do_white_balance: bool,
    pub luminance: Luminance,
    /// Exposure applied by the sky shader, before the luminance scaling
    pub exposure: f32,
    pub resolution: Resolution,
    /// Scene units from the viewer to the edge of the sky dome
    pub units_to_atmosphere_boundary: f32,
    /// Apply the shader's tone mapping
    pub tonemap: bool,
    pub gamma_correction: bool,
    /// Keep view rays at or above the horizon
    pub clamp_view_vector: bool,
    /// RGBA tint applied to the final color
    pub color_multiplier: [f32; 4],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_constant_solar_spectrum: true,
            use_ozone: true,
            use_combined_textures: false,
            use_half_precision: true,
            do_white_balance: true,
            luminance: Luminance::Precomputed,
            exposure: 10.0,
            resolution: Resolution::default(),
            units_to_atmosphere_boundary: 6000.0,
            tonemap: false,
            gamma_correction: false,
            clamp_view_vector: true,
            color_multiplier: [1.0; 4],
        }
    }
}

impl Settings {
    /// Load settings from a RON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
        let settings = ron::from_str(&contents).map_err(SettingsError::ParseError)?;
        log::info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write settings to `path` as RON, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(SettingsError::WriteError)?;
        }
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(SettingsError::SerializeError)?;
        std::fs::write(path, serialized).map_err(SettingsError::WriteError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.use_constant_solar_spectrum);
        assert!(settings.use_ozone);
        assert!(!settings.use_combined_textures);
        assert!(settings.use_half_precision);
        assert!(settings.do_white_balance);
        assert_eq!(settings.luminance, Luminance::Precomputed);
        assert_eq!(settings.exposure, 10.0);
        assert_eq!(settings.resolution.scattering_extent().width, 256);
        assert_eq!(settings.units_to_atmosphere_boundary, 6000.0);
        assert!(!settings.tonemap);
        assert!(!settings.gamma_correction);
        assert!(settings.clamp_view_vector);
        assert_eq!(settings.color_multiplier, [1.0; 4]);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings: Settings = ron::from_str("(use_ozone: false, luminance: Approximate)").unwrap();
        assert!(!settings.use_ozone);
        assert_eq!(settings.luminance, Luminance::Approximate);
        assert_eq!(settings.exposure, 10.0);
        assert_eq!(settings.resolution, Resolution::default());
        assert!(settings.clamp_view_vector);
        assert_eq!(settings.units_to_atmosphere_boundary, 6000.0);

        let settings: Settings =
            ron::from_str("(resolution: (scattering_nu_size: 4))").unwrap();
        assert_eq!(settings.resolution.scattering_nu_size, 4);
        assert_eq!(settings.resolution.scattering_mu_size, 128);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sky.ron");
        let settings = Settings {
            use_combined_textures: true,
            luminance: Luminance::Approximate,
            exposure: 2.5,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn load_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");
        assert!(matches!(
            Settings::load(&missing),
            Err(SettingsError::ReadError(_))
        ));

        let garbage = dir.path().join("garbage.ron");
        std::fs::write(&garbage, "(use_ozone: maybe)").unwrap();
        assert!(matches!(
            Settings::load(&garbage),
            Err(SettingsError::ParseError(_))
        ));
    }
}
