//! Tabulated spectral data on the 10 nm wavelength grid

use crate::{Error, Result};

/// Shortest tabulated wavelength (nm)
pub const LAMBDA_MIN: u32 = 360;
/// Longest tabulated wavelength (nm)
pub const LAMBDA_MAX: u32 = 830;
/// Spacing of the tabulated wavelengths (nm)
pub const LAMBDA_STEP: u32 = 10;
/// Number of samples on the grid, endpoints included
pub const SAMPLE_COUNT: usize = ((LAMBDA_MAX - LAMBDA_MIN) / LAMBDA_STEP) as usize + 1;

/// Wavelengths used to represent red, green and blue when only three are precomputed (nm)
pub const LAMBDA_R: f64 = 680.0;
pub const LAMBDA_G: f64 = 550.0;
pub const LAMBDA_B: f64 = 440.0;

// "Reference Solar Spectral Irradiance: ASTM G-173", ETR column, averaged over each 10 nm bin.
// W.m^-2.nm^-1
const SOLAR_IRRADIANCE: [f64; SAMPLE_COUNT] = [
    1.11776, 1.14259, 1.01249, 1.14716, 1.72765, 1.73054, 1.6887, 1.61253, 1.91198, 2.03474,
    2.02042, 2.02212, 1.93377, 1.95809, 1.91686, 1.8298, 1.8685, 1.8931, 1.85149, 1.8504, 1.8341,
    1.8345, 1.8147, 1.78158, 1.7533, 1.6965, 1.68194, 1.64654, 1.6048, 1.52143, 1.55622, 1.5113,
    1.474, 1.4482, 1.41018, 1.36775, 1.34188, 1.31429, 1.28303, 1.26758, 1.2367, 1.2082, 1.18737,
    1.14683, 1.12362, 1.1058, 1.07124, 1.04992,
];

// Ozone absorption cross section at 233K (IUP Bremen reference spectra), averaged over each
// 10 nm bin. m^2
const OZONE_CROSS_SECTION: [f64; SAMPLE_COUNT] = [
    1.18e-27, 2.182e-28, 2.818e-28, 6.636e-28, 1.527e-27, 2.763e-27, 5.52e-27, 8.451e-27,
    1.582e-26, 2.316e-26, 3.669e-26, 4.924e-26, 7.752e-26, 9.016e-26, 1.48e-25, 1.602e-25,
    2.139e-25, 2.755e-25, 3.091e-25, 3.5e-25, 4.266e-25, 4.672e-25, 4.398e-25, 4.701e-25,
    5.019e-25, 4.305e-25, 3.74e-25, 3.215e-25, 2.662e-25, 2.238e-25, 1.852e-25, 1.473e-25,
    1.209e-25, 9.423e-26, 7.455e-26, 6.566e-26, 5.105e-26, 4.15e-26, 4.228e-26, 3.237e-26,
    2.451e-26, 2.801e-26, 2.534e-26, 1.624e-26, 1.465e-26, 2.078e-26, 1.383e-26, 7.105e-27,
];

/// Iterate over the tabulated wavelengths in increasing order (nm)
pub fn wavelengths() -> impl Iterator<Item = u32> + Clone {
    (LAMBDA_MIN..=LAMBDA_MAX).step_by(LAMBDA_STEP as usize)
}

/// Position of `wavelength` on the grid, if it lies exactly on a grid point
pub fn grid_index(wavelength: f64) -> Option<usize> {
    let offset = (wavelength - f64::from(LAMBDA_MIN)) / f64::from(LAMBDA_STEP);
    if offset.is_nan() || offset < 0.0 || offset.fract() != 0.0 {
        return None;
    }
    let index = offset as usize;
    if index < SAMPLE_COUNT {
        Some(index)
    } else {
        None
    }
}

fn lookup(table: &[f64; SAMPLE_COUNT], wavelength: u32) -> Result<f64> {
    grid_index(f64::from(wavelength))
        .map(|i| table[i])
        .ok_or_else(|| {
            Error::validation(format_args!(
                "wavelength {} nm is not on the {}..={} nm grid with {} nm spacing",
                wavelength, LAMBDA_MIN, LAMBDA_MAX, LAMBDA_STEP
            ))
        })
}

/// Extraterrestrial solar irradiance at `wavelength` (W.m^-2.nm^-1)
pub fn solar_irradiance(wavelength: u32) -> Result<f64> {
    lookup(&SOLAR_IRRADIANCE, wavelength)
}

/// Ozone absorption cross section at `wavelength` (m^2)
pub fn ozone_cross_section(wavelength: u32) -> Result<f64> {
    lookup(&OZONE_CROSS_SECTION, wavelength)
}

/// Linearly interpolate a sampled function of wavelength
///
/// Values outside the sampled range clamp to the nearest endpoint. `wavelengths` must be sorted
/// and as long as `values`.
pub fn interpolate(wavelengths: &[f64], values: &[f64], wavelength: f64) -> f64 {
    debug_assert_eq!(wavelengths.len(), values.len());
    if wavelengths.is_empty() {
        return 0.0;
    }
    if wavelength < wavelengths[0] {
        return values[0];
    }
    for (w, v) in wavelengths.windows(2).zip(values.windows(2)) {
        if wavelength < w[1] {
            let u = (wavelength - w[0]) / (w[1] - w[0]);
            return v[0] * (1.0 - u) + v[1] * u;
        }
    }
    values[values.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_visible_range() {
        let grid = wavelengths().collect::<Vec<_>>();
        assert_eq!(grid.len(), SAMPLE_COUNT);
        assert_eq!(grid.first(), Some(&360));
        assert_eq!(grid.last(), Some(&830));
        assert!(grid.windows(2).all(|w| w[1] - w[0] == LAMBDA_STEP));
    }

    #[test]
    fn table_endpoints() {
        assert_eq!(solar_irradiance(360).unwrap(), 1.11776);
        assert_eq!(solar_irradiance(830).unwrap(), 1.04992);
        assert_eq!(ozone_cross_section(360).unwrap(), 1.18e-27);
        assert_eq!(ozone_cross_section(830).unwrap(), 7.105e-27);
        assert_eq!(ozone_cross_section(600).unwrap(), 5.019e-25);
    }

    #[test]
    fn off_grid_lookups_fail() {
        for &bad in &[355, 365, 840, 0, 831] {
            assert!(matches!(solar_irradiance(bad), Err(Error::Validation(_))));
            assert!(matches!(ozone_cross_section(bad), Err(Error::Validation(_))));
        }
        assert_eq!(grid_index(359.5), None);
        assert_eq!(grid_index(f64::NAN), None);
        assert_eq!(grid_index(550.0), Some(19));
    }

    #[test]
    fn interpolation_clamps_and_blends() {
        let w = [400.0, 500.0, 600.0];
        let v = [1.0, 3.0, 2.0];
        assert_eq!(interpolate(&w, &v, 300.0), 1.0);
        assert_eq!(interpolate(&w, &v, 450.0), 2.0);
        assert_eq!(interpolate(&w, &v, 550.0), 2.5);
        assert_eq!(interpolate(&w, &v, 600.0), 2.0);
        assert_eq!(interpolate(&w, &v, 900.0), 2.0);
    }
}
