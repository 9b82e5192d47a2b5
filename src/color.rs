//! Conversions from spectral quantities to linear sRGB

use crate::parameters::{Luminance, Parameters};
use crate::spectrum::{interpolate, LAMBDA_B, LAMBDA_G, LAMBDA_R};

/// Luminous efficacy of monochromatic 555 nm light (lm/W)
pub const MAX_LUMINOUS_EFFICACY: f64 = 683.0;

/// Row-major CIE XYZ to linear sRGB (D65) conversion
pub const XYZ_TO_SRGB: [f64; 9] = [
    3.2406, -1.5372, -0.4986, //
    -0.9689, 1.8758, 0.0415, //
    0.0557, -0.2040, 1.0570,
];

const CIE_LAMBDA_MIN: f64 = 360.0;
const CIE_LAMBDA_MAX: f64 = 830.0;
const CIE_LAMBDA_STEP: f64 = 5.0;

// CIE 1931 2 degree standard observer: wavelength (nm), x_bar, y_bar, z_bar
#[rustfmt::skip]
const CIE_2_DEG_COLOR_MATCHING_FUNCTIONS: [[f64; 4]; 95] = [
    [360.0, 0.000129900000, 0.000003917000, 0.000606100000],
    [365.0, 0.000232100000, 0.000006965000, 0.001086000000],
    [370.0, 0.000414900000, 0.000012390000, 0.001946000000],
    [375.0, 0.000741600000, 0.000022020000, 0.003486000000],
    [380.0, 0.001368000000, 0.000039000000, 0.006450001000],
    [385.0, 0.002236000000, 0.000064000000, 0.010549990000],
    [390.0, 0.004243000000, 0.000120000000, 0.020050010000],
    [395.0, 0.007650000000, 0.000217000000, 0.036210000000],
    [400.0, 0.014310000000, 0.000396000000, 0.067850010000],
    [405.0, 0.023190000000, 0.000640000000, 0.110200000000],
    [410.0, 0.043510000000, 0.001210000000, 0.207400000000],
    [415.0, 0.077630000000, 0.002180000000, 0.371300000000],
    [420.0, 0.134380000000, 0.004000000000, 0.645600000000],
    [425.0, 0.214770000000, 0.007300000000, 1.039050100000],
    [430.0, 0.283900000000, 0.011600000000, 1.385600000000],
    [435.0, 0.328500000000, 0.016840000000, 1.622960000000],
    [440.0, 0.348280000000, 0.023000000000, 1.747060000000],
    [445.0, 0.348060000000, 0.029800000000, 1.782600000000],
    [450.0, 0.336200000000, 0.038000000000, 1.772110000000],
    [455.0, 0.318700000000, 0.048000000000, 1.744100000000],
    [460.0, 0.290800000000, 0.060000000000, 1.669200000000],
    [465.0, 0.251100000000, 0.073900000000, 1.528100000000],
    [470.0, 0.195360000000, 0.090980000000, 1.287640000000],
    [475.0, 0.142100000000, 0.112600000000, 1.041900000000],
    [480.0, 0.095640000000, 0.139020000000, 0.812950100000],
    [485.0, 0.057950010000, 0.169300000000, 0.616200000000],
    [490.0, 0.032010000000, 0.208020000000, 0.465180000000],
    [495.0, 0.014700000000, 0.258600000000, 0.353300000000],
    [500.0, 0.004900000000, 0.323000000000, 0.272000000000],
    [505.0, 0.002400000000, 0.407300000000, 0.212300000000],
    [510.0, 0.009300000000, 0.503000000000, 0.158200000000],
    [515.0, 0.029100000000, 0.608200000000, 0.111700000000],
    [520.0, 0.063270000000, 0.710000000000, 0.078249990000],
    [525.0, 0.109600000000, 0.793200000000, 0.057250010000],
    [530.0, 0.165500000000, 0.862000000000, 0.042160000000],
    [535.0, 0.225749900000, 0.914850100000, 0.029840000000],
    [540.0, 0.290400000000, 0.954000000000, 0.020300000000],
    [545.0, 0.359700000000, 0.980300000000, 0.013400000000],
    [550.0, 0.433449900000, 0.994950100000, 0.008749999000],
    [555.0, 0.512050100000, 1.000000000000, 0.005749999000],
    [560.0, 0.594500000000, 0.995000000000, 0.003900000000],
    [565.0, 0.678400000000, 0.978600000000, 0.002749999000],
    [570.0, 0.762100000000, 0.952000000000, 0.002100000000],
    [575.0, 0.842500000000, 0.915400000000, 0.001800000000],
    [580.0, 0.916300000000, 0.870000000000, 0.001650001000],
    [585.0, 0.978600000000, 0.816300000000, 0.001400000000],
    [590.0, 1.026300000000, 0.757000000000, 0.001100000000],
    [595.0, 1.056700000000, 0.694900000000, 0.001000000000],
    [600.0, 1.062200000000, 0.631000000000, 0.000800000000],
    [605.0, 1.045600000000, 0.566800000000, 0.000600000000],
    [610.0, 1.002600000000, 0.503000000000, 0.000340000000],
    [615.0, 0.938400000000, 0.441200000000, 0.000240000000],
    [620.0, 0.854449900000, 0.381000000000, 0.000190000000],
    [625.0, 0.751400000000, 0.321000000000, 0.000100000000],
    [630.0, 0.642400000000, 0.265000000000, 0.000049999990],
    [635.0, 0.541900000000, 0.217000000000, 0.000030000000],
    [640.0, 0.447900000000, 0.175000000000, 0.000020000000],
    [645.0, 0.360800000000, 0.138200000000, 0.000010000000],
    [650.0, 0.283500000000, 0.107000000000, 0.000000000000],
    [655.0, 0.218700000000, 0.081600000000, 0.000000000000],
    [660.0, 0.164900000000, 0.061000000000, 0.000000000000],
    [665.0, 0.121200000000, 0.044580000000, 0.000000000000],
    [670.0, 0.087400000000, 0.032000000000, 0.000000000000],
    [675.0, 0.063600000000, 0.023200000000, 0.000000000000],
    [680.0, 0.046770000000, 0.017000000000, 0.000000000000],
    [685.0, 0.032900000000, 0.011920000000, 0.000000000000],
    [690.0, 0.022700000000, 0.008210000000, 0.000000000000],
    [695.0, 0.015840000000, 0.005723000000, 0.000000000000],
    [700.0, 0.011359160000, 0.004102000000, 0.000000000000],
    [705.0, 0.008110916000, 0.002929000000, 0.000000000000],
    [710.0, 0.005790346000, 0.002091000000, 0.000000000000],
    [715.0, 0.004109457000, 0.001484000000, 0.000000000000],
    [720.0, 0.002899327000, 0.001047000000, 0.000000000000],
    [725.0, 0.002049190000, 0.000740000000, 0.000000000000],
    [730.0, 0.001439971000, 0.000520000000, 0.000000000000],
    [735.0, 0.000999949300, 0.000361100000, 0.000000000000],
    [740.0, 0.000690078600, 0.000249200000, 0.000000000000],
    [745.0, 0.000476021300, 0.000171900000, 0.000000000000],
    [750.0, 0.000332301100, 0.000120000000, 0.000000000000],
    [755.0, 0.000234826100, 0.000084800000, 0.000000000000],
    [760.0, 0.000166150500, 0.000060000000, 0.000000000000],
    [765.0, 0.000117413000, 0.000042400000, 0.000000000000],
    [770.0, 0.000083075270, 0.000030000000, 0.000000000000],
    [775.0, 0.000058706520, 0.000021200000, 0.000000000000],
    [780.0, 0.000041509940, 0.000014990000, 0.000000000000],
    [785.0, 0.000029353260, 0.000010600000, 0.000000000000],
    [790.0, 0.000020673830, 0.000007465700, 0.000000000000],
    [795.0, 0.000014559770, 0.000005257800, 0.000000000000],
    [800.0, 0.000010253980, 0.000003702900, 0.000000000000],
    [805.0, 0.000007221456, 0.000002607800, 0.000000000000],
    [810.0, 0.000005085868, 0.000001836600, 0.000000000000],
    [815.0, 0.000003581652, 0.000001293400, 0.000000000000],
    [820.0, 0.000002522525, 0.000000910930, 0.000000000000],
    [825.0, 0.000001776509, 0.000000641530, 0.000000000000],
    [830.0, 0.000001251141, 0.000000451810, 0.000000000000],
];

/// CIE 1931 2° color matching functions (x̄, ȳ, z̄) at `wavelength`
///
/// Zero at and beyond the ends of the tabulated 360-830 nm range.
pub fn cie_color_matching_function(wavelength: f64) -> [f64; 3] {
    if !(wavelength > CIE_LAMBDA_MIN && wavelength < CIE_LAMBDA_MAX) {
        return [0.0; 3];
    }
    let u = (wavelength - CIE_LAMBDA_MIN) / CIE_LAMBDA_STEP;
    let row = u.floor() as usize;
    let u = u - row as f64;
    let (a, b) = (
        &CIE_2_DEG_COLOR_MATCHING_FUNCTIONS[row],
        &CIE_2_DEG_COLOR_MATCHING_FUNCTIONS[row + 1],
    );
    let mut out = [0.0; 3];
    for (c, x) in out.iter_mut().enumerate() {
        *x = a[c + 1] * (1.0 - u) + b[c + 1] * u;
    }
    out
}

fn xyz_to_srgb(xyz: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (c, x) in out.iter_mut().enumerate() {
        *x = XYZ_TO_SRGB[3 * c] * xyz[0]
            + XYZ_TO_SRGB[3 * c + 1] * xyz[1]
            + XYZ_TO_SRGB[3 * c + 2] * xyz[2];
    }
    out
}

/// Integer wavelengths integrated over, in 1 nm steps
fn integration_range() -> impl Iterator<Item = f64> {
    (CIE_LAMBDA_MIN as u32..CIE_LAMBDA_MAX as u32).map(f64::from)
}

/// Linear sRGB luminance of a spectral radiance sampled at `wavelengths`
pub fn convert_spectrum_to_linear_srgb(wavelengths: &[f64], spectrum: &[f64]) -> [f64; 3] {
    let mut xyz = [0.0; 3];
    for lambda in integration_range() {
        let value = interpolate(wavelengths, spectrum, lambda);
        let cmf = cie_color_matching_function(lambda);
        for (acc, c) in xyz.iter_mut().zip(cmf.iter()) {
            *acc += c * value;
        }
    }
    let mut rgb = xyz_to_srgb(xyz);
    for x in &mut rgb {
        *x *= MAX_LUMINOUS_EFFICACY;
    }
    rgb
}

/// Color of the sun seen from outside the atmosphere
pub fn white_point(params: &Parameters) -> [f64; 3] {
    convert_spectrum_to_linear_srgb(&params.wavelengths, &params.solar_irradiance)
}

/// Scale `white_point` so that its channels average to 1
pub fn normalize_white_point(white_point: [f64; 3]) -> [f64; 3] {
    let mean = (white_point[0] + white_point[1] + white_point[2]) / 3.0;
    [
        white_point[0] / mean,
        white_point[1] / mean,
        white_point[2] / mean,
    ]
}

/// Constants converting radiance at (680, 550, 440) nm into luminance
///
/// The result depends on how the spectrum away from the three sampled wavelengths is
/// extrapolated: as the solar spectrum scaled by `(λ / λ_rgb)^lambda_power`.
pub fn spectral_radiance_to_luminance_factors(
    wavelengths: &[f64],
    solar_irradiance: &[f64],
    lambda_power: f64,
) -> [f64; 3] {
    let lambdas = [LAMBDA_R, LAMBDA_G, LAMBDA_B];
    let solar = lambdas.map(|l| interpolate(wavelengths, solar_irradiance, l));
    let mut k = [0.0; 3];
    for lambda in integration_range() {
        let rgb_bar = xyz_to_srgb(cie_color_matching_function(lambda));
        let irradiance = interpolate(wavelengths, solar_irradiance, lambda);
        for c in 0..3 {
            k[c] += rgb_bar[c] * irradiance / solar[c] * (lambda / lambdas[c]).powf(lambda_power);
        }
    }
    k.map(|x| x * MAX_LUMINOUS_EFFICACY)
}

/// Converts sky radiance read from the scattering table into luminance
pub fn sky_spectral_radiance_to_luminance(params: &Parameters) -> [f64; 3] {
    match params.luminance {
        // The scattering tables already hold luminance, up to the efficacy constant
        Luminance::Precomputed => [MAX_LUMINOUS_EFFICACY; 3],
        Luminance::None | Luminance::Approximate => {
            spectral_radiance_to_luminance_factors(&params.wavelengths, &params.solar_irradiance, -3.0)
        }
    }
}

/// Converts solar radiance at (680, 550, 440) nm into luminance
pub fn sun_spectral_radiance_to_luminance(params: &Parameters) -> [f64; 3] {
    spectral_radiance_to_luminance_factors(&params.wavelengths, &params.solar_irradiance, 0.0)
}

/// Matrix converting radiance at three wavelengths into linear sRGB luminance
///
/// Row `c` holds the contribution of each of `lambdas` to output channel `c`, each wavelength
/// standing in for a band `dlambda` nm wide. Excludes `MAX_LUMINOUS_EFFICACY`, which is applied
/// when rendering.
pub fn luminance_from_radiance(lambdas: [f64; 3], dlambda: f64) -> [[f64; 3]; 3] {
    let coeffs = lambdas.map(|l| xyz_to_srgb(cie_color_matching_function(l)));
    let mut m = [[0.0; 3]; 3];
    for (c, row) in m.iter_mut().enumerate() {
        for (i, x) in row.iter_mut().enumerate() {
            *x = coeffs[i][c] * dlambda;
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use approx::assert_relative_eq;

    #[test]
    fn table_is_regular() {
        for (i, row) in CIE_2_DEG_COLOR_MATCHING_FUNCTIONS.iter().enumerate() {
            assert_eq!(row[0], CIE_LAMBDA_MIN + CIE_LAMBDA_STEP * i as f64);
        }
    }

    #[test]
    fn matching_functions() {
        assert_eq!(cie_color_matching_function(360.0), [0.0; 3]);
        assert_eq!(cie_color_matching_function(830.0), [0.0; 3]);
        assert_eq!(cie_color_matching_function(900.0), [0.0; 3]);
        assert_eq!(cie_color_matching_function(555.0)[1], 1.0);
        let mid = cie_color_matching_function(552.5);
        assert_relative_eq!(mid[1], (0.9949501 + 1.0) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn flat_spectrum_white_point_is_reproducible() {
        let wavelengths = crate::spectrum::wavelengths()
            .map(f64::from)
            .collect::<Vec<_>>();
        let spectrum = vec![1.5; wavelengths.len()];
        let a = convert_spectrum_to_linear_srgb(&wavelengths, &spectrum);
        let b = convert_spectrum_to_linear_srgb(&wavelengths, &spectrum);
        assert_eq!(a, b);
        assert!(a.iter().all(|&x| x > 0.0));

        let normalized = normalize_white_point(a);
        assert_relative_eq!(
            normalized.iter().sum::<f64>() / 3.0,
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn white_point_scales_linearly() {
        let wavelengths = [400.0, 500.0, 600.0, 700.0];
        let a = convert_spectrum_to_linear_srgb(&wavelengths, &[1.0; 4]);
        let b = convert_spectrum_to_linear_srgb(&wavelengths, &[2.0; 4]);
        for c in 0..3 {
            assert_relative_eq!(b[c], 2.0 * a[c], max_relative = 1e-12);
        }
        assert_eq!(normalize_white_point(a), normalize_white_point(b));
    }

    #[test]
    fn earth_white_point() {
        let params = Parameters::from_settings(&Settings::default()).unwrap();
        let wp = white_point(&params);
        assert!(wp.iter().all(|&x| x > 0.0));
        let measured = Parameters::from_settings(&Settings {
            use_constant_solar_spectrum: false,
            ..Settings::default()
        })
        .unwrap();
        // The measured spectrum is bluer than a flat one
        let flat = normalize_white_point(wp);
        let real = normalize_white_point(white_point(&measured));
        assert!(real[2] / real[0] > flat[2] / flat[0]);
    }

    #[test]
    fn luminance_factors() {
        let params = Parameters::from_settings(&Settings {
            luminance: Luminance::Approximate,
            ..Settings::default()
        })
        .unwrap();
        let sky = sky_spectral_radiance_to_luminance(&params);
        let sun = sun_spectral_radiance_to_luminance(&params);
        assert!(sky.iter().chain(sun.iter()).all(|&x| x > 0.0));
        // With a constant solar spectrum, sun factors are the white point divided by 1.5
        let wp = white_point(&params);
        for c in 0..3 {
            assert_relative_eq!(sun[c] * 1.5, wp[c], max_relative = 1e-9);
        }

        let params = Parameters::from_settings(&Settings::default()).unwrap();
        assert_eq!(
            sky_spectral_radiance_to_luminance(&params),
            [MAX_LUMINOUS_EFFICACY; 3]
        );
    }

    #[test]
    fn luminance_matrix_rows_are_channels() {
        let m = luminance_from_radiance([440.0, 555.0, 680.0], 2.0);
        let green = xyz_to_srgb(cie_color_matching_function(555.0));
        assert_relative_eq!(m[0][1], green[0] * 2.0);
        assert_relative_eq!(m[1][1], green[1] * 2.0);
        assert_relative_eq!(m[2][1], green[2] * 2.0);
    }
}
