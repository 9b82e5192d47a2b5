use crate::{Error, Result};

/// Number of layers a `DensityProfile` is stored with
pub const LAYER_COUNT: usize = 2;

/// A single layer of a `DensityProfile`
///
/// An atmosphere layer of width 'width', and whose density is defined as
///   'exp_term' * exp('exp_scale' * h) + 'linear_term' * h + 'constant_term',
/// clamped to [0,1], and where h is the altitude.
///
/// Lengths in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityProfileLayer {
    pub name: String,
    pub width: f64,
    pub exp_term: f64,
    pub exp_scale: f64,
    pub linear_term: f64,
    pub constant_term: f64,
}

impl DensityProfileLayer {
    pub fn new(
        name: impl Into<String>,
        width: f64,
        exp_term: f64,
        exp_scale: f64,
        linear_term: f64,
        constant_term: f64,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            exp_term,
            exp_scale,
            linear_term,
            constant_term,
        }
    }

    /// A layer of zero width and zero density, used to pad single-layer profiles
    pub fn empty() -> Self {
        Self::new("", 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// A layer decaying exponentially with altitude, equal to 1 at the ground
    pub fn exponential(name: impl Into<String>, scale_height: f64) -> Self {
        Self::new(name, 0.0, 1.0, -1.0 / scale_height, 0.0, 0.0)
    }

    /// Density within this layer at `altitude`
    pub fn density(&self, altitude: f64) -> f64 {
        let density = self.exp_term * (self.exp_scale * altitude).exp()
            + self.linear_term * altitude
            + self.constant_term;
        density.max(0.0).min(1.0)
    }

    fn is_finite(&self) -> bool {
        [
            self.width,
            self.exp_term,
            self.exp_scale,
            self.linear_term,
            self.constant_term,
        ]
        .iter()
        .all(|x| x.is_finite())
    }
}

/// A collection of `DensityProfileLayer`s
///
/// An atmosphere density profile made of several layers on top of each other
/// (from bottom to top). The width of the last layer is ignored, i.e. it always
/// extend to the top atmosphere boundary. The profile values vary between 0
/// (null density) to 1 (maximum density).
#[derive(Debug, Clone, PartialEq)]
pub struct DensityProfile {
    layers: [DensityProfileLayer; LAYER_COUNT],
}

impl DensityProfile {
    /// Build a profile from one or two layers, bottom first
    ///
    /// A single layer is padded with an empty layer below it so that it covers every altitude.
    pub fn new(layers: Vec<DensityProfileLayer>) -> Result<Self> {
        let mut layers = layers.into_iter();
        let profile = match (layers.next(), layers.next(), layers.next()) {
            (Some(only), None, None) => Self {
                layers: [DensityProfileLayer::empty(), only],
            },
            (Some(bottom), Some(top), None) => Self {
                layers: [bottom, top],
            },
            (None, _, _) => {
                return Err(Error::validation("density profile has no layers"));
            }
            _ => {
                return Err(Error::validation(format_args!(
                    "density profile has more than {} layers",
                    LAYER_COUNT
                )));
            }
        };
        profile.validate()?;
        Ok(profile)
    }

    /// A profile made of one layer
    pub fn single(layer: DensityProfileLayer) -> Self {
        Self {
            layers: [DensityProfileLayer::empty(), layer],
        }
    }

    pub fn layers(&self) -> &[DensityProfileLayer; LAYER_COUNT] {
        &self.layers
    }

    /// Density at `altitude` above the ground
    pub fn density(&self, altitude: f64) -> f64 {
        if altitude < self.layers[0].width {
            self.layers[0].density(altitude)
        } else {
            self.layers[1].density(altitude)
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for layer in &self.layers {
            if !layer.is_finite() {
                return Err(Error::validation(format_args!(
                    "density layer {:?} has non-finite terms",
                    layer.name
                )));
            }
            if layer.width < 0.0 {
                return Err(Error::validation(format_args!(
                    "density layer {:?} has negative width {}",
                    layer.name, layer.width
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ozone() -> DensityProfile {
        DensityProfile::new(vec![
            DensityProfileLayer::new("absorption0", 25000.0, 0.0, 0.0, 1.0 / 15000.0, -2.0 / 3.0),
            DensityProfileLayer::new("absorption1", 0.0, 0.0, 0.0, -1.0 / 15000.0, 8.0 / 3.0),
        ])
        .unwrap()
    }

    #[test]
    fn rayleigh_decays_from_unity() {
        let profile = DensityProfile::single(DensityProfileLayer::exponential("rayleigh", 8000.0));
        assert_eq!(profile.density(0.0), 1.0);
        let mut previous = profile.density(0.0);
        for altitude in (1..=60).map(|x| f64::from(x) * 1000.0) {
            let density = profile.density(altitude);
            assert!(density < previous, "not decreasing at {}", altitude);
            previous = density;
        }
        assert_relative_eq!(profile.density(8000.0), (-1.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn ozone_is_a_tent() {
        let profile = ozone();
        assert_eq!(profile.density(0.0), 0.0);
        assert_relative_eq!(profile.density(10_000.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(profile.density(17_500.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(profile.density(25_000.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(profile.density(32_500.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(profile.density(40_000.0), 0.0, epsilon = 1e-12);
        assert_eq!(profile.density(60_000.0), 0.0);
    }

    #[test]
    fn density_is_clamped() {
        let layer = DensityProfileLayer::new("steep", 0.0, 3.0, 0.0, 0.0, 0.0);
        assert_eq!(layer.density(100.0), 1.0);
        let layer = DensityProfileLayer::new("negative", 0.0, 0.0, 0.0, 0.0, -1.0);
        assert_eq!(layer.density(100.0), 0.0);
    }

    #[test]
    fn single_layer_is_padded() {
        let profile = DensityProfile::new(vec![DensityProfileLayer::exponential("mie", 1200.0)])
            .unwrap();
        assert_eq!(profile.layers()[0], DensityProfileLayer::empty());
        assert_eq!(profile.layers()[1].name, "mie");
    }

    #[test]
    fn malformed_profiles_are_rejected() {
        assert!(matches!(
            DensityProfile::new(Vec::new()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            DensityProfile::new(vec![DensityProfileLayer::empty(); 3]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            DensityProfile::new(vec![
                DensityProfileLayer::new("bad", -1.0, 0.0, 0.0, 0.0, 0.0),
                DensityProfileLayer::empty(),
            ]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            DensityProfile::new(vec![DensityProfileLayer::new(
                "nan",
                0.0,
                f64::NAN,
                0.0,
                0.0,
                0.0
            )]),
            Err(Error::Validation(_))
        ));
    }
}
