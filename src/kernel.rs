//! Names and binding layouts of the precomputation kernels
//!
//! Every backend exposes the same six kernels with the same slots. Output slots are listed in
//! the order of the `blend` vector's components: a non-zero component makes the kernel add its
//! result to the output's previous contents instead of overwriting them.

/// What a binding slot holds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotKind {
    /// `AtmosphereUniforms`
    Uniforms,
    /// A `Value::Vec4`
    Blend,
    /// A `Value::Int`
    Order,
    /// A texture read with linear filtering
    Sampled,
    /// A texture written by the kernel
    Storage,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: &'static str,
    pub kind: SlotKind,
    /// Dispatching with an optional slot unbound is permitted
    pub optional: bool,
}

const fn slot(name: &'static str, kind: SlotKind) -> Slot {
    Slot {
        name,
        kind,
        optional: false,
    }
}

const fn optional(name: &'static str, kind: SlotKind) -> Slot {
    Slot {
        name,
        kind,
        optional: true,
    }
}

pub const ATMOSPHERE: &str = "atmosphere";
pub const BLEND: &str = "blend";
pub const SCATTERING_ORDER: &str = "scattering_order";

pub const TRANSMITTANCE_TEXTURE: &str = "transmittance_texture";
pub const SINGLE_RAYLEIGH_SCATTERING_TEXTURE: &str = "single_rayleigh_scattering_texture";
pub const SINGLE_MIE_SCATTERING_TEXTURE: &str = "single_mie_scattering_texture";
pub const MULTIPLE_SCATTERING_TEXTURE: &str = "multiple_scattering_texture";
pub const IRRADIANCE_TEXTURE: &str = "irradiance_texture";
pub const SCATTERING_DENSITY_TEXTURE: &str = "scattering_density_texture";

pub const TRANSMITTANCE: &str = "transmittance";
pub const DELTA_IRRADIANCE: &str = "delta_irradiance";
pub const IRRADIANCE: &str = "irradiance";
pub const DELTA_RAYLEIGH: &str = "delta_rayleigh";
pub const DELTA_MIE: &str = "delta_mie";
pub const SCATTERING: &str = "scattering";
pub const SINGLE_MIE_SCATTERING: &str = "single_mie_scattering";
pub const SCATTERING_DENSITY: &str = "scattering_density";
pub const DELTA_MULTIPLE_SCATTERING: &str = "delta_multiple_scattering";

use SlotKind::*;

const TRANSMITTANCE_SLOTS: &[Slot] = &[slot(ATMOSPHERE, Uniforms), slot(TRANSMITTANCE, Storage)];

const DIRECT_IRRADIANCE_SLOTS: &[Slot] = &[
    slot(ATMOSPHERE, Uniforms),
    slot(BLEND, Blend),
    slot(TRANSMITTANCE_TEXTURE, Sampled),
    slot(DELTA_IRRADIANCE, Storage),
    slot(IRRADIANCE, Storage),
];

const SINGLE_SCATTERING_SLOTS: &[Slot] = &[
    slot(ATMOSPHERE, Uniforms),
    slot(BLEND, Blend),
    slot(TRANSMITTANCE_TEXTURE, Sampled),
    slot(DELTA_RAYLEIGH, Storage),
    slot(DELTA_MIE, Storage),
    slot(SCATTERING, Storage),
    optional(SINGLE_MIE_SCATTERING, Storage),
];

const SCATTERING_DENSITY_SLOTS: &[Slot] = &[
    slot(ATMOSPHERE, Uniforms),
    slot(SCATTERING_ORDER, Order),
    slot(TRANSMITTANCE_TEXTURE, Sampled),
    slot(SINGLE_RAYLEIGH_SCATTERING_TEXTURE, Sampled),
    slot(SINGLE_MIE_SCATTERING_TEXTURE, Sampled),
    slot(MULTIPLE_SCATTERING_TEXTURE, Sampled),
    slot(IRRADIANCE_TEXTURE, Sampled),
    slot(SCATTERING_DENSITY, Storage),
];

const INDIRECT_IRRADIANCE_SLOTS: &[Slot] = &[
    slot(ATMOSPHERE, Uniforms),
    slot(BLEND, Blend),
    slot(SCATTERING_ORDER, Order),
    slot(SINGLE_RAYLEIGH_SCATTERING_TEXTURE, Sampled),
    slot(SINGLE_MIE_SCATTERING_TEXTURE, Sampled),
    slot(MULTIPLE_SCATTERING_TEXTURE, Sampled),
    slot(DELTA_IRRADIANCE, Storage),
    slot(IRRADIANCE, Storage),
];

const MULTIPLE_SCATTERING_SLOTS: &[Slot] = &[
    slot(ATMOSPHERE, Uniforms),
    slot(BLEND, Blend),
    slot(TRANSMITTANCE_TEXTURE, Sampled),
    slot(SCATTERING_DENSITY_TEXTURE, Sampled),
    slot(DELTA_MULTIPLE_SCATTERING, Storage),
    slot(SCATTERING, Storage),
];

/// One of the precomputation kernels
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kernel {
    Transmittance,
    DirectIrradiance,
    SingleScattering,
    ScatteringDensity,
    IndirectIrradiance,
    MultipleScattering,
}

impl Kernel {
    pub const ALL: [Kernel; 6] = [
        Kernel::Transmittance,
        Kernel::DirectIrradiance,
        Kernel::SingleScattering,
        Kernel::ScatteringDensity,
        Kernel::IndirectIrradiance,
        Kernel::MultipleScattering,
    ];

    pub fn name(self) -> &'static str {
        use Kernel::*;
        match self {
            Transmittance => "compute_transmittance",
            DirectIrradiance => "compute_direct_irradiance",
            SingleScattering => "compute_single_scattering",
            ScatteringDensity => "compute_scattering_density",
            IndirectIrradiance => "compute_indirect_irradiance",
            MultipleScattering => "compute_multiple_scattering",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn slots(self) -> &'static [Slot] {
        match self {
            Kernel::Transmittance => TRANSMITTANCE_SLOTS,
            Kernel::DirectIrradiance => DIRECT_IRRADIANCE_SLOTS,
            Kernel::SingleScattering => SINGLE_SCATTERING_SLOTS,
            Kernel::ScatteringDensity => SCATTERING_DENSITY_SLOTS,
            Kernel::IndirectIrradiance => INDIRECT_IRRADIANCE_SLOTS,
            Kernel::MultipleScattering => MULTIPLE_SCATTERING_SLOTS,
        }
    }

    pub fn slot(self, name: &str) -> Option<&'static Slot> {
        self.slots().iter().find(|s| s.name == name)
    }

    /// Output slots, in blend order
    pub fn outputs(self) -> impl Iterator<Item = &'static Slot> {
        self.slots().iter().filter(|s| s.kind == SlotKind::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for &k in &Kernel::ALL {
            assert_eq!(Kernel::from_name(k.name()), Some(k));
        }
        assert_eq!(Kernel::from_name("compute_sky"), None);
    }

    #[test]
    fn blend_fits_outputs() {
        for &k in &Kernel::ALL {
            let outputs = k.outputs().count();
            assert!((1..=4).contains(&outputs));
            let blended = k.slot(BLEND).is_some();
            // Only the transmittance and density kernels never accumulate
            assert_eq!(
                blended,
                !matches!(k, Kernel::Transmittance | Kernel::ScatteringDensity)
            );
        }
    }

    #[test]
    fn slot_names_are_unique() {
        for &k in &Kernel::ALL {
            let slots = k.slots();
            for (i, a) in slots.iter().enumerate() {
                assert!(slots[i + 1..].iter().all(|b| b.name != a.name));
            }
        }
    }
}
