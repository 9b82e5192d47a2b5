use std::collections::HashMap;

use glam::{Mat3, Vec2, Vec3, Vec4};
use rayon::prelude::*;

use super::functions::{self as f, ScatteringTextures};
use super::{Bindings, Texture};
use crate::backend::{TextureId, Value, LOCAL_SIZE};
use crate::kernel::{self, Kernel, SlotKind};
use crate::uniforms::AtmosphereUniforms;
use crate::{Error, Result};

/// Inputs of a dispatch, shared by every invocation
struct Inputs<'a> {
    atmosphere: &'a AtmosphereUniforms,
    luminance_from_radiance: Mat3,
    scattering_order: i32,
    sampled: HashMap<&'static str, &'a Texture>,
}

impl<'a> Inputs<'a> {
    fn texture(&self, slot: &str) -> &'a Texture {
        // Presence is checked before evaluation starts
        self.sampled[slot]
    }

    fn scattering(&self) -> ScatteringTextures<'a> {
        ScatteringTextures {
            single_rayleigh: self.texture(kernel::SINGLE_RAYLEIGH_SCATTERING_TEXTURE),
            single_mie: self.texture(kernel::SINGLE_MIE_SCATTERING_TEXTURE),
            multiple: self.texture(kernel::MULTIPLE_SCATTERING_TEXTURE),
        }
    }

    fn luminance(&self, radiance: Vec3) -> Vec3 {
        self.luminance_from_radiance * radiance
    }
}

/// Run `bindings`' kernel over `groups` work groups, writing its outputs into `textures`
pub(super) fn dispatch(
    bindings: &Bindings,
    textures: &mut HashMap<TextureId, Texture>,
    groups: [u32; 3],
) -> Result<()> {
    let kernel = bindings.kernel;
    for slot in kernel.slots() {
        if !slot.optional && !bindings.is_bound(slot.name, slot.kind) {
            return Err(Error::configuration(format_args!(
                "slot {} of {} is unbound",
                slot.name,
                kernel.name()
            )));
        }
    }
    let atmosphere = bindings
        .atmosphere
        .as_ref()
        .ok_or_else(|| Error::configuration("atmosphere is unbound"))?;
    let blend = match bindings.scalars.get(kernel::BLEND) {
        Some(&Value::Vec4(x)) => x,
        _ => [0.0; 4],
    };
    let scattering_order = match bindings.scalars.get(kernel::SCATTERING_ORDER) {
        Some(&Value::Int(x)) => x,
        _ => 0,
    };

    // Outputs paired with their blend flag; unbound optional outputs are skipped
    let mut outputs = Vec::new();
    for (i, slot) in kernel.outputs().enumerate() {
        if let Some(&id) = bindings.textures.get(slot.name) {
            outputs.push((id, blend[i] != 0.0, i));
        }
    }
    let lookup = |id: &TextureId| {
        textures
            .get(id)
            .ok_or_else(|| Error::configuration(format_args!("texture {:?} was released", id)))
    };
    let extent = lookup(&outputs[0].0)?.extent;
    for (id, _, _) in &outputs {
        if lookup(id)?.extent != extent {
            return Err(Error::validation(format_args!(
                "outputs of {} differ in extent",
                kernel.name()
            )));
        }
    }

    let width = extent.width.min(groups[0] * LOCAL_SIZE[0]);
    let height = extent.height.min(groups[1] * LOCAL_SIZE[1]);
    let depth = extent.depth.min(groups[2] * LOCAL_SIZE[2]);

    let results = {
        let mut sampled = HashMap::new();
        for slot in kernel.slots().iter().filter(|s| s.kind == SlotKind::Sampled) {
            sampled.insert(slot.name, lookup(&bindings.textures[slot.name])?);
        }
        let l = atmosphere.luminance_from_radiance;
        let inputs = Inputs {
            atmosphere,
            luminance_from_radiance: Mat3::from_cols(
                Vec4::from(l[0]).truncate(),
                Vec4::from(l[1]).truncate(),
                Vec4::from(l[2]).truncate(),
            ),
            scattering_order,
            sampled,
        };
        let count = width as usize * height as usize * depth as usize;
        (0..count)
            .into_par_iter()
            .map(|i| {
                let x = (i % width as usize) as u32;
                let y = (i / width as usize % height as usize) as u32;
                let z = (i / (width as usize * height as usize)) as u32;
                let frag_coord = Vec3::new(x as f32, y as f32, z as f32) + 0.5;
                ((x, y, z), evaluate(kernel, &inputs, frag_coord))
            })
            .collect::<Vec<_>>()
    };

    for (id, additive, slot) in outputs {
        let texture = textures
            .get_mut(&id)
            .ok_or_else(|| Error::configuration(format_args!("texture {:?} was released", id)))?;
        for &((x, y, z), ref values) in &results {
            let i = texture.index(x, y, z);
            let value = if additive {
                texture.get(i) + values[slot]
            } else {
                values[slot]
            };
            texture.set(i, value);
        }
    }
    Ok(())
}

/// Values of every output of `kernel` at one texel, in slot order
fn evaluate(kernel: Kernel, inputs: &Inputs<'_>, frag_coord: Vec3) -> [Vec4; 4] {
    let atm = inputs.atmosphere;
    let frag_coord_2d = Vec2::new(frag_coord.x, frag_coord.y);
    match kernel {
        Kernel::Transmittance => [
            f::compute_transmittance_to_top_atmosphere_boundary_texture(atm, frag_coord_2d)
                .extend(1.0),
            Vec4::ZERO,
            Vec4::ZERO,
            Vec4::ZERO,
        ],
        Kernel::DirectIrradiance => {
            let transmittance = inputs.texture(kernel::TRANSMITTANCE_TEXTURE);
            let delta_irradiance =
                f::compute_direct_irradiance_texture(atm, transmittance, frag_coord_2d);
            // Direct irradiance is rendered separately, so the accumulated irradiance starts at
            // zero
            [delta_irradiance.extend(0.0), Vec4::ZERO, Vec4::ZERO, Vec4::ZERO]
        }
        Kernel::SingleScattering => {
            let transmittance = inputs.texture(kernel::TRANSMITTANCE_TEXTURE);
            let (rayleigh, mie) = f::compute_single_scattering_texture(atm, transmittance, frag_coord);
            let rayleigh_luminance = inputs.luminance(rayleigh);
            let mie_luminance = inputs.luminance(mie);
            [
                rayleigh.extend(0.0),
                mie.extend(0.0),
                rayleigh_luminance.extend(mie_luminance.x),
                mie_luminance.extend(0.0),
            ]
        }
        Kernel::ScatteringDensity => {
            let density = f::compute_scattering_density_texture(
                atm,
                inputs.texture(kernel::TRANSMITTANCE_TEXTURE),
                &inputs.scattering(),
                inputs.texture(kernel::IRRADIANCE_TEXTURE),
                frag_coord,
                inputs.scattering_order,
            );
            [density.extend(0.0), Vec4::ZERO, Vec4::ZERO, Vec4::ZERO]
        }
        Kernel::IndirectIrradiance => {
            let delta_irradiance = f::compute_indirect_irradiance_texture(
                atm,
                &inputs.scattering(),
                frag_coord_2d,
                inputs.scattering_order,
            );
            [
                delta_irradiance.extend(0.0),
                inputs.luminance(delta_irradiance).extend(0.0),
                Vec4::ZERO,
                Vec4::ZERO,
            ]
        }
        Kernel::MultipleScattering => {
            let (delta_multiple_scattering, nu) = f::compute_multiple_scattering_texture(
                atm,
                inputs.texture(kernel::TRANSMITTANCE_TEXTURE),
                inputs.texture(kernel::SCATTERING_DENSITY_TEXTURE),
                frag_coord,
            );
            let scattering = inputs
                .luminance(delta_multiple_scattering / f::rayleigh_phase_function(nu))
                .extend(0.0);
            [
                delta_multiple_scattering.extend(0.0),
                scattering,
                Vec4::ZERO,
                Vec4::ZERO,
            ]
        }
    }
}
