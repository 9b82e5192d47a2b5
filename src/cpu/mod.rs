//! Host implementation of the precomputation kernels
//!
//! Texels of a dispatch are evaluated in parallel with rayon. Half-precision textures really are
//! stored as `f16`, so results match what a GPU writing RGBA16F would produce up to
//! rounding differences in the arithmetic.

mod functions;
mod kernels;

use std::collections::HashMap;

use glam::{Vec3, Vec4};
use half::f16;

use crate::backend::{
    ComputeBackend, Extent, Format, KernelId, TextureData, TextureDesc, TextureId, Value,
};
use crate::kernel::{Kernel, SlotKind};
use crate::uniforms::AtmosphereUniforms;
use crate::{Error, Result};

pub use functions::Sampler;

/// A `ComputeBackend` running on the calling thread and rayon's global pool
#[derive(Default)]
pub struct CpuBackend {
    kernels: Vec<Bindings>,
    textures: HashMap<TextureId, Texture>,
    next_texture: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of textures currently allocated
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn bindings(&mut self, kernel: KernelId) -> Result<&mut Bindings> {
        self.kernels
            .get_mut(kernel.0 as usize)
            .ok_or_else(|| Error::configuration(format_args!("unknown kernel {:?}", kernel)))
    }
}

struct Bindings {
    kernel: Kernel,
    atmosphere: Option<AtmosphereUniforms>,
    scalars: HashMap<&'static str, Value>,
    textures: HashMap<&'static str, TextureId>,
}

impl Bindings {
    fn slot(&self, name: &str, kinds: &[SlotKind]) -> Result<&'static str> {
        let slot = self.kernel.slot(name).ok_or_else(|| {
            Error::configuration(format_args!(
                "{} has no slot named {}",
                self.kernel.name(),
                name
            ))
        })?;
        if !kinds.contains(&slot.kind) {
            return Err(Error::configuration(format_args!(
                "slot {} of {} holds {:?}",
                name,
                self.kernel.name(),
                slot.kind
            )));
        }
        Ok(slot.name)
    }

    fn is_bound(&self, name: &str, kind: SlotKind) -> bool {
        match kind {
            SlotKind::Uniforms => self.atmosphere.is_some(),
            SlotKind::Blend | SlotKind::Order => self.scalars.contains_key(name),
            SlotKind::Sampled | SlotKind::Storage => self.textures.contains_key(name),
        }
    }
}

enum Texels {
    Half(Vec<[f16; 4]>),
    Full(Vec<[f32; 4]>),
}

struct Texture {
    extent: Extent,
    format: Format,
    texels: Texels,
}

impl Texture {
    fn new(desc: &TextureDesc) -> Self {
        let n = desc.extent.texel_count();
        Self {
            extent: desc.extent,
            format: desc.format,
            texels: match desc.format {
                Format::Rgba16Float => Texels::Half(vec![[f16::from_f32(0.0); 4]; n]),
                Format::Rgba32Float => Texels::Full(vec![[0.0; 4]; n]),
            },
        }
    }

    fn get(&self, i: usize) -> Vec4 {
        match self.texels {
            Texels::Half(ref x) => {
                let [r, g, b, a] = x[i];
                Vec4::new(r.to_f32(), g.to_f32(), b.to_f32(), a.to_f32())
            }
            Texels::Full(ref x) => Vec4::from(x[i]),
        }
    }

    fn set(&mut self, i: usize, value: Vec4) {
        match self.texels {
            Texels::Half(ref mut x) => x[i] = value.to_array().map(f16::from_f32),
            Texels::Full(ref mut x) => x[i] = value.to_array(),
        }
    }

    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        ((z * self.extent.height + y) * self.extent.width + x) as usize
    }

    /// Texel at integer coordinates, clamped to the edge
    fn fetch(&self, x: i64, y: i64, z: i64) -> Vec4 {
        let clamp = |v: i64, size: u32| v.clamp(0, i64::from(size) - 1) as u32;
        self.get(self.index(
            clamp(x, self.extent.width),
            clamp(y, self.extent.height),
            clamp(z, self.extent.depth),
        ))
    }

    fn to_data(&self) -> TextureData {
        TextureData {
            extent: self.extent,
            format: self.format,
            texels: (0..self.extent.texel_count())
                .map(|i| self.get(i).to_array())
                .collect(),
        }
    }
}

impl Sampler for Texture {
    fn sample(&self, coord: Vec3) -> Vec4 {
        let size = Vec3::new(
            self.extent.width as f32,
            self.extent.height as f32,
            self.extent.depth as f32,
        );
        // Degenerate mappings produce NaN or infinite coordinates; keep the integer math in range
        let coord = Vec3::from(coord.to_array().map(|c| if c.is_finite() { c } else { 0.0 }));
        let f = (coord * size - 0.5).clamp(Vec3::splat(-1.0), size);
        let i = f.floor();
        let t = f - i;
        let (x, y, z) = (i.x as i64, i.y as i64, i.z as i64);
        let mut result = Vec4::ZERO;
        for dz in 0..2 {
            let wz = if dz == 0 { 1.0 - t.z } else { t.z };
            for dy in 0..2 {
                let wy = if dy == 0 { 1.0 - t.y } else { t.y };
                for dx in 0..2 {
                    let wx = if dx == 0 { 1.0 - t.x } else { t.x };
                    let w = wx * wy * wz;
                    if w != 0.0 {
                        result += self.fetch(x + dx, y + dy, z + dz) * w;
                    }
                }
            }
        }
        result
    }
}

impl ComputeBackend for CpuBackend {
    fn resolve_kernel(&mut self, name: &str) -> Result<KernelId> {
        let kernel = Kernel::from_name(name)
            .ok_or_else(|| Error::configuration(format_args!("no kernel named {}", name)))?;
        if let Some(i) = self.kernels.iter().position(|b| b.kernel == kernel) {
            return Ok(KernelId(i as u32));
        }
        self.kernels.push(Bindings {
            kernel,
            atmosphere: None,
            scalars: HashMap::new(),
            textures: HashMap::new(),
        });
        Ok(KernelId(self.kernels.len() as u32 - 1))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.extent.texel_count() == 0 {
            return Err(Error::validation(format_args!(
                "texture {} is empty",
                desc.name
            )));
        }
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, Texture::new(desc));
        log::trace!("allocated {} as {:?}", desc.name, id);
        Ok(id)
    }

    fn bind_scalar(&mut self, kernel: KernelId, slot: &str, value: Value) -> Result<()> {
        let bindings = self.bindings(kernel)?;
        let kind = match value {
            Value::Vec4(_) => SlotKind::Blend,
            Value::Int(_) => SlotKind::Order,
        };
        let slot = bindings.slot(slot, &[kind])?;
        bindings.scalars.insert(slot, value);
        Ok(())
    }

    fn bind_buffer(&mut self, kernel: KernelId, slot: &str, data: &[u8]) -> Result<()> {
        let bindings = self.bindings(kernel)?;
        bindings.slot(slot, &[SlotKind::Uniforms])?;
        let atmosphere = bytemuck::try_pod_read_unaligned::<AtmosphereUniforms>(data)
            .map_err(|e| Error::validation(format_args!("malformed uniform block: {:?}", e)))?;
        bindings.atmosphere = Some(atmosphere);
        Ok(())
    }

    fn bind_texture(&mut self, kernel: KernelId, slot: &str, texture: TextureId) -> Result<()> {
        if !self.textures.contains_key(&texture) {
            return Err(Error::configuration(format_args!(
                "unknown texture {:?}",
                texture
            )));
        }
        let bindings = self.bindings(kernel)?;
        let slot = bindings.slot(slot, &[SlotKind::Sampled, SlotKind::Storage])?;
        bindings.textures.insert(slot, texture);
        Ok(())
    }

    fn dispatch(&mut self, kernel: KernelId, groups: [u32; 3]) -> Result<()> {
        let bindings = self
            .kernels
            .get(kernel.0 as usize)
            .ok_or_else(|| Error::configuration(format_args!("unknown kernel {:?}", kernel)))?;
        log::trace!("dispatching {} over {:?}", bindings.kernel.name(), groups);
        kernels::dispatch(bindings, &mut self.textures, groups)
    }

    fn read_back(&mut self, texture: TextureId) -> Result<TextureData> {
        self.textures
            .get(&texture)
            .map(Texture::to_data)
            .ok_or_else(|| Error::configuration(format_args!("unknown texture {:?}", texture)))
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        for bindings in &mut self.kernels {
            bindings.textures.retain(|_, id| *id != texture);
        }
    }
}
