//! The interface through which precomputation drives a compute device

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Work-group size every kernel is compiled with
pub const LOCAL_SIZE: [u32; 3] = [8, 8, 1];

/// Handle to a kernel resolved by a backend
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

/// Handle to a texture owned by a backend
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Texel storage format
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Rgba16Float,
    Rgba32Float,
}

impl Format {
    pub fn texel_size(self) -> usize {
        match self {
            Format::Rgba16Float => 8,
            Format::Rgba32Float => 16,
        }
    }
}

/// Texture dimensions; `depth` is 1 for 2D textures
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub fn d2(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    pub fn d3(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Work groups needed to cover every texel with one invocation each
    pub fn group_count(&self) -> [u32; 3] {
        [
            (self.width + LOCAL_SIZE[0] - 1) / LOCAL_SIZE[0],
            (self.height + LOCAL_SIZE[1] - 1) / LOCAL_SIZE[1],
            (self.depth + LOCAL_SIZE[2] - 1) / LOCAL_SIZE[2],
        ]
    }
}

/// Description of a texture to allocate
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    /// Debugging label
    pub name: &'static str,
    pub extent: Extent,
    pub format: Format,
    /// Whether the texture is addressed as a 3D volume
    pub volume: bool,
}

/// A scalar kernel argument
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Vec4([f32; 4]),
}

/// Texels copied back to host memory
///
/// Half-precision textures are widened to `f32` on readback.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub extent: Extent,
    pub format: Format,
    /// Row-major texels, x fastest, then y, then z
    pub texels: Vec<[f32; 4]>,
}

impl TextureData {
    /// A black 1x1x1 volume, bound in place of single Mie scattering when it's combined into
    /// the scattering table
    pub fn black_3d(format: Format) -> Self {
        Self {
            extent: Extent::d3(1, 1, 1),
            format,
            texels: vec![[0.0; 4]],
        }
    }

    pub fn texel(&self, x: u32, y: u32, z: u32) -> [f32; 4] {
        let e = &self.extent;
        self.texels[((z * e.height + y) * e.width + x) as usize]
    }

    /// Check that the texel count matches the extent
    pub fn validate(&self) -> Result<()> {
        if self.texels.len() != self.extent.texel_count() {
            return Err(Error::validation(format_args!(
                "texture of extent {}x{}x{} holds {} texels",
                self.extent.width,
                self.extent.height,
                self.extent.depth,
                self.texels.len()
            )));
        }
        Ok(())
    }
}

/// A device able to run the precomputation kernels
///
/// Bindings are per kernel and persist across dispatches until rebound. Every operation blocks
/// until complete.
pub trait ComputeBackend {
    /// Look up a kernel by name, failing with a configuration error if it doesn't exist
    fn resolve_kernel(&mut self, name: &str) -> Result<KernelId>;

    /// Allocate a zero-initialized texture
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    fn bind_scalar(&mut self, kernel: KernelId, slot: &str, value: Value) -> Result<()>;

    /// Bind a uniform block, given as raw bytes
    fn bind_buffer(&mut self, kernel: KernelId, slot: &str, data: &[u8]) -> Result<()>;

    fn bind_texture(&mut self, kernel: KernelId, slot: &str, texture: TextureId) -> Result<()>;

    /// Run `kernel` over `groups` work groups of `LOCAL_SIZE` invocations
    fn dispatch(&mut self, kernel: KernelId, groups: [u32; 3]) -> Result<()>;

    fn read_back(&mut self, texture: TextureId) -> Result<TextureData>;

    /// Free a texture; later uses of `texture` are errors
    fn release_texture(&mut self, texture: TextureId);
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for &mut B {
    fn resolve_kernel(&mut self, name: &str) -> Result<KernelId> {
        (**self).resolve_kernel(name)
    }
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        (**self).create_texture(desc)
    }
    fn bind_scalar(&mut self, kernel: KernelId, slot: &str, value: Value) -> Result<()> {
        (**self).bind_scalar(kernel, slot, value)
    }
    fn bind_buffer(&mut self, kernel: KernelId, slot: &str, data: &[u8]) -> Result<()> {
        (**self).bind_buffer(kernel, slot, data)
    }
    fn bind_texture(&mut self, kernel: KernelId, slot: &str, texture: TextureId) -> Result<()> {
        (**self).bind_texture(kernel, slot, texture)
    }
    fn dispatch(&mut self, kernel: KernelId, groups: [u32; 3]) -> Result<()> {
        (**self).dispatch(kernel, groups)
    }
    fn read_back(&mut self, texture: TextureId) -> Result<TextureData> {
        (**self).read_back(texture)
    }
    fn release_texture(&mut self, texture: TextureId) {
        (**self).release_texture(texture)
    }
}
