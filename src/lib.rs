//! Precomputed atmospheric scattering look-up tables
//!
//! Derived from E. Bruneton and F. Neyret's "Precomputed atmospheric scattering". An atmosphere
//! is described by `Parameters`, typically built from `Settings`, and its transmittance,
//! scattering and irradiance tables are computed by running a sequence of kernels on a
//! `ComputeBackend`. `CpuBackend` evaluates the kernels on the host; with the `vulkan` feature,
//! `VulkanBackend` dispatches them as compute shaders.
//!
//! ```no_run
//! use skylut::{precompute, CpuBackend, MaterialBindings, Parameters, Settings};
//!
//! let settings = Settings::default();
//! let params = Parameters::from_settings(&settings)?;
//! let textures = precompute(&mut CpuBackend::new(), &params, 4)?;
//! let bindings = MaterialBindings::new(&settings, &params);
//! # Ok::<(), skylut::Error>(())
//! ```

pub mod backend;
pub mod color;
mod cpu;
pub mod density;
mod error;
pub mod kernel;
pub mod material;
pub mod parameters;
mod precompute;
mod settings;
pub mod spectrum;
pub mod uniforms;
#[cfg(feature = "vulkan")]
mod vulkan;

pub use backend::{
    ComputeBackend, Extent, Format, KernelId, TextureData, TextureDesc, TextureId, Value,
};
pub use color::white_point;
pub use cpu::{CpuBackend, Sampler};
pub use density::{DensityProfile, DensityProfileLayer};
pub use error::{Error, Result};
pub use material::{texture_bindings, MaterialBindings};
pub use parameters::{AtmosphereModel, Luminance, Parameters, Resolution};
pub use precompute::{
    precompute, LookupTables, Precomputation, Textures, DEFAULT_SCATTERING_ORDERS,
};
pub use settings::{Settings, SettingsError};
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanBackend;
