//! `ComputeBackend` on a Vulkan device
//!
//! Kernels are compiled from `shaders/` at build time, once per storage format. Descriptor
//! bindings live in set 0, numbered by the slot's position in `Kernel::slots`. Blend and
//! scattering order are push constants:
//!
//! ```glsl
//! layout(push_constant) uniform Arguments { vec4 blend; int scattering_order; };
//! ```
//!
//! Every dispatch is submitted and waited on before returning, so bindings may be changed
//! freely between dispatches.

use std::collections::HashMap;
use std::sync::Arc;
use std::{mem, ptr, slice};

use ash::version::{DeviceV1_0, InstanceV1_0};
use ash::{vk, Device, Instance};
use half::f16;
use vk_shader_macros::include_glsl;

use crate::backend::{
    ComputeBackend, Extent, Format, KernelId, TextureData, TextureDesc, TextureId, Value,
};
use crate::kernel::{Kernel, SlotKind};
use crate::uniforms::AtmosphereUniforms;
use crate::{Error, Result};

const PUSH_CONSTANTS_SIZE: usize = 20;

// Indexed by `format_index`
const TRANSMITTANCE: [&[u32]; 2] = [
    include_glsl!("shaders/transmittance.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/transmittance.comp", define: FORMAT "rgba32f"),
];
const DIRECT_IRRADIANCE: [&[u32]; 2] = [
    include_glsl!("shaders/direct_irradiance.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/direct_irradiance.comp", define: FORMAT "rgba32f"),
];
const SINGLE_SCATTERING: [&[u32]; 2] = [
    include_glsl!("shaders/single_scattering.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/single_scattering.comp", define: FORMAT "rgba32f"),
];
const SCATTERING_DENSITY: [&[u32]; 2] = [
    include_glsl!("shaders/scattering_density.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/scattering_density.comp", define: FORMAT "rgba32f"),
];
const INDIRECT_IRRADIANCE: [&[u32]; 2] = [
    include_glsl!("shaders/indirect_irradiance.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/indirect_irradiance.comp", define: FORMAT "rgba32f"),
];
const MULTIPLE_SCATTERING: [&[u32]; 2] = [
    include_glsl!("shaders/multiple_scattering.comp", define: FORMAT "rgba16f"),
    include_glsl!("shaders/multiple_scattering.comp", define: FORMAT "rgba32f"),
];

fn spirv(kernel: Kernel) -> [&'static [u32]; 2] {
    match kernel {
        Kernel::Transmittance => TRANSMITTANCE,
        Kernel::DirectIrradiance => DIRECT_IRRADIANCE,
        Kernel::SingleScattering => SINGLE_SCATTERING,
        Kernel::ScatteringDensity => SCATTERING_DENSITY,
        Kernel::IndirectIrradiance => INDIRECT_IRRADIANCE,
        Kernel::MultipleScattering => MULTIPLE_SCATTERING,
    }
}

fn format_index(format: Format) -> usize {
    match format {
        Format::Rgba16Float => 0,
        Format::Rgba32Float => 1,
    }
}

/// Runs the precomputation kernels on a Vulkan queue
///
/// `device` must outlive the backend.
pub struct VulkanBackend {
    device: Arc<Device>,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    sampler: vk::Sampler,
    passes: Vec<Pass>,
    textures: HashMap<TextureId, Image>,
    /// Bound to unbound optional outputs; stores outside of it are discarded
    placeholders: HashMap<Format, Image>,
    next_texture: u32,
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for pass in self.passes.drain(..) {
                pass.destroy(&self.device);
            }
            for (_, image) in self.textures.drain() {
                image.destroy(&self.device);
            }
            for (_, image) in self.placeholders.drain() {
                image.destroy(&self.device);
            }
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.cmd_pool, None);
        }
    }
}

impl VulkanBackend {
    /// Use the first queue of `queue_family`, which must support compute
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        physical: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<Self> {
        unsafe {
            let queue = device.get_device_queue(queue_family, 0);
            let cmd_pool = device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::builder()
                        .queue_family_index(queue_family)
                        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                    None,
                )
                .map_err(Error::device)?;
            let cmd = match device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(cmd_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            ) {
                Ok(x) => x[0],
                Err(e) => {
                    device.destroy_command_pool(cmd_pool, None);
                    return Err(Error::device(e));
                }
            };
            let fence = match device.create_fence(&vk::FenceCreateInfo::default(), None) {
                Ok(x) => x,
                Err(e) => {
                    device.destroy_command_pool(cmd_pool, None);
                    return Err(Error::device(e));
                }
            };
            let sampler = match device.create_sampler(
                &vk::SamplerCreateInfo {
                    min_filter: vk::Filter::LINEAR,
                    mag_filter: vk::Filter::LINEAR,
                    mipmap_mode: vk::SamplerMipmapMode::NEAREST,
                    address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    ..Default::default()
                },
                None,
            ) {
                Ok(x) => x,
                Err(e) => {
                    device.destroy_fence(fence, None);
                    device.destroy_command_pool(cmd_pool, None);
                    return Err(Error::device(e));
                }
            };
            Ok(Self {
                memory_props: instance.get_physical_device_memory_properties(physical),
                device,
                queue,
                cmd_pool,
                cmd,
                fence,
                sampler,
                passes: Vec::new(),
                textures: HashMap::new(),
                placeholders: HashMap::new(),
                next_texture: 0,
            })
        }
    }

    fn pass(&mut self, kernel: KernelId) -> Result<&mut Pass> {
        self.passes
            .get_mut(kernel.0 as usize)
            .ok_or_else(|| Error::configuration(format_args!("unknown kernel {:?}", kernel)))
    }

    /// Record commands with `f`, then execute them to completion
    unsafe fn submit(&self, f: impl FnOnce(&Device, vk::CommandBuffer)) -> Result<()> {
        let device = &*self.device;
        device
            .begin_command_buffer(
                self.cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
            .map_err(Error::device)?;
        f(device, self.cmd);
        device.end_command_buffer(self.cmd).map_err(Error::device)?;
        device
            .queue_submit(
                self.queue,
                &[vk::SubmitInfo::builder()
                    .command_buffers(&[self.cmd])
                    .build()],
                self.fence,
            )
            .map_err(Error::device)?;
        device
            .wait_for_fences(&[self.fence], true, u64::max_value())
            .map_err(Error::device)?;
        device.reset_fences(&[self.fence]).map_err(Error::device)
    }

    unsafe fn load_pass(&self, kernel: Kernel) -> Result<Pass> {
        let device = &*self.device;
        let mut pass = Pass {
            kernel,
            shaders: [vk::ShaderModule::null(); 2],
            pipelines: [vk::Pipeline::null(); 2],
            layout: vk::PipelineLayout::null(),
            ds_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            ds: vk::DescriptorSet::null(),
            uniforms: None,
            push_constants: [0; PUSH_CONSTANTS_SIZE],
            bound: HashMap::new(),
        };
        // On failure, `pass` is destroyed with whatever was created so far
        match pass.init(device, &self.memory_props, self.sampler, spirv(kernel)) {
            Ok(()) => {
                log::debug!("created pipelines for {}", kernel.name());
                Ok(pass)
            }
            Err(e) => {
                pass.destroy(device);
                Err(e)
            }
        }
    }

    unsafe fn alloc_image(&self, desc: &TextureDesc) -> Result<Image> {
        let device = &*self.device;
        let extent = desc.extent;
        let handle = device
            .create_image(
                &vk::ImageCreateInfo {
                    image_type: if desc.volume {
                        vk::ImageType::TYPE_3D
                    } else {
                        vk::ImageType::TYPE_2D
                    },
                    format: vk_format(desc.format),
                    extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: extent.depth,
                    },
                    mip_levels: 1,
                    array_layers: 1,
                    samples: vk::SampleCountFlags::TYPE_1,
                    tiling: vk::ImageTiling::OPTIMAL,
                    usage: vk::ImageUsageFlags::STORAGE
                        | vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::TRANSFER_SRC
                        | vk::ImageUsageFlags::TRANSFER_DST,
                    sharing_mode: vk::SharingMode::EXCLUSIVE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    ..Default::default()
                },
                None,
            )
            .map_err(Error::device)?;
        let reqs = device.get_image_memory_requirements(handle);
        let memory = match allocate(
            device,
            &self.memory_props,
            reqs,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(x) => x,
            Err(e) => {
                device.destroy_image(handle, None);
                return Err(e);
            }
        };
        let mut image = Image {
            handle,
            view: vk::ImageView::null(),
            memory,
            extent,
            format: desc.format,
        };
        let result = device
            .bind_image_memory(handle, memory, 0)
            .and_then(|()| {
                device.create_image_view(
                    &vk::ImageViewCreateInfo {
                        image: handle,
                        view_type: if desc.volume {
                            vk::ImageViewType::TYPE_3D
                        } else {
                            vk::ImageViewType::TYPE_2D
                        },
                        format: vk_format(desc.format),
                        components: vk::ComponentMapping {
                            r: vk::ComponentSwizzle::IDENTITY,
                            g: vk::ComponentSwizzle::IDENTITY,
                            b: vk::ComponentSwizzle::IDENTITY,
                            a: vk::ComponentSwizzle::IDENTITY,
                        },
                        subresource_range: COLOR_RANGE,
                        ..Default::default()
                    },
                    None,
                )
            });
        match result {
            Ok(view) => image.view = view,
            Err(e) => {
                image.destroy(device);
                return Err(Error::device(e));
            }
        }

        // Images live in GENERAL for their whole lifetime and start out zeroed
        let initialized = self.submit(|device, cmd| {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                Default::default(),
                &[],
                &[],
                &[vk::ImageMemoryBarrier {
                    dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::GENERAL,
                    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    image: handle,
                    subresource_range: COLOR_RANGE,
                    ..Default::default()
                }],
            );
            device.cmd_clear_color_image(
                cmd,
                handle,
                vk::ImageLayout::GENERAL,
                &vk::ClearColorValue {
                    float32: [0.0; 4],
                },
                &[COLOR_RANGE],
            );
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                Default::default(),
                &[vk::MemoryBarrier {
                    src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access_mask: vk::AccessFlags::SHADER_READ
                        | vk::AccessFlags::SHADER_WRITE,
                    ..Default::default()
                }],
                &[],
                &[],
            );
        });
        if let Err(e) = initialized {
            image.destroy(device);
            return Err(e);
        }
        Ok(image)
    }

    /// Storage image standing in for unbound optional outputs of `format`
    unsafe fn placeholder(&mut self, format: Format) -> Result<vk::ImageView> {
        if let Some(image) = self.placeholders.get(&format) {
            return Ok(image.view);
        }
        let image = self.alloc_image(&TextureDesc {
            name: "placeholder",
            extent: Extent::d3(1, 1, 1),
            format,
            volume: true,
        })?;
        let view = image.view;
        self.placeholders.insert(format, image);
        Ok(view)
    }
}

impl ComputeBackend for VulkanBackend {
    fn resolve_kernel(&mut self, name: &str) -> Result<KernelId> {
        let kernel = Kernel::from_name(name)
            .ok_or_else(|| Error::configuration(format_args!("no kernel named {}", name)))?;
        if let Some(i) = self.passes.iter().position(|p| p.kernel == kernel) {
            return Ok(KernelId(i as u32));
        }
        let pass = unsafe { self.load_pass(kernel)? };
        self.passes.push(pass);
        Ok(KernelId(self.passes.len() as u32 - 1))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.extent.texel_count() == 0 {
            return Err(Error::validation(format_args!(
                "texture {} is empty",
                desc.name
            )));
        }
        let image = unsafe { self.alloc_image(desc)? };
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, image);
        log::trace!("allocated {} as {:?}", desc.name, id);
        Ok(id)
    }

    fn bind_scalar(&mut self, kernel: KernelId, slot: &str, value: Value) -> Result<()> {
        let pass = self.pass(kernel)?;
        match value {
            Value::Vec4(x) => {
                pass.slot(slot, SlotKind::Blend)?;
                pass.push_constants[..16].copy_from_slice(bytemuck::bytes_of(&x));
            }
            Value::Int(x) => {
                pass.slot(slot, SlotKind::Order)?;
                pass.push_constants[16..].copy_from_slice(&x.to_ne_bytes());
            }
        }
        pass.bound.insert(slot.to_owned(), None);
        Ok(())
    }

    fn bind_buffer(&mut self, kernel: KernelId, slot: &str, data: &[u8]) -> Result<()> {
        let device = self.device.clone();
        let pass = self.pass(kernel)?;
        pass.slot(slot, SlotKind::Uniforms)?;
        if data.len() != mem::size_of::<AtmosphereUniforms>() {
            return Err(Error::validation(format_args!(
                "uniform block is {} bytes, expected {}",
                data.len(),
                mem::size_of::<AtmosphereUniforms>()
            )));
        }
        let buffer = pass
            .uniforms
            .as_ref()
            .ok_or_else(|| Error::configuration("kernel has no uniform buffer"))?;
        unsafe {
            let ptr = device
                .map_memory(
                    buffer.memory,
                    0,
                    data.len() as vk::DeviceSize,
                    Default::default(),
                )
                .map_err(Error::device)?;
            ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            device.unmap_memory(buffer.memory);
        }
        pass.bound.insert(slot.to_owned(), None);
        Ok(())
    }

    fn bind_texture(&mut self, kernel: KernelId, slot: &str, texture: TextureId) -> Result<()> {
        let view = self
            .textures
            .get(&texture)
            .map(|x| x.view)
            .ok_or_else(|| Error::configuration(format_args!("unknown texture {:?}", texture)))?;
        let device = self.device.clone();
        let pass = self.pass(kernel)?;
        let binding = pass
            .slot(slot, SlotKind::Sampled)
            .or_else(|_| pass.slot(slot, SlotKind::Storage))?;
        unsafe {
            pass.write_image(&device, binding, view);
        }
        pass.bound.insert(slot.to_owned(), Some(texture));
        Ok(())
    }

    fn dispatch(&mut self, kernel: KernelId, groups: [u32; 3]) -> Result<()> {
        let pass_kernel = self.pass(kernel)?.kernel;
        // Any storage texture fixes the format a placeholder must have
        let mut format = None;
        let mut missing = Vec::new();
        {
            let pass = &self.passes[kernel.0 as usize];
            for (binding, slot) in pass_kernel.slots().iter().enumerate() {
                match pass.bound.get(slot.name) {
                    Some(Some(id)) if slot.kind == SlotKind::Storage => {
                        format = self.textures.get(id).map(|x| x.format);
                    }
                    Some(_) => {}
                    None if slot.optional => missing.push(binding as u32),
                    None => {
                        return Err(Error::configuration(format_args!(
                            "slot {} of {} is unbound",
                            slot.name,
                            pass_kernel.name()
                        )));
                    }
                }
            }
        }
        let format = format.ok_or_else(|| {
            Error::configuration(format_args!("{} has no outputs bound", pass_kernel.name()))
        })?;
        if !missing.is_empty() {
            let view = unsafe { self.placeholder(format)? };
            let device = self.device.clone();
            let pass = &self.passes[kernel.0 as usize];
            for binding in missing {
                unsafe {
                    pass.write_image(&device, binding, view);
                }
            }
        }

        log::trace!("dispatching {} over {:?}", pass_kernel.name(), groups);
        let pass = &self.passes[kernel.0 as usize];
        unsafe {
            self.submit(|device, cmd| {
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    pass.pipelines[format_index(format)],
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    pass.layout,
                    0,
                    &[pass.ds],
                    &[],
                );
                if pass.has_push_constants() {
                    device.cmd_push_constants(
                        cmd,
                        pass.layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        &pass.push_constants,
                    );
                }
                device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
                // Make results visible to the next dispatch or readback
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                    Default::default(),
                    &[vk::MemoryBarrier {
                        src_access_mask: vk::AccessFlags::SHADER_WRITE,
                        dst_access_mask: vk::AccessFlags::SHADER_READ
                            | vk::AccessFlags::SHADER_WRITE
                            | vk::AccessFlags::TRANSFER_READ,
                        ..Default::default()
                    }],
                    &[],
                    &[],
                );
            })
        }
    }

    fn read_back(&mut self, texture: TextureId) -> Result<TextureData> {
        let image = self
            .textures
            .get(&texture)
            .ok_or_else(|| Error::configuration(format_args!("unknown texture {:?}", texture)))?;
        let (extent, format, handle) = (image.extent, image.format, image.handle);
        let size = extent.texel_count() * format.texel_size();
        let device = &*self.device;
        unsafe {
            let buffer = Buffer::new(
                device,
                &self.memory_props,
                size as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_DST,
            )?;
            let result = self
                .submit(|device, cmd| {
                    device.cmd_copy_image_to_buffer(
                        cmd,
                        handle,
                        vk::ImageLayout::GENERAL,
                        buffer.handle,
                        &[vk::BufferImageCopy {
                            buffer_offset: 0,
                            buffer_row_length: 0,
                            buffer_image_height: 0,
                            image_subresource: vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                mip_level: 0,
                                base_array_layer: 0,
                                layer_count: 1,
                            },
                            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                            image_extent: vk::Extent3D {
                                width: extent.width,
                                height: extent.height,
                                depth: extent.depth,
                            },
                        }],
                    );
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::HOST,
                        Default::default(),
                        &[vk::MemoryBarrier {
                            src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                            dst_access_mask: vk::AccessFlags::HOST_READ,
                            ..Default::default()
                        }],
                        &[],
                        &[],
                    );
                })
                .and_then(|()| {
                    let ptr = device
                        .map_memory(buffer.memory, 0, size as vk::DeviceSize, Default::default())
                        .map_err(Error::device)?;
                    let bytes = slice::from_raw_parts(ptr as *const u8, size);
                    let texels = decode(bytes, format);
                    device.unmap_memory(buffer.memory);
                    Ok(texels)
                });
            buffer.destroy(device);
            Ok(TextureData {
                extent,
                format,
                texels: result?,
            })
        }
    }

    fn release_texture(&mut self, texture: TextureId) {
        if let Some(image) = self.textures.remove(&texture) {
            for pass in &mut self.passes {
                pass.bound.retain(|_, x| *x != Some(texture));
            }
            unsafe {
                image.destroy(&self.device);
            }
        }
    }
}

/// Texels of a tightly packed buffer of `format`
fn decode(bytes: &[u8], format: Format) -> Vec<[f32; 4]> {
    match format {
        Format::Rgba16Float => bytes
            .chunks_exact(8)
            .map(|texel| {
                let mut out = [0.0; 4];
                for (x, c) in out.iter_mut().zip(texel.chunks_exact(2)) {
                    *x = f16::from_bits(u16::from_ne_bytes([c[0], c[1]])).to_f32();
                }
                out
            })
            .collect(),
        Format::Rgba32Float => bytes
            .chunks_exact(16)
            .map(|texel| {
                let mut out = [0.0; 4];
                for (x, c) in out.iter_mut().zip(texel.chunks_exact(4)) {
                    *x = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
                }
                out
            })
            .collect(),
    }
}

fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

struct Pass {
    kernel: Kernel,
    /// Indexed by `format_index`
    shaders: [vk::ShaderModule; 2],
    pipelines: [vk::Pipeline; 2],
    layout: vk::PipelineLayout,
    ds_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    ds: vk::DescriptorSet,
    uniforms: Option<Buffer>,
    push_constants: [u8; PUSH_CONSTANTS_SIZE],
    /// Bound slots, with the texture bound to them if any
    bound: HashMap<String, Option<TextureId>>,
}

impl Pass {
    unsafe fn init(
        &mut self,
        device: &Device,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        sampler: vk::Sampler,
        code: [&[u32]; 2],
    ) -> Result<()> {
        let slots = self.kernel.slots();
        let bindings = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let (descriptor_type, p_immutable_samplers) = match slot.kind {
                    SlotKind::Uniforms => (vk::DescriptorType::UNIFORM_BUFFER, ptr::null()),
                    SlotKind::Sampled => {
                        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, &sampler as *const _)
                    }
                    SlotKind::Storage => (vk::DescriptorType::STORAGE_IMAGE, ptr::null()),
                    SlotKind::Blend | SlotKind::Order => return None,
                };
                Some(vk::DescriptorSetLayoutBinding {
                    binding: i as u32,
                    descriptor_type,
                    descriptor_count: 1,
                    stage_flags: vk::ShaderStageFlags::COMPUTE,
                    p_immutable_samplers,
                })
            })
            .collect::<Vec<_>>();
        self.ds_layout = device
            .create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                None,
            )
            .map_err(Error::device)?;

        let push_constant_ranges = if self.has_push_constants() {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: PUSH_CONSTANTS_SIZE as u32,
            }]
        } else {
            Vec::new()
        };
        self.layout = device
            .create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&[self.ds_layout])
                    .push_constant_ranges(&push_constant_ranges),
                None,
            )
            .map_err(Error::device)?;
        for (i, code) in code.iter().enumerate() {
            self.shaders[i] = device
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(code), None)
                .map_err(Error::device)?;
        }
        let p_name = b"main\0".as_ptr() as *const _;
        let infos = self
            .shaders
            .iter()
            .map(|&module| vk::ComputePipelineCreateInfo {
                stage: vk::PipelineShaderStageCreateInfo {
                    stage: vk::ShaderStageFlags::COMPUTE,
                    module,
                    p_name,
                    ..Default::default()
                },
                layout: self.layout,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        let pipelines = device
            .create_compute_pipelines(vk::PipelineCache::null(), &infos, None)
            .map_err(|(_, e)| Error::device(e))?;
        self.pipelines.copy_from_slice(&pipelines);

        let count = |kind| {
            bindings
                .iter()
                .filter(|x| x.descriptor_type == kind)
                .count() as u32
        };
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_IMAGE,
        ]
        .iter()
        .filter(|&&ty| count(ty) > 0)
        .map(|&ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: count(ty),
        })
        .collect::<Vec<_>>();
        self.descriptor_pool = device
            .create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .max_sets(1)
                    .pool_sizes(&pool_sizes),
                None,
            )
            .map_err(Error::device)?;
        self.ds = device
            .allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(self.descriptor_pool)
                    .set_layouts(&[self.ds_layout]),
            )
            .map_err(Error::device)?[0];

        if let Some(binding) = slots.iter().position(|x| x.kind == SlotKind::Uniforms) {
            let buffer = Buffer::new(
                device,
                memory_props,
                mem::size_of::<AtmosphereUniforms>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;
            device.update_descriptor_sets(
                &[vk::WriteDescriptorSet {
                    dst_set: self.ds,
                    dst_binding: binding as u32,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &vk::DescriptorBufferInfo {
                        buffer: buffer.handle,
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    },
                    ..Default::default()
                }],
                &[],
            );
            self.uniforms = Some(buffer);
        }
        Ok(())
    }

    fn has_push_constants(&self) -> bool {
        self.kernel
            .slots()
            .iter()
            .any(|x| x.kind == SlotKind::Blend || x.kind == SlotKind::Order)
    }

    /// Descriptor binding of the slot named `name`, if it holds `kind`
    fn slot(&self, name: &str, kind: SlotKind) -> Result<u32> {
        let (binding, slot) = self
            .kernel
            .slots()
            .iter()
            .enumerate()
            .find(|(_, x)| x.name == name)
            .ok_or_else(|| {
                Error::configuration(format_args!(
                    "{} has no slot named {}",
                    self.kernel.name(),
                    name
                ))
            })?;
        if slot.kind != kind {
            return Err(Error::configuration(format_args!(
                "slot {} of {} holds {:?}",
                name,
                self.kernel.name(),
                slot.kind
            )));
        }
        Ok(binding as u32)
    }

    unsafe fn write_image(&self, device: &Device, binding: u32, view: vk::ImageView) {
        let descriptor_type = match self.kernel.slots()[binding as usize].kind {
            SlotKind::Sampled => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            _ => vk::DescriptorType::STORAGE_IMAGE,
        };
        device.update_descriptor_sets(
            &[vk::WriteDescriptorSet {
                dst_set: self.ds,
                dst_binding: binding,
                dst_array_element: 0,
                descriptor_count: 1,
                descriptor_type,
                p_image_info: &vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: vk::ImageLayout::GENERAL,
                },
                ..Default::default()
            }],
            &[],
        );
    }

    /// Destroy every handle created so far; null handles are ignored by Vulkan
    unsafe fn destroy(self, device: &Device) {
        if let Some(buffer) = self.uniforms {
            buffer.destroy(device);
        }
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        for pipeline in self.pipelines {
            device.destroy_pipeline(pipeline, None);
        }
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.ds_layout, None);
        for shader in self.shaders {
            device.destroy_shader_module(shader, None);
        }
    }
}

struct Image {
    handle: vk::Image,
    view: vk::ImageView,
    memory: vk::DeviceMemory,
    extent: Extent,
    format: Format,
}

impl Image {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.handle, None);
        device.free_memory(self.memory, None);
    }
}

/// Host-visible buffer
struct Buffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl Buffer {
    unsafe fn new(
        device: &Device,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let handle = device
            .create_buffer(
                &vk::BufferCreateInfo {
                    size,
                    usage,
                    sharing_mode: vk::SharingMode::EXCLUSIVE,
                    ..Default::default()
                },
                None,
            )
            .map_err(Error::device)?;
        let reqs = device.get_buffer_memory_requirements(handle);
        let memory = match allocate(
            device,
            memory_props,
            reqs,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(x) => x,
            Err(e) => {
                device.destroy_buffer(handle, None);
                return Err(e);
            }
        };
        let buffer = Self { handle, memory };
        if let Err(e) = device.bind_buffer_memory(handle, memory, 0) {
            buffer.destroy(device);
            return Err(Error::device(e));
        }
        Ok(buffer)
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_buffer(self.handle, None);
        device.free_memory(self.memory, None);
    }
}

fn find_memory_type(
    device_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..device_props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && device_props.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

unsafe fn allocate(
    device: &Device,
    device_props: &vk::PhysicalDeviceMemoryProperties,
    reqs: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let ty = find_memory_type(device_props, reqs.memory_type_bits, flags)
        .ok_or_else(|| Error::device(format_args!("no memory type with {:?}", flags)))?;
    device
        .allocate_memory(
            &vk::MemoryAllocateInfo {
                allocation_size: reqs.size,
                memory_type_index: ty,
                ..Default::default()
            },
            None,
        )
        .map_err(Error::device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kernel_is_embedded() {
        for &kernel in &Kernel::ALL {
            for code in spirv(kernel) {
                assert_eq!(code[0], 0x0723_0203, "{} is not SPIR-V", kernel.name());
            }
            assert_ne!(spirv(kernel)[0], spirv(kernel)[1]);
        }
        assert_eq!(format_index(Format::Rgba16Float), 0);
        assert_eq!(format_index(Format::Rgba32Float), 1);
    }

    #[test]
    fn decodes_packed_texels() {
        let half = [1.0f32, 0.5, -2.0, 0.0]
            .iter()
            .flat_map(|&x| f16::from_f32(x).to_bits().to_ne_bytes().to_vec())
            .collect::<Vec<u8>>();
        assert_eq!(
            decode(&half, Format::Rgba16Float),
            vec![[1.0, 0.5, -2.0, 0.0]]
        );

        let full = bytemuck::cast_slice::<f32, u8>(&[0.25, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
            .to_vec();
        assert_eq!(
            decode(&full, Format::Rgba32Float),
            vec![[0.25, 1.0, 2.0, 3.0], [4.0, 5.0, 6.0, 7.0]]
        );
    }

    #[test]
    fn memory_type_selection() {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 2;
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(
            find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
        assert_eq!(
            find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }
}
