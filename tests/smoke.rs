#![cfg(feature = "vulkan")]

use std::cell::Cell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;

use ash::version::{DeviceV1_0, EntryV1_0, InstanceV1_0};
use ash::{extensions::ext::DebugReport, vk, Entry};
use renderdoc::{RenderDoc, V100};

#[test]
#[ignore]
fn smoke() {
    let had_error = Cell::new(false);
    let mut rd = RenderDoc::<V100>::new().ok();

    unsafe {
        let entry = Entry::new().unwrap();
        let app_name = CStr::from_bytes_with_nul(b"skylut smoke test\0").unwrap();
        let instance = entry
            .create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(
                        &vk::ApplicationInfo::builder()
                            .application_name(&app_name)
                            .application_version(0)
                            .engine_name(&app_name)
                            .engine_version(0)
                            .api_version(vk::make_version(1, 0, 36)),
                    )
                    .enabled_extension_names(&[DebugReport::name().as_ptr()]),
                None,
            )
            .unwrap();

        let debug_report_loader = DebugReport::new(&entry, &instance);
        let debug_call_back = debug_report_loader
            .create_debug_report_callback(
                &vk::DebugReportCallbackCreateInfoEXT::builder()
                    .flags(
                        vk::DebugReportFlagsEXT::ERROR
                            | vk::DebugReportFlagsEXT::WARNING
                            | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING
                            | vk::DebugReportFlagsEXT::INFORMATION,
                    )
                    .pfn_callback(Some(vulkan_debug_callback))
                    .user_data(&had_error as *const _ as *mut _),
                None,
            )
            .unwrap();

        let (pdevice, queue_family_index) = instance
            .enumerate_physical_devices()
            .unwrap()
            .iter()
            .map(|pdevice| {
                instance
                    .get_physical_device_queue_family_properties(*pdevice)
                    .iter()
                    .enumerate()
                    .filter_map(|(index, ref info)| {
                        if info.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                            Some((*pdevice, index as u32))
                        } else {
                            None
                        }
                    })
                    .next()
            })
            .filter_map(|v| v)
            .next()
            .expect("no compute device available");

        let device = Arc::new(
            instance
                .create_device(
                    pdevice,
                    &vk::DeviceCreateInfo::builder()
                        .queue_create_infos(&[vk::DeviceQueueCreateInfo::builder()
                            .queue_family_index(queue_family_index)
                            .queue_priorities(&[1.0])
                            .build()])
                        .enabled_features(&vk::PhysicalDeviceFeatures {
                            robust_buffer_access: vk::TRUE,
                            ..Default::default()
                        }),
                    None,
                )
                .unwrap(),
        );
        if let Some(ref mut rd) = rd {
            rd.start_frame_capture(renderdoc::DevicePointer::from(ptr::null()), ptr::null());
        }

        let mut backend = skylut::VulkanBackend::new(
            &instance,
            device.clone(),
            pdevice,
            queue_family_index,
        )
        .unwrap();

        // Simplified for speed
        let params = skylut::Parameters::from_settings(&skylut::Settings {
            resolution: skylut::Resolution {
                scattering_r_size: 8,
                scattering_mu_size: 32,
                scattering_mu_s_size: 8,
                scattering_nu_size: 2,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let textures = skylut::precompute(&mut backend, &params, 4).unwrap();
        drop(backend);

        if let Some(ref mut rd) = rd {
            rd.end_frame_capture(renderdoc::DevicePointer::from(ptr::null()), ptr::null());
        }

        for texture in &[&textures.transmittance, &textures.scattering, &textures.irradiance] {
            texture.validate().unwrap();
            assert!(texture.texels.iter().flatten().all(|x| x.is_finite()));
        }

        // Hardware filtering is coarser than the host's, so only expect rough agreement
        let host = skylut::precompute(&mut skylut::CpuBackend::new(), &params, 4).unwrap();
        for (gpu, cpu) in textures
            .transmittance
            .texels
            .iter()
            .zip(&host.transmittance.texels)
        {
            for c in 0..4 {
                assert!((gpu[c] - cpu[c]).abs() < 1e-2, "{:?} vs {:?}", gpu, cpu);
            }
        }
        let total = |t: &skylut::TextureData| {
            t.texels.iter().map(|x| f64::from(x[0] + x[1] + x[2])).sum::<f64>()
        };
        for (gpu, cpu) in [
            (&textures.scattering, &host.scattering),
            (&textures.irradiance, &host.irradiance),
        ] {
            let (gpu, cpu) = (total(gpu), total(cpu));
            assert!((gpu - cpu).abs() <= 0.05 * cpu, "{} vs {}", gpu, cpu);
        }

        device.destroy_device(None);
        debug_report_loader.destroy_debug_report_callback(debug_call_back, None);
        instance.destroy_instance(None);
    }

    if had_error.get() {
        panic!("vulkan reported an error");
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    flags: vk::DebugReportFlagsEXT,
    _: vk::DebugReportObjectTypeEXT,
    _: u64,
    _: usize,
    _: i32,
    _: *const c_char,
    p_message: *const c_char,
    user_data: *mut c_void,
) -> u32 {
    eprintln!(
        "{:?} {}",
        flags,
        CStr::from_ptr(p_message).to_string_lossy()
    );
    if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
        let had_error = &*(user_data as *const Cell<bool>);
        had_error.set(true);
    }
    vk::FALSE
}
