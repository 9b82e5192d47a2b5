//! Orchestration of the look-up table passes

use crate::backend::{ComputeBackend, Extent, KernelId, TextureData, TextureDesc, TextureId, Value};
use crate::color;
use crate::kernel::{self, Kernel};
use crate::parameters::{Luminance, Parameters};
use crate::spectrum::{LAMBDA_B, LAMBDA_G, LAMBDA_MAX, LAMBDA_MIN, LAMBDA_R};
use crate::uniforms::AtmosphereUniforms;
use crate::{Error, Result};

/// Number of scattering orders accounted for when none is given
pub const DEFAULT_SCATTERING_ORDERS: u32 = 4;

const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Precompute every table for `params` and copy them to host memory
///
/// Shorthand for `Precomputation::new(..).scattering_orders(..).run()` followed by
/// `LookupTables::read_back`.
pub fn precompute<B: ComputeBackend + ?Sized>(
    backend: &mut B,
    params: &Parameters,
    num_scattering_orders: u32,
) -> Result<Textures> {
    Precomputation::new(&mut *backend, params)
        .scattering_orders(num_scattering_orders)
        .run()?
        .read_back(backend)
}

/// Tables resident in a backend
///
/// Must be passed to `read_back` or `release` to free the backend's storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LookupTables {
    pub transmittance: TextureId,
    pub scattering: TextureId,
    /// Absent when single Mie scattering is combined into `scattering`
    pub single_mie_scattering: Option<TextureId>,
    pub irradiance: TextureId,
}

impl LookupTables {
    fn ids(&self) -> impl Iterator<Item = TextureId> {
        [
            Some(self.transmittance),
            Some(self.scattering),
            self.single_mie_scattering,
            Some(self.irradiance),
        ]
        .into_iter()
        .flatten()
    }

    /// Copy the tables to host memory, then release them
    ///
    /// The tables are released even if reading fails.
    pub fn read_back<B: ComputeBackend + ?Sized>(self, backend: &mut B) -> Result<Textures> {
        let result = self.read_all(backend);
        self.release(backend);
        result
    }

    fn read_all<B: ComputeBackend + ?Sized>(&self, backend: &mut B) -> Result<Textures> {
        Ok(Textures {
            transmittance: backend.read_back(self.transmittance)?,
            scattering: backend.read_back(self.scattering)?,
            single_mie_scattering: match self.single_mie_scattering {
                Some(id) => Some(backend.read_back(id)?),
                None => None,
            },
            irradiance: backend.read_back(self.irradiance)?,
        })
    }

    pub fn release<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        for id in self.ids() {
            backend.release_texture(id);
        }
    }
}

/// Precomputed tables in host memory
#[derive(Debug, Clone, PartialEq)]
pub struct Textures {
    /// 2D, (mu, r)
    pub transmittance: TextureData,
    /// 3D, (nu * mu_s, mu, r); alpha holds the red channel of single Mie scattering
    pub scattering: TextureData,
    pub single_mie_scattering: Option<TextureData>,
    /// 2D, (mu_s, r)
    pub irradiance: TextureData,
}

/// A single run of the precomputation passes on a backend
pub struct Precomputation<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    params: &'a Parameters,
    scattering_orders: u32,
}

impl<'a, B: ComputeBackend + ?Sized> Precomputation<'a, B> {
    pub fn new(backend: &'a mut B, params: &'a Parameters) -> Self {
        Self {
            backend,
            params,
            scattering_orders: DEFAULT_SCATTERING_ORDERS,
        }
    }

    /// Number of scattering events to account for; at least 1
    pub fn scattering_orders(mut self, n: u32) -> Self {
        self.scattering_orders = n;
        self
    }

    /// Run every pass, leaving the results in the backend
    ///
    /// On failure, every texture allocated by the run has been released.
    pub fn run(self) -> Result<LookupTables> {
        let params = self.params;
        if self.scattering_orders < 1 {
            return Err(Error::validation(format_args!(
                "at least one scattering order is required, got {}",
                self.scattering_orders
            )));
        }
        let kernels = Kernels::resolve(&mut *self.backend)?;

        log::info!(
            "precomputing {} scattering orders, {:?} luminance, {:?}",
            self.scattering_orders,
            params.luminance,
            params.format()
        );
        let mut run = Run::new(self.backend, params, kernels, self.scattering_orders)?;

        match params.luminance {
            Luminance::Precomputed => {
                // Integrate the spectrum in batches of three wavelengths, accumulating luminance
                let n = params.num_precomputed_wavelengths();
                let dlambda = f64::from(LAMBDA_MAX - LAMBDA_MIN) / n as f64;
                for i in 0..(n + 2) / 3 {
                    let lambdas = [0usize, 1, 2]
                        .map(|k| f64::from(LAMBDA_MIN) + ((3 * i + k) as f64 + 0.5) * dlambda);
                    log::debug!("batch {} at {:?} nm", i, lambdas);
                    run.batch(
                        lambdas,
                        color::luminance_from_radiance(lambdas, dlambda),
                        i > 0,
                    )?;
                }
                // Consumers read transmittance at the RGB wavelengths
                let uniforms =
                    AtmosphereUniforms::new(params, [LAMBDA_R, LAMBDA_G, LAMBDA_B], IDENTITY);
                run.bind_uniforms(&uniforms)?;
                run.transmittance()?;
            }
            Luminance::None | Luminance::Approximate => {
                run.batch([LAMBDA_R, LAMBDA_G, LAMBDA_B], IDENTITY, false)?;
            }
        }

        Ok(run.finish())
    }
}

struct Kernels {
    transmittance: KernelId,
    direct_irradiance: KernelId,
    single_scattering: KernelId,
    scattering_density: KernelId,
    indirect_irradiance: KernelId,
    multiple_scattering: KernelId,
}

impl Kernels {
    fn resolve<B: ComputeBackend + ?Sized>(backend: &mut B) -> Result<Self> {
        let mut resolve = |k: Kernel| backend.resolve_kernel(k.name());
        Ok(Self {
            transmittance: resolve(Kernel::Transmittance)?,
            direct_irradiance: resolve(Kernel::DirectIrradiance)?,
            single_scattering: resolve(Kernel::SingleScattering)?,
            scattering_density: resolve(Kernel::ScatteringDensity)?,
            indirect_irradiance: resolve(Kernel::IndirectIrradiance)?,
            multiple_scattering: resolve(Kernel::MultipleScattering)?,
        })
    }

    fn all(&self) -> [KernelId; 6] {
        [
            self.transmittance,
            self.direct_irradiance,
            self.single_scattering,
            self.scattering_density,
            self.indirect_irradiance,
            self.multiple_scattering,
        ]
    }
}

/// Textures of a run in progress
///
/// Everything still owned when dropped is released, so an early return leaks nothing.
struct Run<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    params: &'a Parameters,
    kernels: Kernels,
    scattering_orders: u32,
    transmittance_extent: Extent,
    irradiance_extent: Extent,
    scattering_extent: Extent,
    allocated: Vec<TextureId>,
    transmittance: TextureId,
    irradiance: TextureId,
    scattering: TextureId,
    single_mie_scattering: Option<TextureId>,
    delta_irradiance: TextureId,
    delta_rayleigh: TextureId,
    delta_mie: TextureId,
    scattering_density: TextureId,
    delta_multiple_scattering: TextureId,
}

impl<B: ComputeBackend + ?Sized> Drop for Run<'_, B> {
    fn drop(&mut self) {
        for &id in &self.allocated {
            self.backend.release_texture(id);
        }
    }
}

impl<'a, B: ComputeBackend + ?Sized> Run<'a, B> {
    fn new(
        backend: &'a mut B,
        params: &'a Parameters,
        kernels: Kernels,
        scattering_orders: u32,
    ) -> Result<Self> {
        let format = params.format();
        let res = &params.resolution;
        let (transmittance_extent, irradiance_extent, scattering_extent) = (
            res.transmittance_extent(),
            res.irradiance_extent(),
            res.scattering_extent(),
        );
        let invalid = TextureId(u32::MAX);
        let mut run = Self {
            backend,
            params,
            kernels,
            scattering_orders,
            transmittance_extent,
            irradiance_extent,
            scattering_extent,
            allocated: Vec::with_capacity(9),
            transmittance: invalid,
            irradiance: invalid,
            scattering: invalid,
            single_mie_scattering: None,
            delta_irradiance: invalid,
            delta_rayleigh: invalid,
            delta_mie: invalid,
            scattering_density: invalid,
            delta_multiple_scattering: invalid,
        };
        let plane = |name, extent| TextureDesc {
            name,
            extent,
            format,
            volume: false,
        };
        let volume = |name| TextureDesc {
            name,
            extent: scattering_extent,
            format,
            volume: true,
        };
        run.transmittance = run.alloc(&plane("transmittance", transmittance_extent))?;
        run.irradiance = run.alloc(&plane("irradiance", irradiance_extent))?;
        run.scattering = run.alloc(&volume("scattering"))?;
        if !params.combine_scattering_textures {
            run.single_mie_scattering = Some(run.alloc(&volume("single_mie_scattering"))?);
        }
        run.delta_irradiance = run.alloc(&plane("delta_irradiance", irradiance_extent))?;
        run.delta_rayleigh = run.alloc(&volume("delta_rayleigh"))?;
        run.delta_mie = run.alloc(&volume("delta_mie"))?;
        run.scattering_density = run.alloc(&volume("scattering_density"))?;
        run.delta_multiple_scattering = run.alloc(&volume("delta_multiple_scattering"))?;
        run.bind_textures()?;
        Ok(run)
    }

    fn alloc(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let id = self.backend.create_texture(desc)?;
        self.allocated.push(id);
        Ok(id)
    }

    /// Textures never change within a run, so they're bound once up front
    fn bind_textures(&mut self) -> Result<()> {
        use kernel::*;
        let k = &self.kernels;
        let mut bindings = vec![
            (k.transmittance, TRANSMITTANCE, self.transmittance),
            (k.direct_irradiance, TRANSMITTANCE_TEXTURE, self.transmittance),
            (k.direct_irradiance, DELTA_IRRADIANCE, self.delta_irradiance),
            (k.direct_irradiance, IRRADIANCE, self.irradiance),
            (k.single_scattering, TRANSMITTANCE_TEXTURE, self.transmittance),
            (k.single_scattering, DELTA_RAYLEIGH, self.delta_rayleigh),
            (k.single_scattering, DELTA_MIE, self.delta_mie),
            (k.single_scattering, SCATTERING, self.scattering),
            (k.scattering_density, TRANSMITTANCE_TEXTURE, self.transmittance),
            (k.scattering_density, SINGLE_RAYLEIGH_SCATTERING_TEXTURE, self.delta_rayleigh),
            (k.scattering_density, SINGLE_MIE_SCATTERING_TEXTURE, self.delta_mie),
            (k.scattering_density, MULTIPLE_SCATTERING_TEXTURE, self.delta_multiple_scattering),
            (k.scattering_density, IRRADIANCE_TEXTURE, self.delta_irradiance),
            (k.scattering_density, SCATTERING_DENSITY, self.scattering_density),
            (k.indirect_irradiance, SINGLE_RAYLEIGH_SCATTERING_TEXTURE, self.delta_rayleigh),
            (k.indirect_irradiance, SINGLE_MIE_SCATTERING_TEXTURE, self.delta_mie),
            (k.indirect_irradiance, MULTIPLE_SCATTERING_TEXTURE, self.delta_multiple_scattering),
            (k.indirect_irradiance, DELTA_IRRADIANCE, self.delta_irradiance),
            (k.indirect_irradiance, IRRADIANCE, self.irradiance),
            (k.multiple_scattering, TRANSMITTANCE_TEXTURE, self.transmittance),
            (k.multiple_scattering, SCATTERING_DENSITY_TEXTURE, self.scattering_density),
            (k.multiple_scattering, DELTA_MULTIPLE_SCATTERING, self.delta_multiple_scattering),
            (k.multiple_scattering, SCATTERING, self.scattering),
        ];
        if let Some(single_mie) = self.single_mie_scattering {
            bindings.push((k.single_scattering, SINGLE_MIE_SCATTERING, single_mie));
        }
        for (kernel, slot, texture) in bindings {
            self.backend.bind_texture(kernel, slot, texture)?;
        }
        Ok(())
    }

    fn bind_uniforms(&mut self, uniforms: &AtmosphereUniforms) -> Result<()> {
        let bytes = bytemuck::bytes_of(uniforms);
        for kernel in self.kernels.all() {
            self.backend.bind_buffer(kernel, kernel::ATMOSPHERE, bytes)?;
        }
        Ok(())
    }

    fn blend(&mut self, kernel: KernelId, blend: [f32; 4]) -> Result<()> {
        self.backend
            .bind_scalar(kernel, kernel::BLEND, Value::Vec4(blend))
    }

    fn order(&mut self, kernel: KernelId, order: u32) -> Result<()> {
        self.backend
            .bind_scalar(kernel, kernel::SCATTERING_ORDER, Value::Int(order as i32))
    }

    fn transmittance(&mut self) -> Result<()> {
        log::debug!("transmittance");
        self.backend.dispatch(
            self.kernels.transmittance,
            self.transmittance_extent.group_count(),
        )
    }

    /// Compute every table at three wavelengths
    ///
    /// With `accumulate`, results are added to the accumulated irradiance and scattering tables
    /// instead of replacing them.
    fn batch(
        &mut self,
        lambdas: [f64; 3],
        luminance_from_radiance: [[f64; 3]; 3],
        accumulate: bool,
    ) -> Result<()> {
        let blend = if accumulate { 1.0 } else { 0.0 };
        let uniforms = AtmosphereUniforms::new(self.params, lambdas, luminance_from_radiance);
        self.bind_uniforms(&uniforms)?;

        self.transmittance()?;

        log::debug!("direct irradiance");
        let k = self.kernels.direct_irradiance;
        self.blend(k, [0.0, blend, 0.0, 0.0])?;
        self.backend.dispatch(k, self.irradiance_extent.group_count())?;

        log::debug!("single scattering");
        let k = self.kernels.single_scattering;
        self.blend(k, [0.0, 0.0, blend, blend])?;
        self.backend.dispatch(k, self.scattering_extent.group_count())?;

        // Compute higher-order effects
        for order in 2..=self.scattering_orders {
            log::debug!("scattering order {}", order);

            let k = self.kernels.scattering_density;
            self.order(k, order)?;
            self.backend.dispatch(k, self.scattering_extent.group_count())?;

            let k = self.kernels.indirect_irradiance;
            self.blend(k, [0.0, 1.0, 0.0, 0.0])?;
            self.order(k, order - 1)?;
            self.backend.dispatch(k, self.irradiance_extent.group_count())?;

            let k = self.kernels.multiple_scattering;
            self.blend(k, [0.0, 1.0, 0.0, 0.0])?;
            self.backend.dispatch(k, self.scattering_extent.group_count())?;
        }
        Ok(())
    }

    /// Hand the output tables to the caller, releasing the intermediates
    fn finish(mut self) -> LookupTables {
        let tables = LookupTables {
            transmittance: self.transmittance,
            scattering: self.scattering,
            single_mie_scattering: self.single_mie_scattering,
            irradiance: self.irradiance,
        };
        self.allocated.retain(|id| !tables.ids().any(|x| x == *id));
        tables
    }
}
