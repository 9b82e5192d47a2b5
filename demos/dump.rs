//! Precompute Earth's atmosphere on the CPU and write the tables out as OpenEXR images
//!
//! Volumes are written as their depth slices stacked vertically. The material bindings a sky
//! shader would need go to `material.ron` alongside them.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use image::{DynamicImage, ImageBuffer, Rgba};
use skylut::{precompute, texture_bindings, CpuBackend, MaterialBindings, Parameters, Settings};

#[derive(Parser, Debug)]
#[command(name = "dump", about = "Dump precomputed atmosphere tables")]
struct Args {
    /// RON settings file; defaults are used, and written there, if it doesn't exist
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Number of scattering orders to compute
    #[arg(long, default_value_t = skylut::DEFAULT_SCATTERING_ORDERS)]
    orders: u32,

    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let args = Args::parse();

    let settings = match args.settings {
        Some(ref path) if path.exists() => Settings::load(path)?,
        Some(ref path) => {
            let settings = Settings::default();
            settings.save(path)?;
            settings
        }
        None => Settings::default(),
    };
    let params = Parameters::from_settings(&settings)?;

    let start = std::time::Instant::now();
    let textures = precompute(&mut CpuBackend::new(), &params, args.orders)?;
    log::info!("precomputed in {:?}", start.elapsed());

    fs::create_dir_all(&args.out)?;
    for (name, texture) in texture_bindings(&textures).iter() {
        write_image(&args.out.join(format!("{}.exr", name)), texture)?;
    }

    let material = MaterialBindings::new(&settings, &params);
    let material = ron::ser::to_string_pretty(&material, ron::ser::PrettyConfig::new())?;
    fs::write(args.out.join("material.ron"), material)?;
    Ok(())
}

fn write_image(
    path: &Path,
    texture: &skylut::TextureData,
) -> Result<(), Box<dyn std::error::Error>> {
    let extent = texture.extent;
    let data = texture.texels.iter().flatten().copied().collect::<Vec<f32>>();
    let image =
        ImageBuffer::<Rgba<f32>, _>::from_raw(extent.width, extent.height * extent.depth, data)
            .ok_or("texel count doesn't match extent")?;
    DynamicImage::ImageRgba32F(image).save(path)?;
    log::info!(
        "wrote {} ({}x{}x{})",
        path.display(),
        extent.width,
        extent.height,
        extent.depth
    );
    Ok(())
}
