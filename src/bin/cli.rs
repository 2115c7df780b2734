use std::fs;
use std::path::PathBuf;

use borderfield::{BorderConfig, BorderPipeline, Rgba8, SoftwareDevice, Texture2D, synth};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Градиентные границы провинций по растровой карте
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Прогоняет весь конвейер и сохраняет текстуры в output_dir
    Run {
        /// Путь к конфигурационному файлу в формате TOML
        #[arg(short, long)]
        config: PathBuf,

        /// Печатать сводку по провинциям и границам в JSON
        #[arg(long)]
        json: bool,
    },
    /// Генерирует синтетическую карту идентификаторов и текстуру соответствия
    Synth {
        /// Сторона квадратной карты в пикселях
        #[arg(long, default_value_t = 256)]
        size: u32,

        #[arg(long, default_value_t = 64)]
        provinces: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Каталог для identifier.png и lookup.png
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct ProvinceSummary {
    id: u32,
    color: String,
    pixels: usize,
    min_xy: Option<[f32; 2]>,
    max_xy: Option<[f32; 2]>,
}

#[derive(Serialize)]
struct BorderSummary {
    id: u32,
    provinces: (u32, u32),
    bitmask: u8,
    pixels: usize,
}

#[derive(Serialize)]
struct RunSummary {
    width: u32,
    height: u32,
    provinces: Vec<ProvinceSummary>,
    borders: Vec<BorderSummary>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run { config, json } => run(config, json),
        Command::Synth {
            size,
            provinces,
            seed,
            out,
        } => {
            info!(size, provinces, seed, "генерация синтетической карты");
            let map = synth::generate(size, size, provinces, seed)?;
            fs::create_dir_all(&out)?;
            map.identifier.save_png(out.join("identifier.png"))?;
            map.lookup.save_png(out.join("lookup.png"))?;
            info!(dir = %out.display(), "карта сохранена");
            Ok(())
        }
    }
}

fn run(config_path: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!(path = %config_path.display(), "загрузка конфигурации");
    let config = BorderConfig::from_toml_file(&config_path)?;

    let identifier = config
        .identifier_path
        .as_ref()
        .map(|path| Texture2D::<Rgba8>::load_png(path))
        .transpose()?;
    let lookup = config
        .lookup_path
        .as_ref()
        .map(|path| Texture2D::<Rgba8>::load_png(path))
        .transpose()?;
    let output_dir = config.output_dir.clone();
    let mut pipeline = BorderPipeline::initialize(
        SoftwareDevice::new(),
        config,
        identifier.as_ref(),
        lookup.as_ref(),
    )?;
    info!(threads = pipeline.worker_threads(), "конвейер готов");

    let mut registry = pipeline.build_registry();
    info!(provinces = registry.len(), "реестр провинций построен");

    pipeline.recolor(&registry)?;
    pipeline.aggregate_provinces(&mut registry)?;
    let borders = pipeline.build_borders(&registry)?;

    fs::create_dir_all(&output_dir)?;
    pipeline.indirection().save_png(output_dir.join("indirection.png"))?;
    if let Some(display) = pipeline.display_colors() {
        display.save_png(output_dir.join("display.png"))?;
    }
    pipeline
        .read_distance_field()?
        .save_png(output_dir.join("distance.png"))?;
    pipeline
        .border_bitmask()?
        .save_png(output_dir.join("bitmask.png"))?;
    info!(dir = %output_dir.display(), "текстуры сохранены");

    if json {
        let summary = RunSummary {
            width: pipeline.width(),
            height: pipeline.height(),
            provinces: registry
                .iter()
                .map(|p| ProvinceSummary {
                    id: p.id(),
                    color: p.color().to_string(),
                    pixels: p.pixel_size,
                    min_xy: p.min_xy,
                    max_xy: p.max_xy,
                })
                .collect(),
            borders: borders
                .iter()
                .map(|b| BorderSummary {
                    id: b.id,
                    provinces: b.provinces,
                    bitmask: b.bitmask,
                    pixels: b.pixels.len(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    pipeline.release()?;
    info!("готово");
    Ok(())
}
