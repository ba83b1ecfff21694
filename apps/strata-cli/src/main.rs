mod app;
mod scene;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use strata_common::Extent2D;
use strata_gfx::{CompletionMode, GpuDevice, HeadlessDevice};
use strata_render::RenderSettings;
use strata_render_wgpu::WgpuDevice;
use tracing_subscriber::EnvFilter;

use crate::app::{App, RunReport};

#[derive(Parser)]
#[command(name = "strata-cli", about = "Drive the strata renderers without a window")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-memory device that records submissions
    Mock,
    /// wgpu on the first suitable adapter
    Wgpu,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions and the default settings
    Info,
    /// Render a number of frames and print statistics
    Run {
        /// Number of frames to render
        #[arg(short, long, default_value = "120")]
        frames: u64,
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
        /// Overrides the settings file for both renderers
        #[arg(long)]
        frames_in_flight: Option<usize>,
        /// Frame index at which to resize
        #[arg(long)]
        resize_at: Option<u64>,
        /// Size applied at `--resize-at`, as WIDTHxHEIGHT
        #[arg(long, default_value = "1920x1080", value_parser = parse_extent)]
        resize_to: Extent2D,
        #[arg(long, value_enum, default_value = "mock")]
        backend: BackendKind,
        /// YAML render settings
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Mock backend only: complete one submission per frame instead of
        /// immediately
        #[arg(long)]
        manual: bool,
        /// Number of spinning cubes in the scene
        #[arg(long, default_value = "12")]
        cubes: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_extent(text: &str) -> Result<Extent2D, String> {
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{text}'"))?;
    let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Ok(Extent2D::new(width, height))
}

enum Backend {
    Mock { device: HeadlessDevice, manual: bool },
    Wgpu(Box<WgpuDevice>),
}

impl Backend {
    fn open(kind: BackendKind, manual: bool) -> anyhow::Result<Self> {
        Ok(match kind {
            BackendKind::Mock => {
                let mode = if manual {
                    CompletionMode::Manual
                } else {
                    CompletionMode::Immediate
                };
                Backend::Mock {
                    device: HeadlessDevice::with_mode(mode),
                    manual,
                }
            }
            BackendKind::Wgpu => {
                let device = WgpuDevice::new_headless()?;
                let info = device.adapter_info();
                tracing::info!(adapter = %info.name, backend = ?info.backend, "using wgpu");
                Backend::Wgpu(Box::new(device))
            }
        })
    }

    fn device(&mut self) -> &mut dyn GpuDevice {
        match self {
            Backend::Mock { device, .. } => device,
            Backend::Wgpu(device) => device.as_mut(),
        }
    }

    /// Let the mock GPU make progress between frames.
    fn end_frame(&mut self) {
        if let Backend::Mock {
            device,
            manual: true,
        } = self
        {
            device.advance(1);
        }
    }

    fn hazards(&self) -> usize {
        match self {
            Backend::Mock { device, .. } => device.hazards().len(),
            Backend::Wgpu(_) => 0,
        }
    }
}

fn load_settings(
    config: Option<PathBuf>,
    frames_in_flight: Option<usize>,
) -> anyhow::Result<RenderSettings> {
    let mut settings = match config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading render settings");
            RenderSettings::load(&path)?
        }
        None => RenderSettings::default(),
    };
    if let Some(frames) = frames_in_flight {
        settings.set_frames_in_flight(frames);
    }
    settings.validate()?;
    Ok(settings)
}

fn print_report(report: &RunReport) {
    println!("backend: {}", report.backend);
    println!(
        "frames: {} ({} world, {} in flight, {} resizes)",
        report.frames, report.world_frames, report.frames_in_flight, report.resizes
    );
    println!(
        "world: objects={} draws={} skipped={} pipeline_binds={}",
        report.objects, report.world_draws, report.world_skipped, report.world_pipeline_binds
    );
    println!(
        "gui: draws={} invalid={} clipped={} buffers_grown={}",
        report.gui_draws, report.gui_invalid, report.gui_clipped, report.gui_buffers_grown
    );
    println!("hazards: {}", report.hazards);
    for scope in &report.scopes {
        println!(
            "  {:<16} n={:<5} avg={}us max={}us",
            scope.name, scope.samples, scope.average_us, scope.max_us
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Info => {
            println!("strata-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("gfx: {}", strata_gfx::crate_info());
            println!("ecs: {}", strata_ecs::crate_info());
            println!("assets: {}", strata_assets::crate_info());
            println!("render: {}", strata_render::crate_info());
            println!("render-wgpu: {}", strata_render_wgpu::crate_info());
            println!("default settings:\n{}", RenderSettings::default().to_yaml_string()?);
        }
        Commands::Run {
            frames,
            width,
            height,
            frames_in_flight,
            resize_at,
            resize_to,
            backend,
            config,
            manual,
            cubes,
            json,
        } => {
            let settings = load_settings(config, frames_in_flight)?;
            let mut backend = Backend::open(backend, manual)?;
            let size = Extent2D::new(width, height);
            let mut app = App::new(backend.device(), &settings, size, cubes)?;
            let mut report = RunReport {
                backend: backend.device().name().to_owned(),
                ..RunReport::default()
            };
            let delta = 1.0 / 60.0;
            for n in 0..frames {
                let resize = (resize_at == Some(n)).then_some(resize_to);
                let frame = app.frame(backend.device(), delta, resize)?;
                report.record(&frame);
                backend.end_frame();
            }
            app.finish_report(&mut report);
            app.shutdown(backend.device())?;
            report.hazards = backend.hazards();

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}
