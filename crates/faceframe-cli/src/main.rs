use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceframe::{spawn_surface, OnnxLoader, OpenOptions, SurfaceError, SurfaceHandle, SurfaceStatus};
use faceframe_core::{CaptureState, GuideGeometry, ViewportDims};
use faceframe_hw::{FacingMode, V4lDevice};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceframe", about = "Face-guided still capture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one photo once your face is centered in the guide
    Capture {
        /// Write the JPEG to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Title shown on the capture surface
        #[arg(long, default_value = "Profile photo")]
        title: String,
        /// Print the photo as a data URL (default when no --output is given)
        #[arg(long)]
        data_url: bool,
        /// How long the face must stay in the guide before the shot, in milliseconds
        #[arg(long, default_value_t = 500)]
        hold_ms: u64,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Use the rear camera
        #[arg(long)]
        rear: bool,
    },
    /// List video capture devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the guide circle for a viewport size
    Guide {
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture {
            output,
            title,
            data_url,
            hold_ms,
            timeout_secs,
            rear,
        } => {
            let config = Config::load()?;
            let capture = CaptureArgs {
                title,
                hold: Duration::from_millis(hold_ms),
                timeout: Duration::from_secs(timeout_secs),
                rear,
            };
            let photo = run_capture(&config, capture).await?;

            if let Some(path) = &output {
                std::fs::write(path, photo.bytes())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                let (width, height) = photo.dimensions();
                eprintln!("Saved {width}x{height} photo to {} ({} bytes)", path.display(), photo.len());
            }
            if data_url || output.is_none() {
                println!("{}", photo.to_data_url());
            }
        }
        Commands::Devices { json } => {
            let devices = V4lDevice::list_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No video capture devices found");
            } else {
                for device in devices {
                    println!("{}  {} (driver: {}, bus: {})", device.path, device.name, device.driver, device.bus);
                }
            }
        }
        Commands::Guide {
            width,
            height,
            json,
        } => {
            let viewport = ViewportDims::new(width, height);
            let guide = GuideGeometry::for_viewport(viewport);
            if json {
                let report = serde_json::json!({
                    "viewport": viewport,
                    "guide": guide,
                    "diameter": guide.diameter(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "viewport {viewport}: center ({:.1}, {:.1}), radius {:.1}, diameter {:.1}",
                    guide.center_x,
                    guide.center_y,
                    guide.radius,
                    guide.diameter()
                );
            }
        }
    }

    Ok(())
}

struct CaptureArgs {
    title: String,
    hold: Duration,
    timeout: Duration,
    rear: bool,
}

/// Open the surface, wait for a held alignment, capture and commit.
async fn run_capture(config: &Config, args: CaptureArgs) -> Result<faceframe::CapturedImage> {
    let mut surface_config = config.surface.clone();
    if args.rear {
        surface_config.facing = FacingMode::Environment;
    }
    let loader = OnnxLoader::new(config.model_path());
    tracing::info!(
        device = %config.camera_device,
        model = %loader.model_path().display(),
        "starting capture"
    );

    let surface = spawn_surface(config.device(), loader, surface_config)?;
    let (photo_tx, photo_rx) = tokio::sync::oneshot::channel();
    let options = OpenOptions::new(move |photo| {
        let _ = photo_tx.send(photo);
    })
    .title(args.title);
    surface.open(options).await?;

    match tokio::time::timeout(args.timeout, hold_and_capture(&surface, args.hold)).await {
        Ok(result) => result?,
        Err(_) => {
            surface.close().await?;
            bail!("no aligned face within {}s", args.timeout.as_secs());
        }
    }

    surface.commit().await?;
    photo_rx.await.context("capture surface closed without handing over a photo")
}

/// Wait until the face has stayed in the guide for `hold`, then capture.
async fn hold_and_capture(surface: &SurfaceHandle, hold: Duration) -> Result<()> {
    let mut status = surface.status();
    let started = status
        .wait_for(|s| s.is_running() || matches!(s, SurfaceStatus::Failed(_)))
        .await?
        .clone();
    match started {
        SurfaceStatus::Failed(message) => bail!("camera unavailable: {message}"),
        SurfaceStatus::Running { degraded: true } => {
            bail!("face detector unavailable; capture can never be enabled (is the model installed?)")
        }
        _ => {}
    }

    let mut state = surface.state();
    eprintln!("{}", CaptureState::None.hint());
    loop {
        tokio::select! {
            ready = state.wait_for(|s| *s == CaptureState::Ready) => {
                ready?;
            }
            failed = status.wait_for(|s| matches!(s, SurfaceStatus::Failed(_))) => {
                let message = match &*failed? {
                    SurfaceStatus::Failed(message) => message.clone(),
                    other => format!("{other:?}"),
                };
                bail!("camera failed: {message}");
            }
        }
        eprintln!("{}", CaptureState::Ready.hint());

        let left = tokio::time::timeout(hold, state.wait_for(|s| *s != CaptureState::Ready)).await;
        match left {
            Ok(changed) => {
                changed?;
                eprintln!("{}", CaptureState::None.hint());
            }
            Err(_) => match surface.capture().await {
                Ok(()) => {
                    eprintln!("{}", CaptureState::Captured.hint());
                    return Ok(());
                }
                // The face left between the hold expiring and the capture.
                Err(SurfaceError::Transition(e)) => tracing::debug!(error = %e, "capture raced alignment"),
                Err(e) => return Err(e.into()),
            },
        }
    }
}
