mod display;
mod input;
mod settings;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use video_avatar_core::{
    AudioCapture, AudioConfig, AvatarError, AvatarSession, FfmpegOpener, FileConfigStore,
    MediaLibrary, PlaybackConfig, Scheduler, SettingsRequest, SharedStage, SignalClassifier,
    SourceOpener, StageCount,
};
use winit::{dpi::PhysicalSize, event_loop::EventLoop, window::WindowBuilder};

use crate::{display::WgpuSurface, input::WindowEvents};

const WINDOW_TITLE: &str = "Video Avatar";

fn main() -> video_avatar_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        Commands::Run(args) => run(&args),
        Commands::Devices => list_devices(),
        Commands::Probe { assets, stages } => probe(&assets, stages),
    }
}

fn run(args: &RunArgs) -> video_avatar_core::Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&args.assets));
    let store = FileConfigStore::new(config_path);
    let config = store.load();
    tracing::info!(?config, path = %store.path().display(), "loaded configuration");

    let mut event_loop = EventLoop::new().map_err(|err| AvatarError::Surface(err.to_string()))?;
    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(PhysicalSize::new(
            config.window_size.width,
            config.window_size.height,
        ))
        .with_resizable(false)
        .build(&event_loop)
        .map_err(|err| AvatarError::Surface(err.to_string()))?;
    let window = Arc::new(window);
    // Let the platform map the window before the first surface is created.
    let _ = winit::platform::pump_events::EventLoopExtPumpEvents::pump_events(
        &mut event_loop,
        Some(std::time::Duration::ZERO),
        |_, _| {},
    );
    let surface = WgpuSurface::new(window.clone(), config.window_size)?;

    let shared = SharedStage::new(config.num_stages);
    let opener = FfmpegOpener::new(&args.ffmpeg, &args.ffprobe);
    let mut session = AvatarSession::start(
        opener,
        MediaLibrary::new(&args.assets),
        config,
        surface,
        Box::new(store),
        shared.clone(),
    )?;

    let mut capture = match AudioCapture::start(
        &AudioConfig::default(),
        args.device.as_deref(),
        SignalClassifier::new(shared),
    ) {
        Ok(capture) => capture,
        Err(err) => {
            session.close();
            return Err(err);
        }
    };

    let mut events = WindowEvents::new(event_loop, window, WINDOW_TITLE, SettingsRequest::from(config));
    let mut scheduler = Scheduler::new(&PlaybackConfig::default());
    let result = scheduler.run(&mut session, &mut events);
    if let Err(err) = &result {
        tracing::error!(%err, "playback loop failed; shutting down");
    }

    session.close();
    capture.stop();
    result.map(|stats| tracing::info!(?stats, "exited"))
}

fn list_devices() -> video_avatar_core::Result<()> {
    let devices = AudioCapture::list_devices()?;
    if devices.is_empty() {
        return Err(AvatarError::AudioDevice(
            "no audio capture device available".to_string(),
        ));
    }
    for name in devices {
        println!("{name}");
    }
    Ok(())
}

fn probe(assets: &Path, stages: u32) -> video_avatar_core::Result<()> {
    let count = StageCount::try_from(stages)?;
    let library = MediaLibrary::new(assets);
    library.ensure_available(count)?;

    let opener = FfmpegOpener::default();
    for path in library.paths_for(count) {
        let info = opener.probe(&path)?;
        println!(
            "{}: {}x{} @ {:.2} fps, {:.2}s, {:?}",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.duration,
            info.orientation
        );
    }
    // Decoding the first frame catches files ffprobe accepts but ffmpeg can't read.
    for path in library.paths_for(count) {
        drop(opener.open(&path)?);
    }
    tracing::info!(stages = %count, "all media for stage count is usable");
    Ok(())
}

fn default_config_path(assets: &Path) -> PathBuf {
    assets
        .parent()
        .map(|dir| dir.join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Microphone-driven talking avatar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the avatar window and start listening (default).
    Run(RunArgs),
    /// List audio capture devices.
    Devices,
    /// Check that the clips for a stage count exist and decode.
    Probe {
        /// Directory holding `0.mp4`, `1.mp4`, ...
        #[arg(short, long, default_value = "assets")]
        assets: PathBuf,
        /// Stage count to check (2, 3 or 4).
        #[arg(short, long, default_value_t = 2)]
        stages: u32,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run(RunArgs::default())
    }
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory holding `0.mp4`, `1.mp4`, ...
    #[arg(short, long, default_value = "assets")]
    assets: PathBuf,
    /// Settings file; defaults to `config.json` beside the assets directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Capture device name (see `devices`); the system default otherwise.
    #[arg(short, long)]
    device: Option<String>,
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            assets: PathBuf::from("assets"),
            config: None,
            device: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}
