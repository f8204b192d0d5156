//! Core library for the Video Avatar application.
//!
//! Microphone loudness picks a mouth-openness stage; each stage has a looping
//! clip; a fixed-rate loop shows the clip of the current stage. Each module
//! owns one piece of that chain (classification, stage table, capture, video
//! sources, presentation, scheduling, settings) so the windowed binary only
//! has to plug in a real display and event loop.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod render;
pub mod session;
pub mod stage;
pub mod timeline;
pub mod video;

pub use analysis::{compute_rms, BlockAnalysis, BlockStatus, SignalClassifier};
pub use assets::MediaLibrary;
pub use audio::{append_downmixed_samples, AudioCapture, BlockAccumulator};
pub use config::{AppConfig, AudioConfig, ConfigStore, FileConfigStore, PlaybackConfig};
pub use error::{AvatarError, Result};
pub use render::{scale_frame, Surface, WindowSize};
pub use session::{Applied, AvatarSession, ReconfigState, SettingsRequest};
pub use stage::{SharedStage, Stage, StageCount, ThresholdSet};
pub use timeline::{
    EventSource, PlaybackClock, PlayerEvent, Scheduler, TickOutcome, TickStats, Ticker,
};
pub use video::{
    ensure_present, loop_position, FfmpegOpener, FfmpegSource, Frame, FrameSource, Orientation,
    SourceInfo, SourceOpener, VideoSourceSet,
};
