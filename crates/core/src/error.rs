use std::path::PathBuf;

/// Result alias that carries the custom [`AvatarError`] type.
pub type Result<T> = std::result::Result<T, AvatarError>;

/// Common error type for the core crate.
///
/// Where an error is raised decides how it is treated: startup paths return
/// it to `main`, the playback loop logs it and keeps the previous frame, the
/// reconfiguration controller hands it back to the user while the previous
/// configuration stays active.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// A media file required for the requested stage count does not exist.
    #[error("media file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// The decoder could not open or read a media file.
    #[error("failed to decode `{}`: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unsupported stage count {0}; expected 2, 3 or 4")]
    InvalidStageCount(u32),
    #[error("unsupported window size {width}x{height}")]
    InvalidWindowSize { width: u32, height: u32 },
    /// Capture device missing or the input stream could not be built.
    #[error("audio device error: {0}")]
    AudioDevice(String),
    /// Display creation, resize or presentation failed.
    #[error("display surface error: {0}")]
    Surface(String),
    #[error("{0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl AvatarError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
