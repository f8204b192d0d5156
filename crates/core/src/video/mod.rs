//! Per-stage looping video sources.
//!
//! Each stage owns one [`FrameSource`]. A [`VideoSourceSet`] is opened as a
//! whole and replaced as a whole; it is never patched in place.

mod ffmpeg;

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{AvatarError, Result, Stage};

pub use ffmpeg::{FfmpegOpener, FfmpegSource};

/// A decoded RGB24 picture. Cloning shares the pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 3;

    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(AvatarError::InvalidInput(
                "pixel buffer does not match frame dimensions",
            ));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// A frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let pixels: Vec<u8> = rgb.iter().copied().cycle().take(count * 3).collect();
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// How a source is turned at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Native,
    /// Portrait material rotated 90° counter-clockwise into landscape.
    Rotated90,
}

impl Orientation {
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        if width < height {
            Orientation::Rotated90
        } else {
            Orientation::Native
        }
    }

    /// Dimensions after applying this orientation.
    pub fn apply(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Orientation::Native => (width, height),
            Orientation::Rotated90 => (height, width),
        }
    }
}

/// Stream properties of an opened source, already oriented.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub orientation: Orientation,
}

impl SourceInfo {
    /// Builds the info for a stream with the given native dimensions,
    /// choosing the orientation from them.
    pub fn oriented(native_width: u32, native_height: u32, fps: f64, duration: f64) -> Self {
        let orientation = Orientation::for_dimensions(native_width, native_height);
        let (width, height) = orientation.apply(native_width, native_height);
        Self {
            width,
            height,
            fps,
            duration,
            orientation,
        }
    }

    /// Index of the frame shown at `seconds` into the loop.
    pub fn frame_index(&self, seconds: f64) -> u64 {
        let position = loop_position(seconds, self.duration);
        ((position * self.fps).floor() as u64).min(self.frame_count() - 1)
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration * self.fps).floor().max(1.0) as u64
    }
}

/// Position of `seconds` within a loop of length `duration`.
pub fn loop_position(seconds: f64, duration: f64) -> f64 {
    if duration.is_nan() || duration <= 0.0 || !seconds.is_finite() {
        return 0.0;
    }
    seconds.rem_euclid(duration)
}

/// A decodable, seamlessly looping frame source.
pub trait FrameSource {
    fn info(&self) -> &SourceInfo;

    /// Frame at `seconds`, taken modulo the source duration. `None` when the
    /// frame could not be produced; the caller keeps showing what it had.
    fn frame_at(&mut self, seconds: f64) -> Option<Frame>;

    /// Releases decoder resources. Safe to call more than once.
    fn close(&mut self);
}

/// Opens a [`FrameSource`] for a media file.
pub trait SourceOpener {
    type Source: FrameSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;

    /// Whether `path` is there to be opened.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Fails with the first of `paths` that `opener` cannot find, without
/// opening anything.
pub fn ensure_present<O: SourceOpener>(opener: &O, paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|path| !opener.exists(path)) {
        Some(missing) => Err(AvatarError::MissingFile(missing.clone())),
        None => Ok(()),
    }
}

/// One source per stage, indexed by stage.
pub struct VideoSourceSet<S: FrameSource> {
    sources: Vec<S>,
    paths: Vec<PathBuf>,
    closed: bool,
}

impl<S: FrameSource> VideoSourceSet<S> {
    /// Opens every path in order. If any open fails, the sources opened so
    /// far are closed before the error is returned.
    pub fn open<O>(opener: &O, paths: &[PathBuf]) -> Result<Self>
    where
        O: SourceOpener<Source = S>,
    {
        if paths.is_empty() {
            return Err(AvatarError::InvalidInput("a source set needs at least one file"));
        }

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            match opener.open(path) {
                Ok(source) => {
                    tracing::debug!(path = %path.display(), info = ?source.info(), "opened video source");
                    sources.push(source);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to open video source");
                    for source in &mut sources {
                        source.close();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            sources,
            paths: paths.to_vec(),
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn info(&self, stage: Stage) -> Option<&SourceInfo> {
        self.sources.get(stage.index()).map(FrameSource::info)
    }

    /// Frame for `stage` at `seconds`. Stages past the end of the set use the
    /// last source.
    pub fn frame_at(&mut self, stage: Stage, seconds: f64) -> Option<Frame> {
        if self.closed {
            return None;
        }
        let last = self.sources.len().checked_sub(1)?;
        let index = stage.index().min(last);
        self.sources[index].frame_at(seconds)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes every source. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for source in &mut self.sources {
            source.close();
        }
        self.closed = true;
        tracing::debug!(sources = self.sources.len(), "closed video source set");
    }
}

impl<S: FrameSource> Drop for VideoSourceSet<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: FrameSource> fmt::Debug for VideoSourceSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSourceSet")
            .field("paths", &self.paths)
            .field("closed", &self.closed)
            .finish()
    }
}
