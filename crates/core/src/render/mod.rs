use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AvatarError, Frame, Result};

/// Window dimensions in physical pixels, restricted to the offered presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub const PRESETS: [WindowSize; 3] = [
        WindowSize::new(720, 720),
        WindowSize::new(1080, 1080),
        WindowSize::new(1280, 720),
    ];

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_preset(self) -> bool {
        Self::PRESETS.contains(&self)
    }

    /// The preset after this one, wrapping around. Sizes that are not a
    /// preset move to the first preset.
    pub fn next_preset(self) -> Self {
        let index = Self::PRESETS
            .iter()
            .position(|preset| *preset == self)
            .map(|index| (index + 1) % Self::PRESETS.len())
            .unwrap_or(0);
        Self::PRESETS[index]
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(1080, 1080)
    }
}

impl TryFrom<[u32; 2]> for WindowSize {
    type Error = AvatarError;

    fn try_from([width, height]: [u32; 2]) -> Result<Self> {
        let size = Self::new(width, height);
        if size.is_preset() {
            Ok(size)
        } else {
            Err(AvatarError::InvalidWindowSize { width, height })
        }
    }
}

impl From<WindowSize> for [u32; 2] {
    fn from(value: WindowSize) -> Self {
        [value.width, value.height]
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The presentation surface the playback loop draws into.
///
/// Implementations are driven from a single thread only; the playback loop
/// never resizes while a frame is being presented because both happen on
/// that thread.
pub trait Surface {
    /// Current dimensions frames are scaled to.
    fn size(&self) -> WindowSize;

    /// Shows `frame`. It already matches [`Surface::size`] unless the
    /// surface scales frames itself.
    fn present(&mut self, frame: &Frame) -> Result<()>;

    /// Whether [`Surface::present`] fits frames of any size to the window on
    /// its own. Such surfaces get frames at source resolution.
    fn scales_frames(&self) -> bool {
        false
    }

    /// Recreates the backing buffer at `size`.
    fn resize(&mut self, size: WindowSize) -> Result<()>;
}

/// Nearest-neighbour scale of `frame` to `size`.
pub fn scale_frame(frame: &Frame, size: WindowSize) -> Result<Frame> {
    if size.width == 0 || size.height == 0 {
        return Err(AvatarError::InvalidInput("cannot scale to an empty surface"));
    }
    if frame.width() == size.width && frame.height() == size.height {
        return Ok(frame.clone());
    }
    if frame.width() == 0 || frame.height() == 0 {
        return Err(AvatarError::InvalidInput("cannot scale an empty frame"));
    }

    let src = frame.pixels();
    let src_width = frame.width() as usize;
    let dst_width = size.width as usize;
    let columns: Vec<usize> = (0..dst_width)
        .map(|x| x * src_width / dst_width * Frame::BYTES_PER_PIXEL)
        .collect();

    let mut pixels = Vec::with_capacity(size.pixel_count() * Frame::BYTES_PER_PIXEL);
    for y in 0..size.height as usize {
        let src_y = y * frame.height() as usize / size.height as usize;
        let row = &src[src_y * src_width * Frame::BYTES_PER_PIXEL..];
        for offset in &columns {
            pixels.extend_from_slice(&row[*offset..*offset + Frame::BYTES_PER_PIXEL]);
        }
    }

    Frame::new(size.width, size.height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_cycle_in_order() {
        let first = WindowSize::PRESETS[0];
        assert_eq!(first.next_preset(), WindowSize::new(1080, 1080));
        assert_eq!(first.next_preset().next_preset(), WindowSize::new(1280, 720));
        assert_eq!(first.next_preset().next_preset().next_preset(), first);
        assert_eq!(WindowSize::new(10, 10).next_preset(), first);
    }

    #[test]
    fn only_presets_deserialize() {
        let size: WindowSize = serde_json::from_str("[1280, 720]").unwrap();
        assert_eq!(size, WindowSize::new(1280, 720));
        assert!(serde_json::from_str::<WindowSize>("[1920, 1080]").is_err());
        assert_eq!(
            serde_json::to_string(&WindowSize::default()).unwrap(),
            "[1080,1080]"
        );
    }

    #[test]
    fn scaling_doubles_each_pixel() {
        // 2x1: red, blue
        let frame = Frame::new(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        let scaled = scale_frame(&frame, WindowSize::new(4, 2)).unwrap();
        assert_eq!(scaled.width(), 4);
        assert_eq!(scaled.height(), 2);
        let row: Vec<u8> = vec![255, 0, 0, 255, 0, 0, 0, 0, 255, 0, 0, 255];
        assert_eq!(&scaled.pixels()[..12], row.as_slice());
        assert_eq!(&scaled.pixels()[12..], row.as_slice());
    }

    #[test]
    fn scaling_down_samples_source() {
        let frame = Frame::solid(1920, 1080, [10, 20, 30]);
        let scaled = scale_frame(&frame, WindowSize::new(720, 720)).unwrap();
        assert_eq!(scaled.pixels().len(), 720 * 720 * 3);
        assert!(scaled.pixels().chunks(3).all(|px| px == [10, 20, 30]));
    }

    #[test]
    fn same_size_is_returned_unchanged() {
        let frame = Frame::solid(720, 720, [1, 2, 3]);
        let scaled = scale_frame(&frame, WindowSize::new(720, 720)).unwrap();
        assert_eq!(scaled, frame);
    }
}
