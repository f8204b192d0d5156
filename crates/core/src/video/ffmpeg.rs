use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Deserialize;

use super::{Frame, FrameSource, Orientation, SourceInfo, SourceOpener};
use crate::{AvatarError, Result};

/// Forward gap (in frames) the reader will decode through before it prefers
/// restarting the decoder with a seek.
const MAX_READ_AHEAD: u64 = 15;

/// Decoded frames buffered between the reader thread and playback.
const FRAME_QUEUE: usize = 4;

/// Longest a single `frame_at` call waits on the decoder.
const DEFAULT_FRAME_WAIT: Duration = Duration::from_millis(20);

/// Longest `open` waits for the first frame.
const DEFAULT_OPEN_WAIT: Duration = Duration::from_secs(5);

/// Opens media files by shelling out to `ffprobe` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    frame_wait: Duration,
    open_wait: Duration,
}

impl FfmpegOpener {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            frame_wait: DEFAULT_FRAME_WAIT,
            open_wait: DEFAULT_OPEN_WAIT,
        }
    }

    /// Caps how long one frame request may wait for the decoder. Keep it
    /// under the playback period.
    pub fn with_frame_wait(mut self, wait: Duration) -> Self {
        self.frame_wait = wait;
        self
    }

    pub fn with_open_wait(mut self, wait: Duration) -> Self {
        self.open_wait = wait;
        self
    }

    /// Reads stream properties without starting a decoder.
    pub fn probe(&self, path: &Path) -> Result<SourceInfo> {
        if !path.is_file() {
            return Err(AvatarError::MissingFile(path.to_path_buf()));
        }

        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| AvatarError::decode(path, format!("cannot run ffprobe: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AvatarError::decode(path, stderr.trim()));
        }

        parse_probe(path, &String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl SourceOpener for FfmpegOpener {
    type Source = FfmpegSource;

    fn open(&self, path: &Path) -> Result<FfmpegSource> {
        let info = self.probe(path)?;
        let mut source = FfmpegSource {
            path: path.to_path_buf(),
            ffmpeg: self.ffmpeg.clone(),
            info,
            frame_wait: self.frame_wait,
            reader: None,
            cached: None,
            closed: false,
        };
        // Decode the first frame now so a file ffprobe accepts but ffmpeg
        // cannot read fails here rather than during playback.
        match source.fetch(0, self.open_wait)? {
            Some(_) => Ok(source),
            None => Err(AvatarError::decode(
                path,
                format!("no frame decoded within {:?}", self.open_wait),
            )),
        }
    }
}

/// A looping source backed by a long-lived `ffmpeg` child process that
/// streams raw RGB24 frames on stdout.
///
/// A reader thread pulls frames off the pipe into a small bounded queue, so
/// a frame request never waits longer than the configured frame wait. When
/// the decoder falls behind, the request returns nothing and the caller
/// keeps showing the previous frame.
#[derive(Debug)]
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg: PathBuf,
    info: SourceInfo,
    frame_wait: Duration,
    reader: Option<FrameReader>,
    cached: Option<(u64, Frame)>,
    closed: bool,
}

#[derive(Debug)]
struct FrameReader {
    child: Child,
    frames: Receiver<Result<(u64, Frame)>>,
    next_index: u64,
}

impl FrameReader {
    fn stop(mut self) {
        // Dropping the receiver unblocks a reader thread stuck on a full
        // queue; killing the child unblocks one stuck on the pipe.
        drop(self.frames);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl FfmpegSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame `index`, or `None` when the decoder has not produced it within
    /// `wait`. Errors mean the decoder is gone.
    fn fetch(&mut self, index: u64, wait: Duration) -> Result<Option<Frame>> {
        if let Some((cached_index, frame)) = &self.cached {
            if *cached_index == index {
                return Ok(Some(frame.clone()));
            }
        }

        let restart = match &self.reader {
            Some(reader) => index < reader.next_index || index - reader.next_index > MAX_READ_AHEAD,
            None => true,
        };
        if restart {
            self.stop_reader();
            self.reader = Some(self.spawn_reader(index)?);
        }

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| AvatarError::decode(&self.path, "decoder is not running"))?;
        let deadline = Instant::now() + wait;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match reader.frames.recv_timeout(timeout) {
                Ok(Ok((decoded, frame))) => {
                    reader.next_index = decoded + 1;
                    if decoded >= index {
                        self.cached = Some((decoded, frame.clone()));
                        return Ok(Some(frame));
                    }
                }
                Ok(Err(err)) => return Err(err),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AvatarError::decode(&self.path, "decoder exited"))
                }
            }
        }
    }

    fn spawn_reader(&self, start_index: u64) -> Result<FrameReader> {
        let args = decoder_args(&self.path, &self.info, start_index);
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| AvatarError::decode(&self.path, format!("cannot run ffmpeg: {err}")))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AvatarError::decode(&self.path, "ffmpeg stdout unavailable"));
        };

        let (sender, frames) = bounded(FRAME_QUEUE);
        let path = self.path.clone();
        let (width, height) = (self.info.width, self.info.height);
        let spawned = thread::Builder::new()
            .name("video-decoder".to_string())
            .spawn(move || {
                let mut stdout = stdout;
                let mut index = start_index;
                loop {
                    let result = read_frame(&mut stdout, &path, width, height).map(|frame| (index, frame));
                    let failed = result.is_err();
                    if sender.send(result).is_err() || failed {
                        break;
                    }
                    index += 1;
                }
            });
        if let Err(err) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AvatarError::decode(&self.path, format!("cannot start reader: {err}")));
        }

        tracing::trace!(path = %self.path.display(), start_index, "started decoder");
        Ok(FrameReader {
            child,
            frames,
            next_index: start_index,
        })
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
    }
}

fn read_frame(stdout: &mut ChildStdout, path: &Path, width: u32, height: u32) -> Result<Frame> {
    let mut buffer = vec![0_u8; width as usize * height as usize * Frame::BYTES_PER_PIXEL];
    stdout
        .read_exact(&mut buffer)
        .map_err(|err| AvatarError::decode(path, err))?;
    Frame::new(width, height, buffer)
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn frame_at(&mut self, seconds: f64) -> Option<Frame> {
        if self.closed {
            return None;
        }
        let index = self.info.frame_index(seconds);
        match self.fetch(index, self.frame_wait) {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), index, "decoder behind; frame skipped");
                None
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), index, %err, "frame retrieval failed");
                self.stop_reader();
                None
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_reader();
        self.cached = None;
        self.closed = true;
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Command line for a decoder that starts at `start_index`.
fn decoder_args(path: &Path, info: &SourceInfo, start_index: u64) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    if start_index > 0 && info.fps > 0.0 {
        args.push("-ss".to_string());
        args.push(format!("{:.6}", start_index as f64 / info.fps));
    }
    args.push("-i".to_string());
    args.push(path.to_string_lossy().into_owned());
    if info.orientation == Orientation::Rotated90 {
        args.push("-vf".to_string());
        args.push("transpose=2".to_string());
    }
    args.extend(
        ["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .iter()
            .map(|arg| arg.to_string()),
    );
    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe(path: &Path, json: &str) -> Result<SourceInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|err| AvatarError::decode(path, format!("unreadable ffprobe output: {err}")))?;
    let stream = probe
        .streams
        .into_iter()
        .find(|stream| stream.width.is_some() && stream.height.is_some())
        .ok_or_else(|| AvatarError::decode(path, "no video stream"))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(AvatarError::decode(path, "no video stream"));
    };
    if width == 0 || height == 0 {
        return Err(AvatarError::decode(path, "video stream has no pixels"));
    }

    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .filter_map(|rate| parse_rate(rate))
        .next()
        .ok_or_else(|| AvatarError::decode(path, "unknown frame rate"))?;

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|format| format.duration.as_deref()))
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .ok_or_else(|| AvatarError::decode(path, "unknown duration"))?;

    Ok(SourceInfo::oriented(width, height, fps, duration))
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDSCAPE: &str = r#"{
        "streams": [{
            "index": 0, "codec_type": "video", "width": 1920, "height": 1080,
            "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001",
            "duration": "4.004000"
        }],
        "format": { "duration": "4.010000" }
    }"#;

    #[test]
    fn parses_landscape_stream() {
        let info = parse_probe(Path::new("0.mp4"), LANDSCAPE).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.orientation, Orientation::Native);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!((info.duration - 4.004).abs() < 1e-9);
    }

    #[test]
    fn portrait_stream_is_reported_rotated() {
        let json = r#"{
            "streams": [{ "width": 720, "height": 1280, "avg_frame_rate": "0/0",
                          "r_frame_rate": "25/1" }],
            "format": { "duration": "2.0" }
        }"#;
        let info = parse_probe(Path::new("1.mp4"), json).unwrap();
        assert_eq!(info.orientation, Orientation::Rotated90);
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.duration, 2.0);
    }

    #[test]
    fn rejects_streams_without_video_or_duration() {
        let audio_only = r#"{ "streams": [{ "codec_type": "audio" }], "format": {} }"#;
        let err = parse_probe(Path::new("2.mp4"), audio_only).unwrap_err();
        assert!(err.to_string().contains("no video stream"));

        let no_duration = r#"{ "streams": [{ "width": 4, "height": 4, "r_frame_rate": "30" }] }"#;
        let err = parse_probe(Path::new("2.mp4"), no_duration).unwrap_err();
        assert!(err.to_string().contains("unknown duration"));

        assert!(parse_probe(Path::new("2.mp4"), "garbage").is_err());
    }

    #[test]
    fn parses_frame_rates() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("24"), Some(24.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn decoder_args_seek_and_rotate() {
        let portrait = SourceInfo::oriented(720, 1280, 30.0, 4.0);
        let args = decoder_args(Path::new("assets/1.mp4"), &portrait, 45);
        let joined = args.join(" ");
        assert!(joined.starts_with("-nostdin -loglevel error -ss 1.500000 -i assets/1.mp4"));
        assert!(joined.contains("-vf transpose=2"));
        assert!(joined.ends_with("-f rawvideo -pix_fmt rgb24 -"));

        let landscape = SourceInfo::oriented(1280, 720, 30.0, 4.0);
        let args = decoder_args(Path::new("assets/0.mp4"), &landscape, 0);
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn missing_file_is_reported_before_probing() {
        let opener = FfmpegOpener::default();
        let path = std::env::temp_dir().join("video-avatar-definitely-missing-3.mp4");
        let err = opener.open(&path).unwrap_err();
        assert!(matches!(err, AvatarError::MissingFile(ref missing) if missing == &path));
    }

    /// Writing an executable while another test forks can fail the later
    /// exec with ETXTBSY, so the script-based tests run one at a time.
    #[cfg(unix)]
    static FAKE_TOOLS: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[cfg(unix)]
    fn fake_tools(dir: &Path, ffmpeg_body: &str) -> FfmpegOpener {
        use std::{fs, os::unix::fs::PermissionsExt};

        fs::create_dir_all(dir).unwrap();
        let ffprobe = dir.join("ffprobe");
        let ffmpeg = dir.join("ffmpeg");
        fs::write(
            &ffprobe,
            "#!/bin/sh\necho '{\"streams\":[{\"width\":2,\"height\":2,\"r_frame_rate\":\"30/1\",\"duration\":\"2.0\"}]}'\n",
        )
        .unwrap();
        fs::write(&ffmpeg, format!("#!/bin/sh\n{ffmpeg_body}\n")).unwrap();
        for tool in [&ffprobe, &ffmpeg] {
            fs::set_permissions(tool, fs::Permissions::from_mode(0o755)).unwrap();
        }
        fs::write(dir.join("0.mp4"), b"").unwrap();
        FfmpegOpener::new(ffmpeg, ffprobe)
    }

    #[cfg(unix)]
    #[test]
    fn stalled_decoder_returns_within_one_tick() {
        let _guard = FAKE_TOOLS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = std::env::temp_dir().join(format!("video-avatar-stall-{}", std::process::id()));
        // One 2x2 RGB frame, then a decoder that hangs.
        let opener = fake_tools(&dir, "printf 'abcdefghijkl'\nexec sleep 5")
            .with_frame_wait(Duration::from_millis(10));
        let mut source = opener.open(&dir.join("0.mp4")).unwrap();

        let started = Instant::now();
        assert!(source.frame_at(0.0).is_some());
        assert!(source.frame_at(0.1).is_none());
        assert!(
            started.elapsed() < Duration::from_millis(33),
            "frame requests took {:?}",
            started.elapsed()
        );

        source.close();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn decoder_without_frames_fails_open_in_bounded_time() {
        let _guard = FAKE_TOOLS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = std::env::temp_dir().join(format!("video-avatar-silent-{}", std::process::id()));
        let opener = fake_tools(&dir, "exec sleep 5").with_open_wait(Duration::from_millis(100));

        let started = Instant::now();
        let err = opener.open(&dir.join("0.mp4")).unwrap_err();
        assert!(matches!(err, AvatarError::Decode { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
