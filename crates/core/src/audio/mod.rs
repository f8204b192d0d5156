use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};

use crate::{AudioConfig, AvatarError, BlockStatus, Result, SignalClassifier};

/// Live microphone capture feeding a [`SignalClassifier`].
///
/// The cpal stream is owned here and stays on the thread that started it;
/// the classifier itself runs on cpal's callback thread.
pub struct AudioCapture {
    stream: Option<cpal::Stream>,
    device_name: String,
}

impl AudioCapture {
    /// Names of the capture devices exposed by the default host.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| AvatarError::AudioDevice(err.to_string()))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    /// Opens the capture device and starts streaming blocks into
    /// `classifier`. Fails if there is no capture device at all.
    pub fn start(
        config: &AudioConfig,
        preferred_device: Option<&str>,
        classifier: SignalClassifier,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => host
                .input_devices()
                .map_err(|err| AvatarError::AudioDevice(err.to_string()))?
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AvatarError::AudioDevice(format!("input device '{name}' not found")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| AvatarError::AudioDevice("no audio capture device available".to_string()))?,
        };
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        let (stream_config, format) = select_stream_config(&device, config)?;
        let channels = usize::from(stream_config.channels.max(1));
        tracing::info!(
            device = %device_name,
            ?format,
            sample_rate = stream_config.sample_rate.0,
            channels,
            block_size = config.block_size,
            "starting audio capture"
        );

        let fault = Arc::new(AtomicBool::new(false));
        let pipeline = InputPipeline::new(config.block_size, channels, classifier, fault.clone());
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, pipeline, fault, |s: f32| s)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, pipeline, fault, |s: i16| {
                f32::from(s) / 32_768.0
            })?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, pipeline, fault, |s: u16| {
                (f32::from(s) - 32_768.0) / 32_768.0
            })?,
            other => {
                return Err(AvatarError::AudioDevice(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|err| AvatarError::AudioDevice(err.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops capture. Later calls do nothing.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "failed to pause audio stream");
            }
            drop(stream);
            tracing::info!(device = %self.device_name, "audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCapture")
            .field("device_name", &self.device_name)
            .field("running", &self.stream.is_some())
            .finish()
    }
}

/// Picks a supported configuration at the wanted sample rate, preferring
/// fewer channels and f32 samples. Falls back to the device default when the
/// rate is not offered.
fn select_stream_config(device: &cpal::Device, wanted: &AudioConfig) -> Result<(StreamConfig, SampleFormat)> {
    let rate = cpal::SampleRate(wanted.sample_rate);
    let ranges = device
        .supported_input_configs()
        .map_err(|err| AvatarError::AudioDevice(err.to_string()))?;

    let mut best: Option<cpal::SupportedStreamConfig> = None;
    for range in ranges {
        if !is_supported_format(range.sample_format()) {
            continue;
        }
        if range.min_sample_rate() > rate || range.max_sample_rate() < rate {
            continue;
        }
        let candidate = range.with_sample_rate(rate);
        let better = match &best {
            None => true,
            Some(current) => config_rank(&candidate, wanted) < config_rank(current, wanted),
        };
        if better {
            best = Some(candidate);
        }
    }

    let chosen = match best {
        Some(config) => config,
        None => {
            let fallback = device
                .default_input_config()
                .map_err(|err| AvatarError::AudioDevice(err.to_string()))?;
            tracing::warn!(
                wanted = wanted.sample_rate,
                using = fallback.sample_rate().0,
                "capture device does not offer the wanted sample rate"
            );
            fallback
        }
    };

    let format = chosen.sample_format();
    Ok((chosen.into(), format))
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

fn config_rank(config: &cpal::SupportedStreamConfig, wanted: &AudioConfig) -> (u16, u8) {
    let channel_distance = config.channels().abs_diff(wanted.channels);
    let format_rank = match config.sample_format() {
        SampleFormat::F32 => 0,
        SampleFormat::I16 => 1,
        _ => 2,
    };
    (channel_distance, format_rank)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut pipeline: InputPipeline,
    fault: Arc<AtomicBool>,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
{
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!(%err, "audio stream error");
        fault.store(true, Ordering::Relaxed);
    };
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| pipeline.push(data, convert),
            err_fn,
            None,
        )
        .map_err(|err| AvatarError::AudioDevice(err.to_string()))
}

const STREAM_FAULT: &str = "stream error reported during block";

/// Callback-side state: down-mixes interleaved input to mono, cuts it into
/// fixed-size blocks and classifies each block.
struct InputPipeline {
    channels: usize,
    accumulator: BlockAccumulator,
    classifier: SignalClassifier,
    fault: Arc<AtomicBool>,
    mono: Vec<f32>,
}

impl InputPipeline {
    fn new(
        block_size: usize,
        channels: usize,
        classifier: SignalClassifier,
        fault: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channels,
            accumulator: BlockAccumulator::new(block_size),
            classifier,
            fault,
            mono: Vec::with_capacity(block_size),
        }
    }

    fn push<T: Copy>(&mut self, data: &[T], convert: impl FnMut(T) -> f32) {
        self.mono.clear();
        append_downmixed_samples(&mut self.mono, data, self.channels, convert);

        let Self {
            accumulator,
            classifier,
            fault,
            mono,
            ..
        } = self;
        accumulator.push(mono, |block| {
            let status = if fault.swap(false, Ordering::Relaxed) {
                BlockStatus::Flagged(STREAM_FAULT)
            } else {
                BlockStatus::Ok
            };
            classifier.process_block(block, status);
        });
    }
}

/// Re-blocks an arbitrary stream of samples into blocks of a fixed size.
#[derive(Debug)]
pub struct BlockAccumulator {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples waiting for the next full block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Appends `samples` and calls `on_block` for every block completed.
    pub fn push(&mut self, mut samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let wanted = self.block_size - self.pending.len();
            let take = wanted.min(samples.len());
            let (head, rest) = samples.split_at(take);
            samples = rest;

            if self.pending.is_empty() && take == self.block_size {
                on_block(head);
                continue;
            }
            self.pending.extend_from_slice(head);
            if self.pending.len() == self.block_size {
                on_block(&self.pending);
                self.pending.clear();
            }
        }
    }
}

/// Averages each interleaved frame of `data` into one mono sample.
pub fn append_downmixed_samples<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for frame in data.chunks_exact(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        buf.push(sum / channels as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SharedStage, Stage, StageCount};

    #[test]
    fn reblocks_uneven_callbacks() {
        let mut accumulator = BlockAccumulator::new(4);
        let mut blocks = Vec::new();
        accumulator.push(&[1.0, 2.0, 3.0], |block| blocks.push(block.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(accumulator.pending(), 3);

        accumulator.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |block| {
            blocks.push(block.to_vec())
        });
        assert_eq!(
            blocks,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(accumulator.pending(), 1);
    }

    #[test]
    fn passes_exact_blocks_through() {
        let mut accumulator = BlockAccumulator::new(1024);
        let samples = vec![0.25_f32; 2048];
        let mut count = 0;
        accumulator.push(&samples, |block| {
            assert_eq!(block.len(), 1024);
            count += 1;
        });
        assert_eq!(count, 2);
        assert_eq!(accumulator.pending(), 0);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let mut mono = Vec::new();
        append_downmixed_samples(&mut mono, &[1.0_f32, 0.0, 0.5, 0.5, 1.0], 2, |s| s);
        // The trailing half frame is dropped.
        assert_eq!(mono, vec![0.5, 0.5]);

        let mut mono = Vec::new();
        append_downmixed_samples(&mut mono, &[16_384_i16, -16_384], 1, |s| {
            f32::from(s) / 32_768.0
        });
        assert_eq!(mono, vec![0.5, -0.5]);
    }

    #[test]
    fn pipeline_classifies_full_blocks_only() {
        let shared = SharedStage::new(StageCount::Two);
        let fault = Arc::new(AtomicBool::new(false));
        let mut pipeline =
            InputPipeline::new(8, 2, SignalClassifier::new(shared.clone()), fault);

        // 4 stereo frames of loud signal: only half a mono block so far.
        pipeline.push(&[0.5_f32; 8], |s| s);
        assert_eq!(shared.current(), Stage::CLOSED);

        pipeline.push(&[0.5_f32; 8], |s| s);
        assert_eq!(shared.current(), Stage::new(1));
    }

    #[test]
    fn stream_fault_skips_the_next_block() {
        let shared = SharedStage::new(StageCount::Two);
        let fault = Arc::new(AtomicBool::new(false));
        let mut pipeline =
            InputPipeline::new(4, 1, SignalClassifier::new(shared.clone()), fault.clone());

        fault.store(true, Ordering::Relaxed);
        pipeline.push(&[0.9_f32; 4], |s| s);
        assert_eq!(shared.current(), Stage::CLOSED);
        assert!(!fault.load(Ordering::Relaxed));
        assert_eq!(pipeline.classifier.skipped_blocks(), 1);

        pipeline.push(&[0.9_f32; 4], |s| s);
        assert_eq!(shared.current(), Stage::new(1));
    }
}
