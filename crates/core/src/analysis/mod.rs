use std::fmt;

use crate::{SharedStage, Stage};

/// Capture health reported alongside each block of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockStatus {
    #[default]
    Ok,
    /// The capture backend reported a problem (overflow, device error, ...)
    /// while this block was being gathered.
    Flagged(&'static str),
}

/// Result of classifying a single block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAnalysis {
    pub rms: f32,
    pub stage: Stage,
}

/// Turns blocks of mono samples into mouth stages and publishes them.
///
/// Runs inside the audio callback. Classifying a block neither allocates nor
/// blocks, and nothing is returned as an error: a bad block is logged and
/// skipped, leaving the previously published stage in effect.
pub struct SignalClassifier {
    shared: SharedStage,
    classified: u64,
    skipped: u64,
}

impl SignalClassifier {
    pub fn new(shared: SharedStage) -> Self {
        Self {
            shared,
            classified: 0,
            skipped: 0,
        }
    }

    /// Classifies `samples` against the thresholds of the current stage
    /// count. Returns `None` when the block was skipped.
    pub fn process_block(&mut self, samples: &[f32], status: BlockStatus) -> Option<BlockAnalysis> {
        if let BlockStatus::Flagged(reason) = status {
            tracing::warn!(%reason, "audio block flagged by capture backend; skipping");
            self.skipped += 1;
            return None;
        }

        if samples.is_empty() {
            self.skipped += 1;
            return None;
        }

        let rms = compute_rms(samples);
        if !rms.is_finite() {
            tracing::warn!(rms, "non-finite audio level; skipping block");
            self.skipped += 1;
            return None;
        }

        let stage = self.shared.stage_count().thresholds().classify(rms);
        self.shared.publish(stage);
        self.classified += 1;
        Some(BlockAnalysis { rms, stage })
    }

    pub fn classified_blocks(&self) -> u64 {
        self.classified
    }

    pub fn skipped_blocks(&self) -> u64 {
        self.skipped
    }
}

impl fmt::Debug for SignalClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalClassifier")
            .field("stage", &self.shared.current())
            .field("stage_count", &self.shared.stage_count())
            .field("classified", &self.classified)
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Root-mean-square amplitude of a block; `0.0` for an empty block.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}
