use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{AvatarError, Result};

const TWO_STAGE_THRESHOLDS: [f32; 1] = [0.05];
const THREE_STAGE_THRESHOLDS: [f32; 2] = [0.03, 0.06];
const FOUR_STAGE_THRESHOLDS: [f32; 3] = [0.02, 0.04, 0.06];

/// Number of mouth-openness stages the avatar cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum StageCount {
    /// Closed / open.
    #[default]
    Two,
    Three,
    Four,
}

impl StageCount {
    pub const ALL: [StageCount; 3] = [StageCount::Two, StageCount::Three, StageCount::Four];

    /// Number of stages, which is also the number of media files required.
    pub fn get(self) -> usize {
        match self {
            StageCount::Two => 2,
            StageCount::Three => 3,
            StageCount::Four => 4,
        }
    }

    /// Amplitude thresholds separating adjacent stages.
    pub fn thresholds(self) -> ThresholdSet {
        let values: &'static [f32] = match self {
            StageCount::Two => &TWO_STAGE_THRESHOLDS,
            StageCount::Three => &THREE_STAGE_THRESHOLDS,
            StageCount::Four => &FOUR_STAGE_THRESHOLDS,
        };
        ThresholdSet { values }
    }

    /// The most-open stage for this count.
    pub fn last_stage(self) -> Stage {
        Stage(self.get() - 1)
    }
}

impl TryFrom<u32> for StageCount {
    type Error = AvatarError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            2 => Ok(StageCount::Two),
            3 => Ok(StageCount::Three),
            4 => Ok(StageCount::Four),
            other => Err(AvatarError::InvalidStageCount(other)),
        }
    }
}

impl From<StageCount> for u32 {
    fn from(value: StageCount) -> Self {
        value.get() as u32
    }
}

impl fmt::Display for StageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Ascending RMS thresholds, one fewer than the stage count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    values: &'static [f32],
}

impl ThresholdSet {
    pub fn as_slice(&self) -> &[f32] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the first threshold `rms` does not exceed, or `len()` when it
    /// is louder than all of them.
    ///
    /// There is no hysteresis: a signal hovering around a threshold flips
    /// between the two neighbouring stages block by block.
    pub fn classify(&self, rms: f32) -> Stage {
        let index = self
            .values
            .iter()
            .position(|threshold| rms <= *threshold)
            .unwrap_or(self.values.len());
        Stage(index)
    }
}

/// Index of a mouth-openness stage, `0` being fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stage(usize);

impl Stage {
    pub const CLOSED: Stage = Stage(0);

    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    /// Clamps the stage into the range valid for `count`.
    pub fn clamp_to(self, count: StageCount) -> Stage {
        self.min(count.last_stage())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The values shared between the audio callback and the playback loop.
///
/// The classifier writes the stage and reads the stage count; the playback
/// loop does the opposite. Both are single machine words, so relaxed atomics
/// are enough: a reader only needs to observe the most recent write
/// eventually.
#[derive(Debug, Clone)]
pub struct SharedStage {
    stage: Arc<AtomicUsize>,
    count: Arc<AtomicU32>,
}

impl SharedStage {
    pub fn new(count: StageCount) -> Self {
        Self {
            stage: Arc::new(AtomicUsize::new(Stage::CLOSED.index())),
            count: Arc::new(AtomicU32::new(count.into())),
        }
    }

    pub fn publish(&self, stage: Stage) {
        self.stage.store(stage.index(), Ordering::Relaxed);
    }

    /// Most recently published stage. May briefly exceed the current stage
    /// count right after a reconfiguration, so callers clamp before indexing.
    pub fn current(&self) -> Stage {
        Stage(self.stage.load(Ordering::Relaxed))
    }

    pub fn stage_count(&self) -> StageCount {
        StageCount::try_from(self.count.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Switches the stage count the classifier uses and pulls the published
    /// stage back into range.
    pub fn set_stage_count(&self, count: StageCount) {
        self.count.store(count.into(), Ordering::Relaxed);
        self.stage
            .fetch_min(count.last_stage().index(), Ordering::Relaxed);
    }
}

impl Default for SharedStage {
    fn default() -> Self {
        Self::new(StageCount::default())
    }
}
