//! The running avatar: active stage count, video sources, display surface and
//! the controller that swaps them when the user applies new settings.

use std::fmt;

use crate::{
    ensure_present, render::scale_frame, AppConfig, ConfigStore, Frame, MediaLibrary, Result,
    SharedStage, SourceOpener, StageCount, Surface, ThresholdSet, VideoSourceSet, WindowSize,
};

/// Settings chosen on the settings surface and applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsRequest {
    pub stage_count: StageCount,
    pub window_size: WindowSize,
}

impl From<AppConfig> for SettingsRequest {
    fn from(config: AppConfig) -> Self {
        Self {
            stage_count: config.num_stages,
            window_size: config.window_size,
        }
    }
}

impl From<SettingsRequest> for AppConfig {
    fn from(request: SettingsRequest) -> Self {
        Self {
            num_stages: request.stage_count,
            window_size: request.window_size,
        }
    }
}

/// Where the controller is in handling a settings request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigState {
    Idle,
    Validating(StageCount),
    Applying,
    Rejected,
}

/// What a successful reconfiguration changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    pub stage_count_changed: bool,
    pub window_resized: bool,
}

impl Applied {
    pub fn changed_anything(&self) -> bool {
        self.stage_count_changed || self.window_resized
    }
}

/// Everything the playback loop and the reconfiguration controller share.
///
/// Lives on the playback thread. The only state reachable from the audio
/// callback is the [`SharedStage`].
pub struct AvatarSession<O: SourceOpener, D: Surface> {
    opener: O,
    library: MediaLibrary,
    stage: SharedStage,
    stage_count: StageCount,
    sources: VideoSourceSet<O::Source>,
    surface: D,
    store: Box<dyn ConfigStore>,
    state: ReconfigState,
}

impl<O: SourceOpener, D: Surface> AvatarSession<O, D> {
    /// Opens the initial source set and sizes the surface. Any failure here
    /// is fatal to startup.
    pub fn start(
        opener: O,
        library: MediaLibrary,
        config: AppConfig,
        mut surface: D,
        store: Box<dyn ConfigStore>,
        stage: SharedStage,
    ) -> Result<Self> {
        let paths = library.paths_for(config.num_stages);
        ensure_present(&opener, &paths)?;
        let sources = VideoSourceSet::open(&opener, &paths)?;
        if surface.size() != config.window_size {
            surface.resize(config.window_size)?;
        }
        stage.set_stage_count(config.num_stages);

        tracing::info!(
            stages = %config.num_stages,
            window = %config.window_size,
            media = %library.root().display(),
            "avatar session started"
        );

        Ok(Self {
            opener,
            library,
            stage,
            stage_count: config.num_stages,
            sources,
            surface,
            store,
            state: ReconfigState::Idle,
        })
    }

    pub fn stage_count(&self) -> StageCount {
        self.stage_count
    }

    pub fn thresholds(&self) -> ThresholdSet {
        self.stage_count.thresholds()
    }

    pub fn window_size(&self) -> WindowSize {
        self.surface.size()
    }

    pub fn settings(&self) -> SettingsRequest {
        SettingsRequest {
            stage_count: self.stage_count,
            window_size: self.surface.size(),
        }
    }

    pub fn shared_stage(&self) -> &SharedStage {
        &self.stage
    }

    pub fn sources(&self) -> &VideoSourceSet<O::Source> {
        &self.sources
    }

    pub fn surface(&self) -> &D {
        &self.surface
    }

    pub fn state(&self) -> ReconfigState {
        self.state
    }

    /// Frame for the currently published stage at `elapsed` seconds.
    pub fn current_frame(&mut self, elapsed: f64) -> Option<Frame> {
        let stage = self.stage.current().clamp_to(self.stage_count);
        self.sources.frame_at(stage, elapsed)
    }

    /// Scales `frame` to the window and presents it.
    pub fn present(&mut self, frame: &Frame) -> Result<()> {
        if self.surface.scales_frames() {
            return self.surface.present(frame);
        }
        let scaled = scale_frame(frame, self.surface.size())?;
        self.surface.present(&scaled)
    }

    /// Applies a settings request between ticks.
    ///
    /// Every file a new stage count needs is checked before any of them is
    /// opened, and the count is only installed once its whole source set has
    /// opened; until then the running set, thresholds and published stage are
    /// untouched. On failure the previous configuration stays active and the
    /// error is returned for the user.
    pub fn reconfigure(&mut self, request: SettingsRequest) -> Result<Applied> {
        let mut applied = Applied::default();

        if request.stage_count != self.stage_count {
            self.transition(ReconfigState::Validating(request.stage_count));
            let paths = self.library.paths_for(request.stage_count);
            let replacement = ensure_present(&self.opener, &paths)
                .and_then(|()| VideoSourceSet::open(&self.opener, &paths));
            let replacement = match replacement {
                Ok(set) => set,
                Err(err) => {
                    tracing::warn!(requested = %request.stage_count, %err, "stage count change rejected");
                    self.transition(ReconfigState::Rejected);
                    self.transition(ReconfigState::Idle);
                    return Err(err);
                }
            };

            self.transition(ReconfigState::Applying);
            let mut previous = std::mem::replace(&mut self.sources, replacement);
            previous.close();
            self.stage_count = request.stage_count;
            self.stage.set_stage_count(request.stage_count);
            applied.stage_count_changed = true;
            tracing::info!(stages = %request.stage_count, thresholds = ?self.thresholds(), "stage count changed");
        }

        let mut resize_error = None;
        if request.window_size != self.surface.size() {
            match self.surface.resize(request.window_size) {
                Ok(()) => {
                    applied.window_resized = true;
                    tracing::info!(window = %request.window_size, "window resized");
                }
                Err(err) => {
                    tracing::warn!(window = %request.window_size, %err, "window resize rejected");
                    resize_error = Some(err);
                }
            }
        }

        if applied.changed_anything() {
            self.persist();
        }
        self.transition(ReconfigState::Idle);

        match resize_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Closes every video source. Safe to call more than once.
    pub fn close(&mut self) {
        self.sources.close();
    }

    fn persist(&mut self) {
        let config = AppConfig::from(self.settings());
        if let Err(err) = self.store.save(&config) {
            tracing::error!(%err, ?config, "failed to persist configuration");
        }
    }

    fn transition(&mut self, next: ReconfigState) {
        tracing::debug!(from = ?self.state, to = ?next, "reconfiguration state");
        self.state = next;
    }
}

impl<O: SourceOpener, D: Surface> fmt::Debug for AvatarSession<O, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarSession")
            .field("stage_count", &self.stage_count)
            .field("window_size", &self.surface.size())
            .field("stage", &self.stage.current())
            .field("sources", &self.sources)
            .field("state", &self.state)
            .finish()
    }
}
