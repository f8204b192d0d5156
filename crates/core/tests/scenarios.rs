use std::{
    cell::RefCell,
    collections::HashSet,
    path::{Path, PathBuf},
    rc::Rc,
};

use video_avatar_core::{
    AppConfig, Applied, AvatarError, AvatarSession, BlockStatus, ConfigStore, EventSource, Frame,
    FrameSource, MediaLibrary, PlaybackConfig, PlayerEvent, Result, Scheduler, SettingsRequest,
    SharedStage, SignalClassifier, SourceInfo, SourceOpener, Stage, StageCount, Surface,
    WindowSize,
};

fn block_with_rms(rms: f32) -> Vec<f32> {
    (0..1024)
        .map(|i| if i % 2 == 0 { rms } else { -rms })
        .collect()
}

fn classify(count: StageCount, rms: f32) -> Stage {
    let shared = SharedStage::new(count);
    let mut classifier = SignalClassifier::new(shared.clone());
    classifier
        .process_block(&block_with_rms(rms), BlockStatus::Ok)
        .expect("block should classify");
    shared.current()
}

#[test]
fn scenario_a_two_stages() {
    assert_eq!(classify(StageCount::Two, 0.02), Stage::new(0));
    assert_eq!(classify(StageCount::Two, 0.08), Stage::new(1));
}

#[test]
fn scenario_b_three_stages() {
    assert_eq!(StageCount::Three.thresholds().as_slice(), &[0.03, 0.06]);
    assert_eq!(classify(StageCount::Three, 0.04), Stage::new(1));
    assert_eq!(classify(StageCount::Three, 0.10), Stage::new(2));
}

/// Shared bookkeeping for the fakes below.
#[derive(Default)]
struct Log {
    frame_calls: u64,
    opened: Vec<PathBuf>,
    closed: Vec<PathBuf>,
    presented: Vec<u64>,
    saved: Vec<AppConfig>,
}

struct ClipSource {
    path: PathBuf,
    info: SourceInfo,
    fail_on_call: Option<u64>,
    log: Rc<RefCell<Log>>,
}

impl FrameSource for ClipSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn frame_at(&mut self, seconds: f64) -> Option<Frame> {
        let mut log = self.log.borrow_mut();
        log.frame_calls += 1;
        if Some(log.frame_calls) == self.fail_on_call {
            return None;
        }
        let index = self.info.frame_index(seconds) as u8;
        Some(Frame::solid(8, 8, [index, 0, 0]))
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed.push(self.path.clone());
    }
}

struct ClipOpener {
    present: HashSet<String>,
    fail_on_call: Option<u64>,
    log: Rc<RefCell<Log>>,
}

impl SourceOpener for ClipOpener {
    type Source = ClipSource;

    fn open(&self, path: &Path) -> Result<ClipSource> {
        if !self.exists(path) {
            return Err(AvatarError::MissingFile(path.to_path_buf()));
        }
        self.log.borrow_mut().opened.push(path.to_path_buf());
        Ok(ClipSource {
            path: path.to_path_buf(),
            info: SourceInfo::oriented(8, 8, 30.0, 2.0),
            fail_on_call: self.fail_on_call,
            log: self.log.clone(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.present.contains(&*name.to_string_lossy()))
    }
}

struct RecordingSurface {
    size: WindowSize,
    log: Rc<RefCell<Log>>,
}

impl Surface for RecordingSurface {
    fn size(&self) -> WindowSize {
        self.size
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        assert_eq!(frame.width(), self.size.width);
        assert_eq!(frame.height(), self.size.height);
        let mut log = self.log.borrow_mut();
        let call = log.frame_calls;
        log.presented.push(call);
        Ok(())
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        self.size = size;
        Ok(())
    }
}

struct MemoryStore {
    log: Rc<RefCell<Log>>,
}

impl ConfigStore for MemoryStore {
    fn save(&mut self, config: &AppConfig) -> Result<()> {
        self.log.borrow_mut().saved.push(*config);
        Ok(())
    }
}

/// Quits after a fixed number of drains, optionally requesting a settings
/// change first.
struct ScriptedEvents {
    ticks_left: u64,
    request: Option<SettingsRequest>,
    outcomes: Vec<std::result::Result<(), String>>,
}

impl EventSource for ScriptedEvents {
    fn drain(&mut self) -> Result<Vec<PlayerEvent>> {
        let mut events: Vec<PlayerEvent> = self
            .request
            .take()
            .map(PlayerEvent::Reconfigure)
            .into_iter()
            .collect();
        if self.ticks_left == 0 {
            events.push(PlayerEvent::Quit);
        } else {
            self.ticks_left -= 1;
        }
        Ok(events)
    }

    fn settings_applied(
        &mut self,
        _current: SettingsRequest,
        result: &Result<Applied>,
    ) {
        self.outcomes
            .push(result.as_ref().map(|_| ()).map_err(|err| err.to_string()));
    }
}

fn session(
    present: &[&str],
    stages: StageCount,
    fail_on_call: Option<u64>,
) -> (AvatarSession<ClipOpener, RecordingSurface>, Rc<RefCell<Log>>) {
    let log = Rc::new(RefCell::new(Log::default()));
    let config = AppConfig {
        num_stages: stages,
        window_size: WindowSize::new(720, 720),
    };
    let opener = ClipOpener {
        present: present.iter().map(|name| name.to_string()).collect(),
        fail_on_call,
        log: log.clone(),
    };
    let surface = RecordingSurface {
        size: config.window_size,
        log: log.clone(),
    };
    let session = AvatarSession::start(
        opener,
        MediaLibrary::new("assets"),
        config,
        surface,
        Box::new(MemoryStore { log: log.clone() }),
        SharedStage::new(stages),
    )
    .expect("session should start");
    (session, log)
}

#[test]
fn scenario_c_missing_fourth_clip_rejects_reconfiguration() {
    let (mut session, log) = session(&["0.mp4", "1.mp4", "2.mp4"], StageCount::Three, None);
    session.shared_stage().publish(Stage::new(1));
    let live_paths = session.sources().paths().to_vec();

    let mut scheduler = Scheduler::new(&PlaybackConfig { target_fps: 1000 });
    let mut events = ScriptedEvents {
        ticks_left: 3,
        request: Some(SettingsRequest {
            stage_count: StageCount::Four,
            window_size: WindowSize::new(720, 720),
        }),
        outcomes: Vec::new(),
    };
    let stats = scheduler.run(&mut session, &mut events).unwrap();

    assert_eq!(events.outcomes.len(), 1);
    let message = events.outcomes[0].as_ref().unwrap_err();
    assert!(message.contains("3.mp4"), "unexpected error: {message}");

    assert_eq!(session.stage_count(), StageCount::Three);
    assert_eq!(session.thresholds(), StageCount::Three.thresholds());
    assert_eq!(session.shared_stage().current(), Stage::new(1));
    assert_eq!(session.sources().paths(), live_paths.as_slice());
    assert!(!session.sources().is_closed());
    assert_eq!(stats.presented, 3);

    let log = log.borrow();
    // Validation stops at the missing file: nothing beyond the startup set
    // was opened and nothing was closed.
    assert_eq!(log.opened, live_paths);
    assert!(log.closed.is_empty());
    assert!(log.saved.is_empty());
}

#[test]
fn scenario_c_direct_reconfigure_reports_missing_file() {
    let (mut session, log) = session(&["0.mp4", "1.mp4", "2.mp4"], StageCount::Two, None);
    let err = session
        .reconfigure(SettingsRequest {
            stage_count: StageCount::Four,
            window_size: WindowSize::new(720, 720),
        })
        .unwrap_err();
    match err {
        AvatarError::MissingFile(path) => assert!(path.ends_with("3.mp4")),
        other => panic!("expected a missing file, got {other}"),
    }
    assert_eq!(session.stage_count(), StageCount::Two);
    assert_eq!(log.borrow().opened.len(), 2);
}

#[test]
fn scenario_d_single_failed_frame_is_skipped() {
    let (mut session, log) = session(&["0.mp4", "1.mp4"], StageCount::Two, Some(50));
    let mut scheduler = Scheduler::new(&PlaybackConfig { target_fps: 1000 });
    let mut events = ScriptedEvents {
        ticks_left: 100,
        request: None,
        outcomes: Vec::new(),
    };

    let stats = scheduler.run(&mut session, &mut events).unwrap();

    assert_eq!(stats.ticks, 100);
    assert_eq!(stats.presented, 99);
    assert_eq!(stats.no_frame, 1);

    let log = log.borrow();
    assert_eq!(log.frame_calls, 100);
    let expected: Vec<u64> = (1..=100).filter(|tick| *tick != 50).collect();
    assert_eq!(log.presented, expected);
}

#[test]
fn applied_stage_change_is_used_on_the_next_tick() {
    let (mut session, log) = session(&["0.mp4", "1.mp4", "2.mp4"], StageCount::Two, None);
    let mut scheduler = Scheduler::new(&PlaybackConfig { target_fps: 1000 });
    let mut events = ScriptedEvents {
        ticks_left: 5,
        request: Some(SettingsRequest {
            stage_count: StageCount::Three,
            window_size: WindowSize::new(1280, 720),
        }),
        outcomes: Vec::new(),
    };

    let stats = scheduler.run(&mut session, &mut events).unwrap();
    assert_eq!(events.outcomes, vec![Ok(())]);
    assert_eq!(stats.presented, 5);
    assert_eq!(session.stage_count(), StageCount::Three);
    assert_eq!(session.window_size(), WindowSize::new(1280, 720));

    let log = log.borrow();
    assert_eq!(log.closed.len(), 2);
    assert_eq!(
        log.saved,
        vec![AppConfig {
            num_stages: StageCount::Three,
            window_size: WindowSize::new(1280, 720),
        }]
    );
}
