use std::{sync::Arc, time::Duration};

use video_avatar_core::{Applied, EventSource, PlayerEvent, Result, SettingsRequest};
use winit::{
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::EventLoop,
    keyboard::PhysicalKey,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::Window,
};

use crate::settings::{KeyAction, PanelCommand, SettingsPanel};

/// Window input pumped once per playback tick.
///
/// The winit loop is driven with a zero timeout so a tick never waits on
/// the windowing system.
pub struct WindowEvents {
    event_loop: EventLoop<()>,
    window: Arc<Window>,
    title: &'static str,
    panel: SettingsPanel,
}

impl WindowEvents {
    pub fn new(
        event_loop: EventLoop<()>,
        window: Arc<Window>,
        title: &'static str,
        current: SettingsRequest,
    ) -> Self {
        Self {
            event_loop,
            window,
            title,
            panel: SettingsPanel::new(current),
        }
    }

    fn refresh_title(&self) {
        self.window.set_title(&self.panel.title(self.title));
    }
}

impl EventSource for WindowEvents {
    fn drain(&mut self) -> Result<Vec<PlayerEvent>> {
        let mut actions = Vec::new();
        let mut close_requested = false;
        let status = self
            .event_loop
            .pump_events(Some(Duration::ZERO), |event, _target| {
                let Event::WindowEvent { event, .. } = event else {
                    return;
                };
                match event {
                    WindowEvent::CloseRequested => close_requested = true,
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key: PhysicalKey::Code(code),
                                state: ElementState::Pressed,
                                repeat: false,
                                ..
                            },
                        ..
                    } => actions.extend(KeyAction::from_key(code)),
                    _ => {}
                }
            });

        let mut events = Vec::new();
        if close_requested || matches!(status, PumpStatus::Exit(_)) {
            events.push(PlayerEvent::Quit);
        }

        let mut title_changed = false;
        for action in actions {
            match self.panel.handle(action) {
                PanelCommand::None => title_changed = true,
                PanelCommand::Quit => events.push(PlayerEvent::Quit),
                PanelCommand::Apply(request) => {
                    tracing::info!(
                        stages = %request.stage_count,
                        window = %request.window_size,
                        "settings requested"
                    );
                    events.push(PlayerEvent::Reconfigure(request));
                    title_changed = true;
                }
            }
        }
        if title_changed {
            tracing::debug!(open = self.panel.is_open(), "settings panel updated");
            self.refresh_title();
        }
        Ok(events)
    }

    fn settings_applied(&mut self, current: SettingsRequest, result: &Result<Applied>) {
        self.panel.applied(current, result);
        self.refresh_title();
    }
}
