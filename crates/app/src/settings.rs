use video_avatar_core::{Applied, Result, SettingsRequest, StageCount};
use winit::keyboard::KeyCode;

/// Keyboard actions understood by the avatar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    TogglePanel,
    SelectStages(StageCount),
    NextWindowSize,
    Apply,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        let action = match code {
            KeyCode::Escape => Self::Quit,
            KeyCode::KeyI => Self::TogglePanel,
            KeyCode::Digit2 | KeyCode::Numpad2 => Self::SelectStages(StageCount::Two),
            KeyCode::Digit3 | KeyCode::Numpad3 => Self::SelectStages(StageCount::Three),
            KeyCode::Digit4 | KeyCode::Numpad4 => Self::SelectStages(StageCount::Four),
            KeyCode::Tab => Self::NextWindowSize,
            KeyCode::Enter | KeyCode::NumpadEnter => Self::Apply,
            _ => return None,
        };
        Some(action)
    }
}

/// What the window should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    None,
    Quit,
    Apply(SettingsRequest),
}

/// Keyboard-driven settings surface, shown in the window title.
///
/// Opening it copies the live settings into a pending selection; digits and
/// `Tab` edit the selection and `Enter` hands it to the playback loop.
#[derive(Debug)]
pub struct SettingsPanel {
    current: SettingsRequest,
    pending: Option<SettingsRequest>,
    status: Option<String>,
}

impl SettingsPanel {
    pub fn new(current: SettingsRequest) -> Self {
        Self {
            current,
            pending: None,
            status: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.pending.is_some()
    }

    pub fn handle(&mut self, action: KeyAction) -> PanelCommand {
        match action {
            KeyAction::Quit => return PanelCommand::Quit,
            KeyAction::TogglePanel => {
                if self.pending.take().is_none() {
                    self.pending = Some(self.current);
                    self.status = None;
                }
            }
            // Editing keys do nothing while the panel is closed.
            KeyAction::SelectStages(count) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.stage_count = count;
                }
            }
            KeyAction::NextWindowSize => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.window_size = pending.window_size.next_preset();
                }
            }
            KeyAction::Apply => {
                if let Some(request) = self.pending.take() {
                    return PanelCommand::Apply(request);
                }
            }
        }
        PanelCommand::None
    }

    /// Records the outcome of an apply and the settings now live.
    pub fn applied(&mut self, current: SettingsRequest, result: &Result<Applied>) {
        self.current = current;
        self.status = match result {
            Ok(applied) if applied.changed_anything() => Some("applied".to_string()),
            Ok(_) => None,
            Err(err) => Some(format!("rejected: {err}")),
        };
    }

    pub fn title(&self, base: &str) -> String {
        let mut title = match &self.pending {
            Some(pending) => format!(
                "{base} | settings: stages {} [2/3/4], size {} [Tab], Enter to apply, I to close",
                pending.stage_count, pending.window_size
            ),
            None => base.to_string(),
        };
        if let Some(status) = &self.status {
            title.push_str(" | ");
            title.push_str(status);
        }
        title
    }
}
