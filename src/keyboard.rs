// Scancode-to-action translation for the foreground terminal's line discipline
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyEvent, KeyState, Keyboard, ScancodeSet1};

use crate::process::TerminalId;

/// What a key press asks the terminal layer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Char(u8),
    Enter,
    Backspace,
    ClearScreen,
    SwitchTerminal(TerminalId),
}

pub struct LineDiscipline {
    decoder: Keyboard<layouts::Us104Key, ScancodeSet1>,
    alt: bool,
    ctrl: bool,
}

impl LineDiscipline {
    pub fn new() -> Self {
        Self {
            decoder: Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore),
            alt: false,
            ctrl: false,
        }
    }

    /// Feed one raw scancode byte.
    pub fn feed(&mut self, scancode: u8) -> Option<KeyAction> {
        let event = self.decoder.add_byte(scancode).ok()??;
        self.track_modifiers(&event);

        if event.state == KeyState::Down && self.alt {
            let target = match event.code {
                KeyCode::F1 => Some(0),
                KeyCode::F2 => Some(1),
                KeyCode::F3 => Some(2),
                _ => None,
            };
            if let Some(tid) = target {
                return Some(KeyAction::SwitchTerminal(tid));
            }
        }

        match self.decoder.process_keyevent(event)? {
            DecodedKey::Unicode('\n') => Some(KeyAction::Enter),
            DecodedKey::Unicode('\u{8}') => Some(KeyAction::Backspace),
            DecodedKey::Unicode(c) if self.ctrl && c.eq_ignore_ascii_case(&'l') => {
                Some(KeyAction::ClearScreen)
            }
            DecodedKey::Unicode(c) if c.is_ascii() && !c.is_ascii_control() => {
                Some(KeyAction::Char(c as u8))
            }
            _ => None,
        }
    }

    fn track_modifiers(&mut self, event: &KeyEvent) {
        let down = match event.state {
            KeyState::Down => true,
            KeyState::Up => false,
            _ => return,
        };
        match event.code {
            KeyCode::LAlt | KeyCode::RAltGr => self.alt = down,
            KeyCode::LControl | KeyCode::RControl => self.ctrl = down,
            _ => {}
        }
    }
}

impl Default for LineDiscipline {
    fn default() -> Self {
        Self::new()
    }
}
