//! OS-level keystrokes for the browser's native save dialog, which WebDriver can't reach.

use std::thread;
use std::time::Duration;

use enigo::{Direction, Enigo, Keyboard, Settings};
use log::debug;

/// Keys the save-dialog sequence uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Enter,
}

pub trait KeyboardAutomation {
    /// Presses `key` `presses` times, pausing `interval` between presses.
    fn press(&mut self, key: Key, presses: u32, interval: Duration) -> Result<(), String>;
    /// Types `text` one character at a time, pausing `interval` after each.
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), String>;
}

/// Keyboard automation through the desktop session's input system.
pub struct EnigoKeyboard {
    enigo: Enigo,
}

impl EnigoKeyboard {
    pub fn new() -> Result<Self, String> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|err| format!("Failed to connect to the input system: {err}"))?;
        Ok(Self { enigo })
    }

    fn enigo_key(key: Key) -> enigo::Key {
        match key {
            Key::Tab => enigo::Key::Tab,
            Key::Enter => enigo::Key::Return,
        }
    }
}

impl KeyboardAutomation for EnigoKeyboard {
    fn press(&mut self, key: Key, presses: u32, interval: Duration) -> Result<(), String> {
        debug!("Pressing {key:?} x{presses}");
        for press in 0..presses {
            if press > 0 {
                thread::sleep(interval);
            }
            self.enigo
                .key(Self::enigo_key(key), Direction::Click)
                .map_err(|err| format!("Failed to press {key:?}: {err}"))?;
        }
        Ok(())
    }

    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), String> {
        debug!("Typing {text:?}");
        let mut buffer = [0u8; 4];
        for ch in text.chars() {
            self.enigo
                .text(ch.encode_utf8(&mut buffer))
                .map_err(|err| format!("Failed to type {ch:?}: {err}"))?;
            thread::sleep(interval);
        }
        Ok(())
    }
}
