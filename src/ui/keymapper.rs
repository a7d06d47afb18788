//! Key mapping for console input
//!
//! Converts key events either to bytes for the probe's outbound queue or to
//! console commands bound to function keys.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Console commands bound to keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    /// Connect (or reconnect) to the selected device
    Connect,
    Disconnect,
    /// Blink the selected device's indicator
    Ping,
    /// Switch to the next supported baud rate
    CycleBaud,
    /// Clear history and the current line
    Clear,
    Quit,
}

/// Line kill understood by the firmware
const KILL_LINE: &[u8] = b"\x1b[2K";
/// Full clear understood by the firmware
const CLEAR_SCREEN: &[u8] = b"\x1bL";

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a key to a console command, if it is bound to one
    pub fn command(event: &KeyEvent) -> Option<AppCommand> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::F(2) => Some(AppCommand::Connect),
            KeyCode::F(3) => Some(AppCommand::Disconnect),
            KeyCode::F(4) => Some(AppCommand::Ping),
            KeyCode::F(5) => Some(AppCommand::CycleBaud),
            KeyCode::F(8) => Some(AppCommand::Clear),
            KeyCode::F(10) => Some(AppCommand::Quit),
            KeyCode::Char('q') | KeyCode::Char('Q')
                if mods.contains(Modifiers::CTRL | Modifiers::ALT) =>
            {
                Some(AppCommand::Quit)
            }
            _ => None,
        }
    }

    /// Map a crossterm KeyEvent to bytes for the probe
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Self::map_char(ch, mods),
            KeyCode::Enter => Some(vec![b'\n']),
            KeyCode::Backspace => Some(vec![0x08]),
            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::Esc => Some(vec![0x1B]),
            KeyCode::Left => Some(b"\x1b[1D".to_vec()),
            KeyCode::Right => Some(b"\x1b[1C".to_vec()),
            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Option<Vec<u8>> {
        if mods.contains(Modifiers::ALT) {
            return None;
        }

        if mods.contains(Modifiers::CTRL) {
            return match ch.to_ascii_lowercase() {
                'u' => Some(KILL_LINE.to_vec()),
                'l' => Some(CLEAR_SCREEN.to_vec()),
                // Ctrl + letter = control character
                c if c.is_ascii_lowercase() => Some(vec![(c as u8) - b'a' + 1]),
                '@' | ' ' => Some(vec![0x00]),
                '[' => Some(vec![0x1B]),
                _ => None,
            };
        }

        // The device speaks single bytes; anything outside Latin-1 has no encoding
        u8::try_from(u32::from(ch)).ok().map(|b| vec![b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"a".to_vec()));

        let event = key_event(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event), Some(b"A".to_vec()));

        // Latin-1 passes through as one byte
        let event = key_event(KeyCode::Char('é'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(vec![0xE9]));

        let event = key_event(KeyCode::Char('€'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_ctrl_keys() {
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(vec![0x03]));

        let event = key_event(KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[2K".to_vec()));

        let event = key_event(KeyCode::Char('l'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1bL".to_vec()));

        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_editing_keys() {
        let event = key_event(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(vec![b'\n']));

        let event = key_event(KeyCode::Backspace, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(vec![0x08]));

        let event = key_event(KeyCode::Left, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[1D".to_vec()));

        let event = key_event(KeyCode::Right, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[1C".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_commands() {
        let event = key_event(KeyCode::F(2), KeyModifiers::NONE);
        assert_eq!(KeyMapper::command(&event), Some(AppCommand::Connect));

        let event = key_event(KeyCode::F(10), KeyModifiers::NONE);
        assert_eq!(KeyMapper::command(&event), Some(AppCommand::Quit));

        let event = key_event(KeyCode::Char('q'), KeyModifiers::CONTROL | KeyModifiers::ALT);
        assert_eq!(KeyMapper::command(&event), Some(AppCommand::Quit));

        let event = key_event(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::command(&event), None);
        assert_eq!(KeyMapper::map(&event), Some(vec![0x11]));
    }
}
