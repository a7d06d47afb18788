//! Console byte interpreter
//!
//! Consumes the byte stream coming from the probe and edits a single
//! [`LineBuffer`]. Only the escape subset emitted by the probe firmware is
//! understood; anything else beeps and is discarded.
//!
//! Recognized sequences:
//!
//! | Sequence    | Action                         |
//! |-------------|--------------------------------|
//! | `ESC L`     | clear screen                   |
//! | `ESC [ 2 J` | clear screen                   |
//! | `ESC [ n D` | cursor left `n` (single digit) |
//! | `ESC [ n C` | cursor right `n` (single digit)|
//! | `ESC [ 2 K` | clear current line             |

use thiserror::Error;

use super::line::LineBuffer;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const BS: u8 = 0x08;

/// Longest escape sequence kept before it is rejected
const MAX_SEQUENCE_LEN: usize = 16;

/// What the consumer has to do after a byte was fed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEffect {
    /// Nothing visible changed
    None,
    /// The current line or its cursor changed
    LineUpdated,
    /// A newline ended the current line; snapshot it with [`Interpreter::take_line`]
    LineCommitted,
    /// Audible bell, either requested or caused by a malformed sequence
    Beep,
    /// Screen and line were cleared
    ScreenCleared,
}

/// Malformed escape input, resolved by a beep inside the interpreter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
enum EscapeError {
    #[error("unexpected byte {0:#04x} in escape sequence")]
    UnexpectedByte(u8),

    #[error("unknown escape {0:?}")]
    UnknownEscape(char),

    #[error("unsupported CSI params={params:?} final={final_byte:?}")]
    UnsupportedCsi { params: String, final_byte: char },

    #[error("escape sequence too long")]
    TooLong,
}

/// Completed escape sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeAction {
    ClearScreen,
    ClearLine,
    CursorLeft(usize),
    CursorRight(usize),
}

/// Accumulator for an escape sequence in progress; empty when none is pending
#[derive(Debug, Default)]
struct EscapeAccumulator {
    bytes: Vec<u8>,
}

impl EscapeAccumulator {
    fn is_pending(&self) -> bool {
        !self.bytes.is_empty()
    }

    fn start(&mut self) {
        self.bytes.clear();
        self.bytes.push(ESC);
    }

    fn is_csi(&self) -> bool {
        self.bytes.get(1) == Some(&b'[')
    }

    /// Feed one byte of a pending sequence.
    ///
    /// `Ok(None)` means the sequence grew and is still pending.
    fn advance(&mut self, byte: u8) -> Result<Option<EscapeAction>, EscapeError> {
        if self.bytes.len() >= MAX_SEQUENCE_LEN {
            return Err(EscapeError::TooLong);
        }

        if !self.is_csi() {
            // Byte right after ESC
            return match byte {
                b'[' => {
                    self.bytes.push(byte);
                    Ok(None)
                }
                b'L' => Ok(Some(EscapeAction::ClearScreen)),
                0x40..=0x5F => Err(EscapeError::UnknownEscape(byte as char)),
                _ => Err(EscapeError::UnexpectedByte(byte)),
            };
        }

        // Parameter and intermediate bytes are kept until the final byte,
        // which decides whether the whole sequence is understood
        match byte {
            0x40..=0x7E => self.dispatch_csi(byte).map(Some),
            0x00..=0x1F => Err(EscapeError::UnexpectedByte(byte)),
            _ => {
                self.bytes.push(byte);
                Ok(None)
            }
        }
    }

    fn dispatch_csi(&self, final_byte: u8) -> Result<EscapeAction, EscapeError> {
        let params = &self.bytes[2..];
        let single_digit = match params {
            [d] if d.is_ascii_digit() => Some((d - b'0') as usize),
            _ => None,
        };

        match (final_byte, params, single_digit) {
            (b'J', b"2", _) => Ok(EscapeAction::ClearScreen),
            (b'K', b"2", _) => Ok(EscapeAction::ClearLine),
            (b'D', _, Some(n)) => Ok(EscapeAction::CursorLeft(n)),
            (b'C', _, Some(n)) => Ok(EscapeAction::CursorRight(n)),
            _ => Err(EscapeError::UnsupportedCsi {
                params: String::from_utf8_lossy(params).into_owned(),
                final_byte: final_byte as char,
            }),
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Terminal interpreter for the probe's output stream
#[derive(Debug, Default)]
pub struct Interpreter {
    line: LineBuffer,
    escape: EscapeAccumulator,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self) -> &LineBuffer {
        &self.line
    }

    /// Whether an escape sequence is waiting for more bytes
    #[cfg(test)]
    pub fn escape_pending(&self) -> bool {
        self.escape.is_pending()
    }

    /// Feed a single byte
    pub fn feed(&mut self, byte: u8) -> RenderEffect {
        if self.escape.is_pending() {
            return self.feed_escape(byte);
        }

        match byte {
            BS => {
                if self.line.backspace() {
                    RenderEffect::LineUpdated
                } else {
                    RenderEffect::None
                }
            }
            ESC => {
                self.escape.start();
                RenderEffect::None
            }
            BEL => RenderEffect::Beep,
            b'\n' => {
                self.line.push(byte);
                RenderEffect::LineCommitted
            }
            b'\r' => {
                self.line.carriage_return();
                RenderEffect::None
            }
            _ => {
                self.line.write(byte);
                RenderEffect::LineUpdated
            }
        }
    }

    /// Snapshot the committed line and reset the line contents.
    ///
    /// A pending escape sequence is left untouched.
    pub fn take_line(&mut self) -> String {
        self.line.take()
    }

    /// Explicit clear: empties the line and drops any pending escape
    pub fn clear(&mut self) {
        self.line.clear();
        self.escape.clear();
    }

    fn feed_escape(&mut self, byte: u8) -> RenderEffect {
        match self.escape.advance(byte) {
            Ok(None) => RenderEffect::None,
            Ok(Some(action)) => {
                self.escape.clear();
                self.apply(action)
            }
            Err(e) => {
                tracing::debug!("Malformed escape sequence {:?}: {}", self.escape.bytes, e);
                self.escape.clear();
                RenderEffect::Beep
            }
        }
    }

    fn apply(&mut self, action: EscapeAction) -> RenderEffect {
        match action {
            EscapeAction::ClearScreen => {
                self.line.clear();
                RenderEffect::ScreenCleared
            }
            EscapeAction::ClearLine => {
                self.line.clear();
                RenderEffect::LineUpdated
            }
            EscapeAction::CursorLeft(n) => {
                self.line.move_left(n);
                RenderEffect::LineUpdated
            }
            EscapeAction::CursorRight(n) => {
                self.line.move_right(n);
                RenderEffect::LineUpdated
            }
        }
    }
}
