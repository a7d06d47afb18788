//! Console state
//!
//! Applies interpreter render effects: committed lines go into a bounded
//! history, the line being edited is shown after them.

use std::collections::VecDeque;

use super::line::LineBuffer;
use super::parser::{Interpreter, RenderEffect};

/// Default number of committed lines kept
pub const DEF_MAX_ROWS: usize = 100;
/// Smallest allowed history size
pub const MIN_ROWS: usize = 50;
/// Largest allowed history size
pub const MAX_ROWS: usize = 500;

/// Summary of one batch of fed bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleUpdate {
    /// Number of bells (requested or from malformed sequences)
    pub beeps: usize,
    /// Whether anything visible changed
    pub dirty: bool,
}

impl ConsoleUpdate {
    pub fn merge(&mut self, other: ConsoleUpdate) {
        self.beeps += other.beeps;
        self.dirty |= other.dirty;
    }
}

/// Screen contents of the console
pub struct ConsoleState {
    interpreter: Interpreter,
    history: VecDeque<String>,
    max_rows: usize,
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new(DEF_MAX_ROWS)
    }
}

impl ConsoleState {
    pub fn new(max_rows: usize) -> Self {
        let max_rows = max_rows.clamp(MIN_ROWS, MAX_ROWS);
        Self {
            interpreter: Interpreter::new(),
            history: VecDeque::with_capacity(max_rows),
            max_rows,
        }
    }

    /// Feed received bytes through the interpreter, in order
    pub fn put_bytes(&mut self, bytes: &[u8]) -> ConsoleUpdate {
        let mut update = ConsoleUpdate::default();

        for &byte in bytes {
            match self.interpreter.feed(byte) {
                RenderEffect::None => {}
                RenderEffect::LineUpdated => update.dirty = true,
                RenderEffect::LineCommitted => {
                    let line = self.interpreter.take_line();
                    self.push_history(line);
                    update.dirty = true;
                }
                RenderEffect::Beep => update.beeps += 1,
                RenderEffect::ScreenCleared => {
                    self.history.clear();
                    update.dirty = true;
                }
            }
        }

        update
    }

    /// Clear history and the current line
    pub fn clear(&mut self) {
        self.history.clear();
        self.interpreter.clear();
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(|s| s.as_str())
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn current_line(&self) -> &LineBuffer {
        self.interpreter.line()
    }

    #[cfg(test)]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn push_history(&mut self, line: String) {
        self.history.push_back(line);
        while self.history.len() > self.max_rows {
            self.history.pop_front();
        }
    }
}
