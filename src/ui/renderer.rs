//! Console renderer using crossterm
//!
//! Draws the committed history, the line being edited and a status bar.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::config::Color;
use crate::core::term::line::latin1;
use crate::core::term::{ConsoleState, InsertMode};

/// Visible part of the console for a screen of `cols` x `rows` text cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Rows top to bottom, already clipped to the width
    pub lines: Vec<String>,
    /// Cursor cell within `lines`
    pub cursor: (u16, u16),
    /// Next byte overwrites the cell under the cursor
    pub overwrite: bool,
}

impl Frame {
    /// Lay out the newest history lines followed by the current line
    pub fn layout(state: &ConsoleState, cols: u16, rows: u16) -> Self {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;

        let history_rows = rows - 1;
        let skip = state.history_len().saturating_sub(history_rows);
        let mut lines: Vec<String> = state
            .history()
            .skip(skip)
            .map(|line| line.chars().take(cols).collect())
            .collect();

        // Scroll the current line horizontally to keep the cursor visible
        let current = state.current_line();
        let offset = current.cursor().saturating_sub(cols - 1);
        let visible = &current.as_bytes()[offset.min(current.len())..];
        let visible = &visible[..visible.len().min(cols)];

        let cursor = ((current.cursor() - offset) as u16, lines.len() as u16);
        lines.push(latin1(visible));

        Self {
            lines,
            cursor,
            overwrite: current.mode() == InsertMode::Replace,
        }
    }
}

/// Console renderer
pub struct Renderer {
    foreground: Color,
    background: Color,
    /// Whether the terminal has been initialized
    initialized: bool,
}

impl Renderer {
    pub fn new(foreground: Color, background: Color) -> Self {
        Self {
            foreground,
            background,
            initialized: false,
        }
    }

    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        self.initialized = true;
        Ok(())
    }

    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, SetCursorStyle::DefaultUserShape, Show);
        let _ = execute!(stdout, EnableLineWrap);
        let _ = execute!(stdout, LeaveAlternateScreen);
        let _ = stdout.flush();

        // Disable raw mode - this is the most important part
        terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Redraw the whole screen
    pub fn render(&mut self, state: &ConsoleState, status: &str) -> io::Result<()> {
        let (cols, rows) = Self::size()?;
        let console_rows = rows.saturating_sub(1).max(1);
        let frame = Frame::layout(state, cols, console_rows);

        let mut stdout = io::stdout();
        queue!(
            stdout,
            Hide,
            SetForegroundColor(self.foreground.to_crossterm()),
            SetBackgroundColor(self.background.to_crossterm())
        )?;

        for row in 0..console_rows {
            queue!(stdout, MoveTo(0, row), Clear(ClearType::UntilNewLine))?;
            if let Some(line) = frame.lines.get(row as usize) {
                queue!(stdout, Print(line))?;
            }
        }

        // Status bar in reverse video on the last row
        let status: String = status.chars().take(cols as usize).collect();
        queue!(
            stdout,
            MoveTo(0, rows.saturating_sub(1)),
            SetAttribute(Attribute::Reverse),
            Print(format!("{:<width$}", status, width = cols as usize)),
            SetAttribute(Attribute::Reset),
            ResetColor,
            MoveTo(frame.cursor.0, frame.cursor.1),
            if frame.overwrite {
                SetCursorStyle::SteadyBlock
            } else {
                SetCursorStyle::SteadyBar
            },
            Show
        )?;

        stdout.flush()
    }

    /// Ring the terminal bell
    pub fn beep(&mut self) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_shows_newest_lines() {
        let mut state = ConsoleState::default();
        state.put_bytes(b"one\ntwo\nthree\nfour\n> ");

        let frame = Frame::layout(&state, 80, 3);
        assert_eq!(frame.lines, vec!["three", "four", "> "]);
        assert_eq!(frame.cursor, (2, 2));
        assert!(!frame.overwrite);

        // Prompt redraw overwrites from line start
        state.put_bytes(b"\r");
        assert!(Frame::layout(&state, 80, 3).overwrite);
    }

    #[test]
    fn test_layout_clips_width() {
        let mut state = ConsoleState::default();
        state.put_bytes(b"abcdefgh\nxy");

        let frame = Frame::layout(&state, 4, 10);
        assert_eq!(frame.lines, vec!["abcd", "xy"]);
        assert_eq!(frame.cursor, (2, 1));
    }

    #[test]
    fn test_layout_scrolls_long_current_line() {
        let mut state = ConsoleState::default();
        state.put_bytes(b"0123456789");

        let frame = Frame::layout(&state, 4, 2);
        assert_eq!(frame.lines, vec!["789"]);
        assert_eq!(frame.cursor, (3, 0));

        // Cursor moved back into the first window
        state.put_bytes(b"\x1b[9D");
        let frame = Frame::layout(&state, 4, 2);
        assert_eq!(frame.lines, vec!["0123"]);
        assert_eq!(frame.cursor, (1, 0));
    }

    #[test]
    fn test_layout_empty_console() {
        let state = ConsoleState::default();
        let frame = Frame::layout(&state, 80, 24);
        assert_eq!(frame.lines, vec![String::new()]);
        assert_eq!(frame.cursor, (0, 0));
    }
}
