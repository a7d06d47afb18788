//! Editable line buffer
//!
//! Holds the line currently being written by the device, a cursor offset into
//! it and the insertion mode used by the next ordinary byte. Bytes are kept
//! raw and rendered as Latin-1.

/// How the next ordinary byte is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Cursor is at line end, bytes extend the line
    #[default]
    Append,
    /// Cursor is mid-line, bytes shift the rest of the line right
    Insert,
    /// Bytes overwrite the character under the cursor
    Replace,
}

/// The line being edited.
///
/// Invariant: `cursor <= text.len()`.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    text: Vec<u8>,
    cursor: usize,
    mode: InsertMode,
}

impl LineBuffer {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn mode(&self) -> InsertMode {
        self.mode
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// Line contents decoded as Latin-1
    #[cfg(test)]
    pub fn to_text(&self) -> String {
        latin1(&self.text)
    }

    /// Empty the line, cursor to 0, mode back to append
    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
        self.mode = InsertMode::Append;
    }

    /// Write one ordinary byte at the cursor according to the current mode
    pub fn write(&mut self, byte: u8) {
        match self.mode {
            InsertMode::Replace if self.cursor < self.text.len() => {
                self.text[self.cursor] = byte;
            }
            InsertMode::Insert => self.text.insert(self.cursor, byte),
            _ => {
                // Append, or Replace past the end of the line
                self.text.insert(self.cursor, byte);
            }
        }
        self.cursor += 1;

        if self.cursor >= self.text.len() {
            self.mode = InsertMode::Append;
        }
    }

    /// Append a byte at the end of the line regardless of the cursor
    pub fn push(&mut self, byte: u8) {
        self.text.push(byte);
        self.cursor = self.text.len();
        self.mode = InsertMode::Append;
    }

    /// Remove the character before the cursor.
    ///
    /// Returns `false` if the cursor is at the start.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.text.remove(self.cursor);
        true
    }

    /// Cursor to line start; following bytes overwrite the old contents
    pub fn carriage_return(&mut self) {
        self.cursor = 0;
        self.mode = InsertMode::Replace;
    }

    /// Move the cursor left by `n`, clamped at 0
    pub fn move_left(&mut self, n: usize) {
        self.cursor = self.cursor.saturating_sub(n);
        self.mode = InsertMode::Insert;
    }

    /// Move the cursor right by `n`, clamped at the line length
    pub fn move_right(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.text.len());
        self.mode = InsertMode::Insert;
    }

    /// Take the contents, leaving the buffer empty.
    ///
    /// A trailing newline is not part of the returned line.
    pub fn take(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.text);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        self.clear();
        latin1(&bytes)
    }
}

/// Decode raw bytes as Latin-1 (every byte maps to one char)
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line_from(text: &[u8]) -> LineBuffer {
        let mut line = LineBuffer::default();
        for &b in text {
            line.write(b);
        }
        line
    }

    #[test]
    fn test_append_and_backspace() {
        let mut line = line_from(b"abc");
        assert_eq!(line.cursor(), 3);
        assert_eq!(line.mode(), InsertMode::Append);

        assert!(line.backspace());
        assert_eq!(line.as_bytes(), b"ab");
        assert_eq!(line.cursor(), 2);

        line.move_left(9);
        assert_eq!(line.cursor(), 0);
        assert!(!line.backspace());
    }

    #[test]
    fn test_backspace_mid_line_shifts_left() {
        let mut line = line_from(b"abcd");
        line.move_left(1);
        assert!(line.backspace());
        assert_eq!(line.as_bytes(), b"abd");
        assert_eq!(line.cursor(), 2);
    }

    #[test]
    fn test_insert_mode_shifts_right() {
        let mut line = line_from(b"ad");
        line.move_left(1);
        assert_eq!(line.mode(), InsertMode::Insert);

        line.write(b'b');
        line.write(b'c');
        assert_eq!(line.as_bytes(), b"abcd");
        assert_eq!(line.cursor(), 3);
        assert_eq!(line.mode(), InsertMode::Insert);

        line.move_right(5);
        assert_eq!(line.cursor(), 4);
        line.write(b'e');
        assert_eq!(line.mode(), InsertMode::Append);
    }

    #[test]
    fn test_carriage_return_overwrites() {
        let mut line = line_from(b"hello");
        line.carriage_return();
        assert_eq!(line.mode(), InsertMode::Replace);

        line.write(b'J');
        assert_eq!(line.as_bytes(), b"Jello");
        assert_eq!(line.mode(), InsertMode::Replace);
    }

    #[test]
    fn test_take_strips_newline() {
        let mut line = line_from(b"ok");
        line.push(b'\n');
        assert_eq!(line.take(), "ok");
        assert!(line.is_empty());
        assert_eq!(line.cursor(), 0);
    }

    #[test]
    fn test_latin1() {
        assert_eq!(latin1(&[b'a', 0xE9]), "a\u{e9}");
    }

    proptest! {
        #[test]
        fn prop_replace_mode_length_and_cursor(
            original in proptest::collection::vec(0x20u8..0x7f, 0..40),
            start in 0usize..40,
            written in proptest::collection::vec(0x20u8..0x7f, 0..40),
        ) {
            let mut line = line_from(&original);
            line.carriage_return();
            let start = start.min(original.len());
            if start > 0 {
                line.move_right(start);
                // Re-enter replace mode at the chosen column
                line.mode = InsertMode::Replace;
            }

            for &b in &written {
                line.write(b);
            }

            prop_assert_eq!(line.len(), original.len().max(start + written.len()));
            prop_assert_eq!(line.cursor(), start + written.len());
            prop_assert!(line.cursor() <= line.len());
        }
    }
}
