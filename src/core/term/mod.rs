//! Terminal interpretation of the probe's byte stream
//!
//! - **line**: editable line buffer with cursor and insertion mode
//! - **parser**: control/escape interpreter producing render effects
//! - **state**: console model (committed history + current line)

pub mod line;
pub mod parser;
pub mod state;

pub use line::InsertMode;
pub use state::{ConsoleState, ConsoleUpdate};
