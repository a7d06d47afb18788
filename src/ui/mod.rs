//! User interface rendering and input handling.
//!
//! - **renderer**: full-screen console view with a status bar
//! - **keymapper**: keyboard input to probe bytes and console commands

pub mod keymapper;
pub mod renderer;

pub use keymapper::{AppCommand, KeyMapper};
pub use renderer::Renderer;
