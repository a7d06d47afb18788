//! Core console components.
//!
//! - **usb**: probe transport (constants, framing, control channel)
//! - **term**: interpretation of the probe's byte stream into console lines
//! - **session**: connection lifecycle, poll cycle and ping cycle
//!
//! # Architecture
//!
//! ```text
//! DeviceSession
//! ├── ControlChannel (libusb handle, one at a time)
//! ├── TransferBuffer (outbound keystrokes)
//! └── SessionEvent ──> ConsoleState
//!                      ├── Interpreter (control bytes + escapes)
//!                      └── history (committed lines)
//! ```

pub mod session;
pub mod term;
pub mod usb;
