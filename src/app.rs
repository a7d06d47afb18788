//! Interactive console application
//!
//! Ties a [`DeviceSession`] to the console model: keystrokes go to the
//! outbound queue, session events are fed into the interpreter and optionally
//! captured to a file, function keys drive the session.

use std::io::Write;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crossterm::event::KeyEvent;
use tracing::{error, info, warn};

use crate::core::session::{DeviceSession, SessionEvent, SessionState};
use crate::core::term::{ConsoleState, ConsoleUpdate};
use crate::core::usb::{BaudRate, ControlChannel};
use crate::ui::{AppCommand, KeyMapper};

/// Longest wait for input when no timer is due
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Startup settings of the console
pub struct AppOptions {
    pub device: usize,
    pub baud: BaudRate,
    pub max_rows: usize,
    pub local_echo: bool,
}

pub struct App<C: ControlChannel> {
    session: DeviceSession<C>,
    events: Receiver<SessionEvent>,
    console: ConsoleState,
    device: usize,
    baud: BaudRate,
    local_echo: bool,
    /// Received bytes are appended here
    capture: Option<Box<dyn Write>>,
    /// Last message shown in the status bar
    message: String,
    quit: bool,
}

impl<C: ControlChannel> App<C> {
    pub fn new(channel: C, options: AppOptions, capture: Option<Box<dyn Write>>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            session: DeviceSession::new(channel, tx),
            events: rx,
            console: ConsoleState::new(options.max_rows),
            device: options.device,
            baud: options.baud,
            local_echo: options.local_echo,
            capture,
            message: String::new(),
            quit: false,
        }
    }

    pub fn console(&self) -> &ConsoleState {
        &self.console
    }

    /// Baud rate used by the next connect
    pub fn baud(&self) -> BaudRate {
        self.baud
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Enumerate devices and connect to the selected one if present
    pub fn start(&mut self) {
        if self.refresh_devices() {
            self.connect();
        }
    }

    /// Handle one key press
    pub fn handle_key(&mut self, event: &KeyEvent) -> ConsoleUpdate {
        if let Some(command) = KeyMapper::command(event) {
            return self.run_command(command);
        }

        let Some(bytes) = KeyMapper::map(event) else {
            return ConsoleUpdate::default();
        };

        if !self.session.is_connected() {
            self.message = "Not connected (F2 to connect)".to_string();
            return ConsoleUpdate {
                beeps: 1,
                dirty: true,
            };
        }

        let mut update = ConsoleUpdate::default();
        let queued = self.session.send_bytes(&bytes);
        if queued < bytes.len() {
            self.message = "Output buffer full, keystroke dropped".to_string();
            update.beeps += 1;
            update.dirty = true;
        }
        if self.local_echo {
            update.merge(self.console.put_bytes(&bytes[..queued]));
        }
        update
    }

    pub fn run_command(&mut self, command: AppCommand) -> ConsoleUpdate {
        info!("Command: {:?}", command);
        match command {
            AppCommand::Connect => {
                if self.session.device_count() == 0 && !self.refresh_devices() {
                    return Self::redraw();
                }
                self.connect();
            }
            AppCommand::Disconnect => match self.session.disconnect() {
                Ok(()) => self.message = "Disconnected".to_string(),
                Err(e) => self.report(e),
            },
            AppCommand::Ping => {
                if self.session.device_count() == 0 && !self.refresh_devices() {
                    return Self::redraw();
                }
                match self.session.ping(self.device) {
                    Ok(()) => self.message = format!("Pinging device #{}", self.device),
                    Err(e) => self.report(e),
                }
            }
            AppCommand::CycleBaud => {
                self.baud = self.baud.next_supported();
                self.message = format!("Baud rate {}", self.baud);
                if self.session.is_connected() {
                    self.connect();
                }
            }
            AppCommand::Clear => {
                self.console.clear();
                self.message.clear();
            }
            AppCommand::Quit => self.quit = true,
        }
        Self::redraw()
    }

    /// Fire due session timers and apply the resulting events
    pub fn pump(&mut self, now: Instant) -> ConsoleUpdate {
        self.session.service(now);

        let mut update = ConsoleUpdate::default();
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::DataReady(data) => {
                    self.capture(&data);
                    update.merge(self.console.put_bytes(&data));
                }
                SessionEvent::Overflow { discarded } => {
                    self.message = format!("Receive buffer full, {} bytes lost", discarded);
                    update.dirty = true;
                }
                SessionEvent::StateChanged(_) => update.dirty = true,
            }
        }
        update
    }

    /// How long the input loop may block before the session needs service
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        match self.session.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(IDLE_TIMEOUT),
            None => IDLE_TIMEOUT,
        }
    }

    pub fn status_line(&self) -> String {
        let state = match self.session.state() {
            SessionState::Disconnected => format!(
                "Disconnected ({} device(s), next #{} at {} baud)",
                self.session.device_count(),
                self.device,
                self.baud
            ),
            other => {
                let mut text = other.to_string();
                text[..1].make_ascii_uppercase();
                text
            }
        };

        let mut line = format!(
            " {} | F2 Connect  F3 Disconnect  F4 Ping  F5 Baud  F8 Clear  F10 Quit",
            state
        );
        if !self.message.is_empty() {
            line.push_str(" | ");
            line.push_str(&self.message);
        }
        line
    }

    /// End any session activity and flush the capture file
    pub fn shutdown(&mut self) {
        self.session.cancel_ping();
        if self.session.is_connected() {
            if let Err(e) = self.session.disconnect() {
                warn!("Disconnect on exit failed: {}", e);
            }
        }
        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.flush() {
                warn!("Capture file flush failed: {}", e);
            }
        }
    }

    fn refresh_devices(&mut self) -> bool {
        match self.session.find_devices() {
            Ok(0) => {
                self.message = "No device found".to_string();
                false
            }
            Ok(count) => {
                self.message = format!("Found {} device(s)", count);
                if self.device >= count {
                    warn!("Device #{} not present, using #0", self.device);
                    self.device = 0;
                }
                true
            }
            Err(e) => {
                self.report(e);
                false
            }
        }
    }

    fn connect(&mut self) {
        match self.session.connect(self.device, self.baud) {
            Ok(()) => match self.session.device(self.device) {
                Ok(info) => {
                    self.message = format!("Device on bus {} address {}", info.bus, info.address)
                }
                Err(_) => self.message.clear(),
            },
            Err(e) => self.report(e),
        }
    }

    fn capture(&mut self, data: &[u8]) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Err(e) = capture.write_all(data) {
            error!("Capture stopped: {}", e);
            self.message = format!("Capture stopped: {}", e);
            self.capture = None;
        }
    }

    fn report(&mut self, e: impl std::fmt::Display) {
        error!("{}", e);
        self.message = e.to_string();
    }

    fn redraw() -> ConsoleUpdate {
        ConsoleUpdate {
            beeps: 0,
            dirty: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::usb::mock::MockChannel;
    use crate::core::usb::protocol::FunctionId;
    use crossterm::event::{KeyCode, KeyModifiers};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Writer whose contents stay inspectable after being boxed
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn options() -> AppOptions {
        AppOptions {
            device: 0,
            baud: BaudRate::B9600,
            max_rows: 100,
            local_echo: false,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_start_connects_first_device() {
        let mut app = App::new(MockChannel::with_devices(2), options(), None);
        app.start();
        assert_eq!(
            app.session.state(),
            SessionState::Connected {
                device: 0,
                baud: BaudRate::B9600
            }
        );
        assert!(app.status_line().contains("bus 1 address 10"));
    }

    #[test]
    fn test_start_without_devices() {
        let mut app = App::new(MockChannel::default(), options(), None);
        app.start();
        assert_eq!(app.session.state(), SessionState::Disconnected);
        assert!(app.status_line().contains("No device found"));
    }

    #[test]
    fn test_keys_need_connection() {
        let mut app = App::new(MockChannel::with_devices(1), options(), None);
        let update = app.handle_key(&key(KeyCode::Char('a')));
        assert_eq!(update.beeps, 1);
        assert!(app.status_line().contains("Not connected"));
    }

    #[test]
    fn test_received_data_reaches_console_and_capture() {
        let capture = SharedBuffer::default();
        let mut channel = MockChannel::with_devices(1);
        channel.responses.push_back(vec![6, b'o', b'k', b'\r', b'\n', b'>', 0x07]);

        let mut app = App::new(channel, options(), Some(Box::new(capture.clone())));
        app.start();
        app.session.poll_tick();

        let update = app.pump(Instant::now());
        assert!(update.dirty);
        assert_eq!(update.beeps, 1);
        assert_eq!(app.console().history().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(app.console().current_line().to_text(), ">");
        assert_eq!(capture.0.borrow().as_slice(), b"ok\r\n>\x07");
    }

    #[test]
    fn test_local_echo() {
        let mut app = App::new(
            MockChannel::with_devices(1),
            AppOptions {
                local_echo: true,
                ..options()
            },
            None,
        );
        app.start();
        app.handle_key(&key(KeyCode::Char('h')));
        app.handle_key(&key(KeyCode::Char('i')));
        app.handle_key(&key(KeyCode::Left));
        assert_eq!(app.console().current_line().to_text(), "hi");
        assert_eq!(app.console().current_line().cursor(), 1);
    }

    #[test]
    fn test_cycle_baud_reconnects() {
        let mut app = App::new(MockChannel::with_devices(1), options(), None);
        app.start();
        app.run_command(AppCommand::CycleBaud);

        assert_eq!(app.baud(), BaudRate::B19200);
        assert_eq!(
            app.session.state(),
            SessionState::Connected {
                device: 0,
                baud: BaudRate::B19200
            }
        );
    }

    #[test]
    fn test_ping_and_quit() {
        let mut app = App::new(MockChannel::with_devices(1), options(), None);
        app.start();
        app.run_command(AppCommand::Ping);
        assert!(app.session.is_pinging());
        assert!(app.poll_timeout(Instant::now()) <= Duration::from_millis(150));

        app.handle_key(&key(KeyCode::F(10)));
        assert!(app.should_quit());
        app.shutdown();
        assert_eq!(app.session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_shutdown_disables_device() {
        let mut app = App::new(MockChannel::with_devices(1), options(), None);
        app.start();
        app.shutdown();

        let last = app.session.channel_mut().requests.last().map(|r| r.function);
        assert_eq!(last, Some(FunctionId::DisableDebug));
        assert!(!app.session.channel_mut().is_open());
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut channel = MockChannel::with_devices(1);
        for _ in 0..2 {
            let mut response = vec![100u8];
            response.extend(std::iter::repeat(b'x').take(100));
            channel.responses.push_back(response);
        }
        let mut app = App::new(channel, options(), None);
        app.start();
        app.handle_key(&key(KeyCode::Char('a')));
        app.handle_key(&key(KeyCode::Char('b')));
        app.handle_key(&key(KeyCode::Char('c')));
        app.handle_key(&key(KeyCode::Char('d')));
        app.session.poll_tick();
        app.pump(Instant::now());

        assert!(app.status_line().contains("72 bytes lost"));
    }
}
