//! Device session management
//!
//! Owns the probe connection lifecycle, the steady-state poll cycle and the
//! identification (ping) cycle. Everything runs on the caller's thread: timers
//! are deadlines serviced by [`DeviceSession::service`], and every transfer is
//! a blocking call bounded by the transfer timeout.

use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use rusb::Direction;
use tracing::{debug, info, trace, warn};

use super::usb::channel::{ControlChannel, ControlRequest, DeviceInfo, Result, UsbError};
use super::usb::framer::{self, TransferBuffer};
use super::usb::protocol::{
    BaudRate, FunctionId, PING_INTERVAL, PING_TICKS, POLL_INTERVAL, PRODUCT_ID, VENDOR_ID,
    WIRE_RECEIVE_LEN,
};

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected { device: usize, baud: BaudRate },
    Disconnecting,
    Pinging { device: usize, ticks: u32 },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected { device, baud } => {
                write!(f, "connected to device #{} at {} baud", device, baud)
            }
            SessionState::Disconnecting => write!(f, "disconnecting"),
            SessionState::Pinging { device, ticks } => {
                write!(f, "pinging device #{} ({}/{})", device, ticks, PING_TICKS)
            }
        }
    }
}

/// Session events, delivered in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection state changed
    StateChanged(SessionState),
    /// Bytes received from the device
    DataReady(Vec<u8>),
    /// Received data did not fit the receive buffer
    Overflow { discarded: usize },
}

/// Fixed-interval deadline timer
#[derive(Debug, Clone, Copy)]
struct Timer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    fn start(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns `true` and re-arms when the deadline has passed
    fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

/// A probe session over a [`ControlChannel`]
pub struct DeviceSession<C: ControlChannel> {
    channel: C,
    devices: Vec<DeviceInfo>,
    state: SessionState,
    poll_timer: Timer,
    ping_timer: Timer,
    /// Keystrokes waiting for the next poll
    outbound: TransferBuffer,
    events: Sender<SessionEvent>,
}

impl<C: ControlChannel> DeviceSession<C> {
    pub fn new(channel: C, events: Sender<SessionEvent>) -> Self {
        Self {
            channel,
            devices: Vec::new(),
            state: SessionState::Disconnected,
            poll_timer: Timer::new(POLL_INTERVAL),
            ping_timer: Timer::new(PING_INTERVAL),
            outbound: TransferBuffer::new(),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected { .. })
    }

    pub fn is_pinging(&self) -> bool {
        matches!(self.state, SessionState::Pinging { .. })
    }

    /// Whether the steady-state poll timer is running
    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        self.poll_timer.is_active()
    }

    #[cfg(test)]
    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Result<&DeviceInfo> {
        if self.devices.is_empty() {
            return Err(UsbError::NoDeviceFound);
        }
        self.devices.get(index).ok_or(UsbError::InvalidDevice {
            index,
            count: self.devices.len(),
        })
    }

    /// Re-enumerate probes.
    ///
    /// Any active session is ended first. Every candidate is opened and closed
    /// once to check it is accessible; a failing candidate clears the list and
    /// the error is returned.
    pub fn find_devices(&mut self) -> Result<usize> {
        self.cancel_ping();
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!("Disconnect before enumeration failed: {}", e);
            }
        }
        self.devices.clear();

        let found = self.channel.enumerate(VENDOR_ID, PRODUCT_ID)?;
        for info in &found {
            if let Err(e) = self.channel.open(info) {
                self.channel.close();
                warn!("Device on bus {} address {} is not accessible: {}", info.bus, info.address, e);
                return Err(e);
            }
            self.channel.close();
        }

        info!("Found {} device(s)", found.len());
        self.devices = found;
        Ok(self.devices.len())
    }

    /// Connect to `device` and start polling.
    ///
    /// An unknown `device` is rejected without touching the current session.
    /// Otherwise a running ping cycle is cancelled and a connected device is
    /// disabled first. On failure the session is left disconnected with no
    /// handle open and no timer running.
    pub fn connect(&mut self, device: usize, baud: BaudRate) -> Result<()> {
        self.device(device)?;

        self.cancel_ping();
        self.poll_timer.stop();
        if self.is_connected() {
            if let Err(e) = self.close_link() {
                debug!("Disabling previous connection failed: {}", e);
            }
        }
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.open_link(device, baud) {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        self.poll_timer.start(Instant::now());
        self.set_state(SessionState::Connected { device, baud });
        info!("Connected to device #{} at {} baud", device, baud);
        Ok(())
    }

    /// Disconnect the connected device.
    ///
    /// The handle is closed even when the device refuses the disable request;
    /// that error is still returned.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.is_pinging() {
            self.cancel_ping();
            return Ok(());
        }
        if !self.is_connected() {
            return Err(UsbError::NotConnected);
        }

        self.poll_timer.stop();
        self.set_state(SessionState::Disconnecting);
        let result = self.close_link();
        self.outbound.clear();
        self.set_state(SessionState::Disconnected);

        match &result {
            Ok(()) => info!("Disconnected"),
            Err(e) => warn!("Device could not be set idle: {}", e),
        }
        result
    }

    /// Start blinking the indicator of `device`.
    ///
    /// A connected session is disconnected first.
    pub fn ping(&mut self, device: usize) -> Result<()> {
        self.cancel_ping();
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!("Disconnect before ping failed: {}", e);
            }
        }
        self.device(device)?;

        self.set_state(SessionState::Pinging { device, ticks: 0 });
        self.ping_timer.start(Instant::now());
        info!("Pinging device #{}", device);
        Ok(())
    }

    /// Stop a running ping cycle and close the device if it is open
    pub fn cancel_ping(&mut self) {
        if !self.is_pinging() {
            return;
        }

        self.ping_timer.stop();
        if self.channel.is_open() {
            if let Err(e) = self.close_link() {
                debug!("Closing device after ping failed: {}", e);
            }
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Queue one keystroke for the device.
    ///
    /// Returns `false` when the outbound buffer is full and the byte was dropped.
    pub fn send_byte(&mut self, byte: u8) -> bool {
        let queued = self.outbound.push(byte);
        if queued {
            trace!("Queued byte {:#04x}", byte);
        } else {
            debug!("Outbound buffer full, dropped byte {:#04x}", byte);
        }
        queued
    }

    /// Queue several keystrokes, returns how many were accepted
    pub fn send_bytes(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&b| self.send_byte(b)).count()
    }

    /// Fire due timers
    pub fn service(&mut self, now: Instant) {
        if self.ping_timer.fire(now) {
            self.ping_tick();
        }
        if self.poll_timer.fire(now) {
            self.poll_tick();
        }
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.poll_timer.deadline, self.ping_timer.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// One steady-state exchange.
    ///
    /// Failures are logged and swallowed; bytes that were not acknowledged stay
    /// queued for the next tick.
    pub fn poll_tick(&mut self) {
        if !self.is_connected() {
            return;
        }

        let pending = self.outbound.take();
        let mut received = TransferBuffer::new();
        let mut sent = 0;
        let mut discarded = 0;

        for chunk in framer::split_for_send(&pending) {
            let request = ControlRequest::data(Direction::In, FunctionId::ReadWriteDebug, chunk);
            let mut response = [0u8; WIRE_RECEIVE_LEN];

            match self.channel.control_transfer(&request, &mut response) {
                Ok(n) => {
                    sent += chunk.len();
                    if let Err(UsbError::BufferOverflow { discarded: d }) =
                        framer::accumulate_received(&mut received, &response[..n])
                    {
                        discarded += d;
                    }
                }
                Err(e) => {
                    warn!("Poll transfer failed: {}", e);
                    self.requeue(&pending[sent..]);
                    break;
                }
            }
        }

        if discarded > 0 {
            warn!("Receive buffer full, {} bytes discarded", discarded);
            self.emit(SessionEvent::Overflow { discarded });
        }
        if !received.is_empty() {
            self.emit(SessionEvent::DataReady(received.take()));
        }
    }

    /// One step of the ping cycle: odd ticks connect, even ticks disconnect
    pub fn ping_tick(&mut self) {
        let SessionState::Pinging { device, ticks } = self.state else {
            return;
        };
        let ticks = ticks + 1;
        self.state = SessionState::Pinging { device, ticks };

        let result = if ticks % 2 == 1 {
            self.open_link(device, BaudRate::PING)
        } else {
            self.close_link()
        };
        if let Err(e) = result {
            debug!("Ping tick {} failed: {}", ticks, e);
        }

        if ticks >= PING_TICKS {
            self.cancel_ping();
        }
    }

    /// Open `device` and enable the UART bridge; closes the handle on failure
    fn open_link(&mut self, device: usize, baud: BaudRate) -> Result<()> {
        let info = self.device(device)?.clone();
        self.channel.open(&info)?;

        if let Err(e) = self.command(FunctionId::EnableDebug, baud.selector()) {
            self.channel.close();
            return Err(e);
        }
        Ok(())
    }

    /// Disable the UART bridge and close the handle unconditionally
    fn close_link(&mut self) -> Result<()> {
        if !self.channel.is_open() {
            return Err(UsbError::NotConnected);
        }
        let result = self.command(FunctionId::DisableDebug, 0);
        self.channel.close();
        result
    }

    fn command(&mut self, function: FunctionId, argument: u8) -> Result<()> {
        let request = ControlRequest::command(Direction::In, function, argument);
        let mut response = [0u8; WIRE_RECEIVE_LEN];
        self.channel.control_transfer(&request, &mut response)?;
        Ok(())
    }

    /// Put unsent bytes back ahead of anything queued since
    fn requeue(&mut self, unsent: &[u8]) {
        let newer = self.outbound.take();
        let mut dropped = 0;
        for &b in unsent.iter().chain(newer.iter()) {
            if !self.outbound.push(b) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("Dropped {} queued bytes while requeueing", dropped);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The receiver going away only means nobody is listening anymore
        let _ = self.events.send(event);
    }
}

impl<C: ControlChannel> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        self.cancel_ping();
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                debug!("Disconnect on shutdown failed: {}", e);
            }
        }
    }
}
