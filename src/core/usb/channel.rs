//! USB control channel
//!
//! Opens and closes the probe, enumerates candidates by VID/PID and performs
//! single blocking vendor control transfers. At most one device handle is
//! open at any time; opening a device closes the previous handle first.

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use thiserror::Error;
use tracing::debug;

use super::protocol::{FunctionId, CHUNK_LEN, TRANSFER_TIMEOUT};

/// Reason a device could not be opened
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    #[error("no memory")]
    OutOfMemory,

    #[error("insufficient permissions")]
    PermissionDenied,

    #[error("device does not exist")]
    DeviceGone,

    #[error("unknown error")]
    Unknown,
}

impl From<rusb::Error> for OpenFailure {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NoMem => OpenFailure::OutOfMemory,
            rusb::Error::Access => OpenFailure::PermissionDenied,
            rusb::Error::NoDevice => OpenFailure::DeviceGone,
            _ => OpenFailure::Unknown,
        }
    }
}

#[derive(Error, Debug)]
pub enum UsbError {
    #[error("USB subsystem cannot be initialized: {0}")]
    Init(#[source] rusb::Error),

    #[error("Failed to enumerate USB devices: {0}")]
    Enumeration(#[source] rusb::Error),

    #[error("No device found")]
    NoDeviceFound,

    #[error("Device #{index} of {count} does not exist")]
    InvalidDevice { index: usize, count: usize },

    #[error("Device could not be opened: {0}")]
    Open(OpenFailure),

    #[error("There is no device connected")]
    NotConnected,

    #[error("Control transfer timed out")]
    Timeout,

    #[error("Control transfer failed: {0}")]
    Transfer(#[source] rusb::Error),

    #[error("Receive buffer full, {discarded} bytes discarded")]
    BufferOverflow { discarded: usize },
}

impl UsbError {
    /// Map a transfer-time libusb error
    fn transfer(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => UsbError::Timeout,
            other => UsbError::Transfer(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, UsbError>;

/// Opaque reference to an enumerated device.
///
/// Only valid for the enumeration that produced it; a later enumeration
/// invalidates every older reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRef {
    generation: u32,
    slot: usize,
}

impl DeviceRef {
    pub(crate) fn new(generation: u32, slot: usize) -> Self {
        Self { generation, slot }
    }
}

/// Enumerated probe: opaque handle plus display identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: DeviceRef,
    pub bus: u8,
    pub address: u8,
}

/// One vendor control request with its packed setup fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub direction: Direction,
    pub function: FunctionId,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Data request carrying up to three payload bytes.
    ///
    /// Setup bytes are `[len, p0, p1, p2]`: `wValue = len | p0 << 8`,
    /// `wIndex = p1 | p2 << 8`.
    pub fn data(direction: Direction, function: FunctionId, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= CHUNK_LEN);
        let mut bytes = [0u8; CHUNK_LEN];
        let len = payload.len().min(CHUNK_LEN);
        bytes[..len].copy_from_slice(&payload[..len]);
        Self::pack(direction, function, len as u8, bytes)
    }

    /// Command request whose header byte carries an argument instead of a length
    pub fn command(direction: Direction, function: FunctionId, argument: u8) -> Self {
        Self::pack(direction, function, argument, [0; CHUNK_LEN])
    }

    fn pack(direction: Direction, function: FunctionId, header: u8, bytes: [u8; CHUNK_LEN]) -> Self {
        Self {
            direction,
            function,
            value: u16::from_le_bytes([header, bytes[0]]),
            index: u16::from_le_bytes([bytes[1], bytes[2]]),
        }
    }

    /// `bmRequestType`: vendor, device recipient, direction bit from the receive flag
    pub fn request_type(&self) -> u8 {
        rusb::request_type(self.direction, RequestType::Vendor, Recipient::Device)
    }
}

/// Transport used by the device session.
///
/// Implementations own the device list and the single open handle.
pub trait ControlChannel {
    /// Re-enumerate devices matching `vendor_id`/`product_id`.
    ///
    /// Closes any open handle and invalidates all earlier [`DeviceRef`]s.
    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> Result<Vec<DeviceInfo>>;

    /// Open `device`, closing the previously held handle first
    fn open(&mut self, device: &DeviceInfo) -> Result<()>;

    /// Close the open handle; no-op when nothing is open
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Issue one blocking control transfer.
    ///
    /// For IN requests the response is written into `receive` and the number
    /// of bytes received is returned.
    fn control_transfer(&mut self, request: &ControlRequest, receive: &mut [u8]) -> Result<usize>;
}

/// libusb-backed channel
pub struct RusbChannel {
    context: Context,
    devices: Vec<Device<Context>>,
    generation: u32,
    handle: Option<DeviceHandle<Context>>,
}

impl RusbChannel {
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(UsbError::Init)?;
        Ok(Self {
            context,
            devices: Vec::new(),
            generation: 0,
            handle: None,
        })
    }

    fn lookup(&self, device: &DeviceRef) -> Result<&Device<Context>> {
        if device.generation != self.generation {
            return Err(UsbError::Open(OpenFailure::DeviceGone));
        }
        self.devices
            .get(device.slot)
            .ok_or(UsbError::Open(OpenFailure::DeviceGone))
    }
}

impl ControlChannel for RusbChannel {
    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> Result<Vec<DeviceInfo>> {
        // The handle must not outlive the list it was opened from
        self.close();
        self.devices.clear();
        self.generation = self.generation.wrapping_add(1);

        let list = self.context.devices().map_err(UsbError::Enumeration)?;
        let mut found = Vec::new();

        for device in list.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    debug!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };

            if desc.vendor_id() == vendor_id && desc.product_id() == product_id {
                found.push(DeviceInfo {
                    device: DeviceRef::new(self.generation, self.devices.len()),
                    bus: device.bus_number(),
                    address: device.address(),
                });
                self.devices.push(device);
            }
        }

        debug!("Enumerated {} matching device(s)", found.len());
        Ok(found)
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<()> {
        self.close();
        let handle = self
            .lookup(&device.device)?
            .open()
            .map_err(|e| UsbError::Open(e.into()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the handle closes it
        self.handle = None;
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn control_transfer(&mut self, request: &ControlRequest, receive: &mut [u8]) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::NotConnected)?;

        match request.direction {
            Direction::In => handle
                .read_control(
                    request.request_type(),
                    request.function.code(),
                    request.value,
                    request.index,
                    receive,
                    TRANSFER_TIMEOUT,
                )
                .map_err(UsbError::transfer),
            Direction::Out => handle
                .write_control(
                    request.request_type(),
                    request.function.code(),
                    request.value,
                    request.index,
                    &[],
                    TRANSFER_TIMEOUT,
                )
                .map_err(UsbError::transfer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packing() {
        let req = ControlRequest::data(Direction::In, FunctionId::ReadWriteDebug, b"abc");
        assert_eq!(req.value, 3 | (u16::from(b'a') << 8));
        assert_eq!(req.index, u16::from(b'b') | (u16::from(b'c') << 8));

        let req = ControlRequest::data(Direction::In, FunctionId::ReadWriteDebug, b"x");
        assert_eq!(req.value, 1 | (u16::from(b'x') << 8));
        assert_eq!(req.index, 0);

        let req = ControlRequest::data(Direction::In, FunctionId::ReadWriteDebug, &[]);
        assert_eq!((req.value, req.index), (0, 0));
    }

    #[test]
    fn test_command_packing() {
        let req = ControlRequest::command(Direction::In, FunctionId::EnableDebug, 2);
        assert_eq!(req.value, 2);
        assert_eq!(req.index, 0);
        assert_eq!(req.function.code(), 17);
    }

    #[test]
    fn test_request_type() {
        let req = ControlRequest::command(Direction::In, FunctionId::DisableDebug, 0);
        // vendor (0x40) | device (0x00) | IN (0x80)
        assert_eq!(req.request_type(), 0xC0);

        let req = ControlRequest::command(Direction::Out, FunctionId::DisableDebug, 0);
        assert_eq!(req.request_type(), 0x40);
    }

    #[test]
    fn test_open_failure_mapping() {
        assert_eq!(OpenFailure::from(rusb::Error::NoMem), OpenFailure::OutOfMemory);
        assert_eq!(OpenFailure::from(rusb::Error::Access), OpenFailure::PermissionDenied);
        assert_eq!(OpenFailure::from(rusb::Error::NoDevice), OpenFailure::DeviceGone);
        assert_eq!(OpenFailure::from(rusb::Error::Busy), OpenFailure::Unknown);
    }

    #[test]
    fn test_transfer_error_mapping() {
        assert!(matches!(UsbError::transfer(rusb::Error::Timeout), UsbError::Timeout));
        assert!(matches!(
            UsbError::transfer(rusb::Error::Pipe),
            UsbError::Transfer(rusb::Error::Pipe)
        ));
    }
}
