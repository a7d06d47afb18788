//! In-memory control channel for tests

use std::collections::VecDeque;

use super::channel::{ControlChannel, ControlRequest, DeviceInfo, DeviceRef, OpenFailure, Result, UsbError};
use super::protocol::FunctionId;

/// Channel that records every request and answers from a script
#[derive(Default)]
pub struct MockChannel {
    pub device_count: usize,
    pub open: bool,
    pub opens: usize,
    pub open_error: Option<OpenFailure>,
    pub fail_functions: Vec<FunctionId>,
    /// Responses for read-write requests, `[count, data...]`
    pub responses: VecDeque<Vec<u8>>,
    /// Fail the n-th read-write transfer (0-based)
    pub fail_rw_at: Option<usize>,
    pub rw_count: usize,
    pub requests: Vec<ControlRequest>,
}

impl MockChannel {
    pub fn with_devices(device_count: usize) -> Self {
        Self {
            device_count,
            ..Default::default()
        }
    }
}

impl ControlChannel for MockChannel {
    fn enumerate(&mut self, _vendor_id: u16, _product_id: u16) -> Result<Vec<DeviceInfo>> {
        self.close();
        Ok((0..self.device_count)
            .map(|i| DeviceInfo {
                device: DeviceRef::new(1, i),
                bus: 1,
                address: 10 + i as u8,
            })
            .collect())
    }

    fn open(&mut self, _device: &DeviceInfo) -> Result<()> {
        self.close();
        if let Some(failure) = self.open_error {
            return Err(UsbError::Open(failure));
        }
        self.open = true;
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn control_transfer(&mut self, request: &ControlRequest, receive: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(UsbError::NotConnected);
        }
        self.requests.push(*request);

        if self.fail_functions.contains(&request.function) {
            return Err(UsbError::Transfer(rusb::Error::Pipe));
        }

        if request.function == FunctionId::ReadWriteDebug {
            let n = self.rw_count;
            self.rw_count += 1;
            if self.fail_rw_at == Some(n) {
                return Err(UsbError::Timeout);
            }
            let response = self.responses.pop_front().unwrap_or_else(|| vec![0]);
            receive[..response.len()].copy_from_slice(&response);
            return Ok(response.len());
        }

        receive[0] = 0;
        Ok(1)
    }
}
