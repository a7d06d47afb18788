//! USBasp debug protocol constants
//!
//! Identifiers, function numbers and the baud-rate table shared with the
//! probe firmware. These values are fixed by the firmware and must not change.

use std::fmt;
use std::time::Duration;

/// USB vendor ID of the probe (shared V-USB ID)
pub const VENDOR_ID: u16 = 0x16C0;

/// USB product ID of the probe
pub const PRODUCT_ID: u16 = 0x05DC;

/// Capacity of every transfer buffer (host and firmware side)
pub const DATA_LEN: usize = 128;

/// Maximum payload bytes carried by a single control transfer
pub const CHUNK_LEN: usize = 3;

/// Size of the receive buffer requested on the wire (`wLength`)
pub const WIRE_RECEIVE_LEN: usize = DATA_LEN;

/// Deadline for one blocking control transfer
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Steady-state poll interval while connected
pub const POLL_INTERVAL: Duration = Duration::from_millis(8);

/// Tick interval of the identification (ping) cycle
pub const PING_INTERVAL: Duration = Duration::from_millis(150);

/// Number of ping ticks before the cycle cancels itself (10 on/off blinks)
pub const PING_TICKS: u32 = 20;

/// Vendor request numbers understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionId {
    /// Enable the UART bridge; the setup header carries the baud selector
    EnableDebug = 17,
    /// Disable the UART bridge and return to idle
    DisableDebug = 18,
    /// Exchange up to three outgoing bytes for the buffered incoming ones
    ReadWriteDebug = 19,
}

impl FunctionId {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Baud rates selectable on the probe UART.
///
/// The discriminant is the selector transmitted to the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaudRate {
    B2400 = 0,
    B4800,
    #[default]
    B9600,
    B19200,
    B28800,
    B38400,
    /// Experimental, does not work on most hardware revisions
    B57600,
}

impl BaudRate {
    /// Full table in selector order
    pub const ALL: [BaudRate; 7] = [
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B28800,
        BaudRate::B38400,
        BaudRate::B57600,
    ];

    /// Rate used while blinking the indicator LED
    pub const PING: BaudRate = BaudRate::B2400;

    /// Selector value sent in the enable request
    pub fn selector(self) -> u8 {
        self as u8
    }

    /// Bits per second
    pub fn bps(self) -> u32 {
        match self {
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B28800 => 28800,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
        }
    }

    pub fn is_experimental(self) -> bool {
        self == BaudRate::B57600
    }

    /// Look up a table entry by its bps value
    pub fn from_bps(bps: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.bps() == bps)
    }

    /// Next supported (non-experimental) rate, wrapping around
    pub fn next_supported(self) -> Self {
        let supported: Vec<BaudRate> = Self::ALL
            .iter()
            .copied()
            .filter(|b| !b.is_experimental())
            .collect();
        let pos = supported.iter().position(|b| *b == self).unwrap_or(0);
        supported[(pos + 1) % supported.len()]
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bps())
    }
}
