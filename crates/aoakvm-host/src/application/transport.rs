//! USB transport seam.
//!
//! The application layer never talks to libusb directly.  It sees attached
//! devices through [`UsbBus`] and an opened device through [`UsbHandle`].
//! `infrastructure::usb` provides the `rusb` implementation and a scripted
//! in-memory bus for tests.
//!
//! # Handle ownership
//!
//! A handle is closed when its last owner drops it, exactly once.  The
//! session keeps the only long-lived `Arc` to the handle; the decode thread
//! holds a clone only for the lifetime of the ingestion adapter.  After the
//! transport reports [`TransportError::NoDevice`] a handle is never used
//! again; the next attempt always opens a fresh one.

use std::time::Duration;

use thiserror::Error;

use aoakvm_core::ControlRequest;

/// Errors reported by a USB transfer or device operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The device is gone.  Every handle to it is dead.
    #[error("device disconnected")]
    NoDevice,

    #[error("USB I/O error")]
    Io,

    #[error("USB transfer timed out")]
    Timeout,

    #[error("device or interface busy")]
    Busy,

    #[error("USB transfer overflow")]
    Overflow,

    #[error("USB transfer interrupted")]
    Interrupted,

    /// The device stalled the request (e.g. an unsupported control request).
    #[error("endpoint stalled")]
    Pipe,

    #[error("insufficient permissions to access the device")]
    Access,

    #[error("operation not supported by the device or platform")]
    NotSupported,

    #[error("entity not found")]
    NotFound,

    #[error("USB error: {0}")]
    Other(String),
}

impl TransportError {
    /// `true` for errors a bulk read may simply retry.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::Io | Self::Timeout | Self::Busy | Self::Overflow | Self::Interrupted
        )
    }

    /// `true` when the device has disappeared.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NoDevice)
    }
}

/// Static facts about an attached device, read from its device descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub bus: u8,
    pub address: u8,
    /// `bMaxPacketSize0`: the largest data stage endpoint zero accepts in one packet.
    pub max_packet_size0: u8,
}

impl DeviceInfo {
    /// `true` when the device already enumerates as an Android accessory.
    pub fn is_accessory(&self) -> bool {
        aoakvm_core::protocol::is_accessory_product(self.vendor_id, self.product_id)
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {} address {})",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// Enumerates and opens attached USB devices.
pub trait UsbBus: Send + Sync {
    type Handle: UsbHandle + 'static;

    /// Lists the devices currently attached.
    fn devices(&self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Opens `device`.  The returned handle closes the device on drop.
    fn open(&self, device: &DeviceInfo) -> Result<Self::Handle, TransportError>;
}

/// An opened device.
///
/// All methods take `&self` so that the decode thread can read the bulk
/// endpoint while the session thread issues control transfers.
pub trait UsbHandle: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Claims `interface`.  Called once, before the handle is shared.
    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Runs a device-to-host control request, filling `buf`.  Returns bytes read.
    fn read_control(
        &self,
        request: &ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Runs a host-to-device control request with `request.payload` as data stage.
    fn write_control(&self, request: &ControlRequest, timeout: Duration) -> Result<usize, TransportError>;

    /// One bulk IN transfer from `endpoint` into `buf`.  Returns bytes read.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
