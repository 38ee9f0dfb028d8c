//! `rusb` (libusb) implementation of the USB transport.
//!
//! Each [`RusbBus`] owns its own libusb context, so a test process or a
//! second tool in the same process never shares device state with it.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::debug;

use aoakvm_core::ControlRequest;

use crate::application::transport::{DeviceInfo, TransportError, UsbBus, UsbHandle};

impl From<rusb::Error> for TransportError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NoDevice => Self::NoDevice,
            rusb::Error::Io => Self::Io,
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::Busy => Self::Busy,
            rusb::Error::Overflow => Self::Overflow,
            rusb::Error::Interrupted => Self::Interrupted,
            rusb::Error::Pipe => Self::Pipe,
            rusb::Error::Access => Self::Access,
            rusb::Error::NotSupported => Self::NotSupported,
            rusb::Error::NotFound => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The attached USB devices as seen by libusb.
pub struct RusbBus {
    context: Context,
}

impl RusbBus {
    /// Initialises a libusb context.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if libusb cannot be initialised.
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    fn describe(device: &Device<Context>) -> Result<DeviceInfo, TransportError> {
        let desc = device.device_descriptor()?;
        Ok(DeviceInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            device_class: desc.class_code(),
            bus: device.bus_number(),
            address: device.address(),
            max_packet_size0: desc.max_packet_size(),
        })
    }
}

impl UsbBus for RusbBus {
    type Handle = RusbHandle;

    fn devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let list = self.context.devices()?;
        let mut devices = Vec::with_capacity(list.len());
        for device in list.iter() {
            match Self::describe(&device) {
                Ok(info) => devices.push(info),
                Err(e) => debug!(
                    bus = device.bus_number(),
                    address = device.address(),
                    error = %e,
                    "skipping device without readable descriptor"
                ),
            }
        }
        Ok(devices)
    }

    fn open(&self, info: &DeviceInfo) -> Result<RusbHandle, TransportError> {
        let device = self
            .context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == info.bus && d.address() == info.address)
            .ok_or(TransportError::NoDevice)?;
        Ok(RusbHandle {
            handle: device.open()?,
            info: info.clone(),
        })
    }
}

/// An open libusb device handle.  libusb releases claimed interfaces and
/// closes the device when it is dropped.
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    info: DeviceInfo,
}

impl UsbHandle for RusbHandle {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        Ok(self.handle.claim_interface(interface)?)
    }

    fn read_control(
        &self,
        request: &ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let len = buf.len().min(usize::from(request.length));
        Ok(self.handle.read_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            &mut buf[..len],
            timeout,
        )?)
    }

    fn write_control(&self, request: &ControlRequest, timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.handle.write_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            &request.payload,
            timeout,
        )?)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }
}
