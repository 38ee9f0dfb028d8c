//! HID registration with an accessory-mode device.
//!
//! For each of the mouse, keyboard and touchpad (indices 0, 1, 2) the host
//! sends `REGISTER_HID` with the descriptor length, followed immediately by
//! the descriptor itself in `SET_HID_REPORT_DESC` chunks no larger than the
//! device's `bMaxPacketSize0`.  Chunks go out strictly in offset order.
//!
//! A failed transfer abandons that one HID; the others are still attempted.
//! Streaming works without input devices, so registration failures never
//! abort a connection attempt.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use aoakvm_core::protocol::hid::plan_descriptor_chunks;
use aoakvm_core::{ControlRequest, HidDevice, ProtocolError};

use crate::application::transport::{TransportError, UsbHandle};

/// Packet size used when a device reports `bMaxPacketSize0 == 0`.
/// Eight bytes is the smallest size every full-speed control endpoint accepts.
pub const FALLBACK_CONTROL_PACKET_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum HidRegistrationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("control request {request} for {device:?} failed: {source}")]
    Transfer {
        device: HidDevice,
        request: u8,
        #[source]
        source: TransportError,
    },
}

impl HidRegistrationError {
    fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transfer { source, .. } if source.is_disconnect())
    }
}

/// Which HIDs the device accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidRegistrationReport {
    pub registered: Vec<HidDevice>,
    pub failed: Vec<HidDevice>,
    /// The device vanished part way; its handle must not be used again.
    pub device_gone: bool,
}

impl HidRegistrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registers every HID in [`HidDevice::ALL`] order.
pub fn register_hids<H: UsbHandle + ?Sized>(handle: &H, timeout: Duration) -> HidRegistrationReport {
    let mut report = HidRegistrationReport::default();
    let mut devices = HidDevice::ALL.iter().copied();

    for device in devices.by_ref() {
        match register_hid(handle, device, timeout) {
            Ok(chunks) => {
                debug!(?device, chunks, "HID registered");
                report.registered.push(device);
            }
            Err(e) => {
                warn!(?device, error = %e, "HID registration failed, continuing without it");
                report.failed.push(device);
                if e.is_disconnect() {
                    report.device_gone = true;
                    break;
                }
            }
        }
    }
    report.failed.extend(devices);

    info!(registered = ?report.registered, failed = ?report.failed, "HID registration finished");
    report
}

/// Announces one HID and sends its report descriptor.  Returns the number of
/// descriptor chunks sent.
///
/// # Errors
///
/// Returns the first failed transfer; the device is left with a partial
/// registration that it discards on its own.
pub fn register_hid<H: UsbHandle + ?Sized>(
    handle: &H,
    device: HidDevice,
    timeout: Duration,
) -> Result<usize, HidRegistrationError> {
    let descriptor = device.report_descriptor();
    let max_packet = match usize::from(handle.info().max_packet_size0) {
        0 => FALLBACK_CONTROL_PACKET_SIZE,
        n => n,
    };

    let send = |request: &ControlRequest| {
        handle
            .write_control(request, timeout)
            .map_err(|source| HidRegistrationError::Transfer {
                device,
                request: request.request,
                source,
            })
    };

    send(&ControlRequest::register_hid(device, descriptor.len())?)?;

    let chunks = plan_descriptor_chunks(descriptor, max_packet)?;
    for chunk in &chunks {
        send(&ControlRequest::set_hid_report_desc(device, chunk.offset, chunk.bytes)?)?;
    }
    Ok(chunks.len())
}

/// Removes previously registered HIDs.  Best effort: failures are only logged,
/// and a vanished device ends the loop early.
pub fn unregister_hids<H: UsbHandle + ?Sized>(handle: &H, devices: &[HidDevice], timeout: Duration) {
    for &device in devices {
        match handle.write_control(&ControlRequest::unregister_hid(device), timeout) {
            Ok(_) => debug!(?device, "HID unregistered"),
            Err(TransportError::NoDevice) => return,
            Err(e) => debug!(?device, error = %e, "HID unregister failed"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::UsbBus;
    use crate::infrastructure::usb::mock::{MockDevice, MockHandle, MockUsbBus};
    use aoakvm_core::protocol::accessory::{
        ACCESSORY_REGISTER_HID, ACCESSORY_SET_HID_REPORT_DESC, ACCESSORY_UNREGISTER_HID,
    };

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn open(device: MockDevice) -> (MockUsbBus, MockHandle) {
        let bus = MockUsbBus::new();
        bus.attach(device);
        let info = bus.devices().unwrap().remove(0);
        let handle = bus.open(&info).unwrap();
        (bus, handle)
    }

    #[test]
    fn test_descriptor_longer_than_packet_is_chunked_with_increasing_offsets() {
        // Arrange – the 64-byte touchpad descriptor over an 8-byte endpoint
        let (bus, handle) = open(MockDevice::accessory().with_max_packet_size(8));

        // Act
        let chunks = register_hid(&handle, HidDevice::Touchpad, TIMEOUT).unwrap();

        // Assert
        let descriptor = HidDevice::Touchpad.report_descriptor();
        let log = bus.control_log();
        assert_eq!(log[0].request, ACCESSORY_REGISTER_HID);
        assert_eq!(usize::from(log[0].index), descriptor.len());

        let desc_requests: Vec<_> = log[1..].iter().filter(|r| r.request == ACCESSORY_SET_HID_REPORT_DESC).collect();
        assert_eq!(chunks, descriptor.len().div_ceil(8));
        assert_eq!(desc_requests.len(), chunks);
        let offsets: Vec<u16> = desc_requests.iter().map(|r| r.index).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        let reassembled: Vec<u8> = desc_requests.iter().flat_map(|r| r.payload.clone()).collect();
        assert_eq!(reassembled, descriptor);
    }

    #[test]
    fn test_register_hids_registers_each_device_then_its_descriptor() {
        // Arrange
        let (bus, handle) = open(MockDevice::accessory());

        // Act
        let report = register_hids(&handle, TIMEOUT);

        // Assert – 64-byte packets: one chunk per descriptor
        assert!(report.is_complete());
        let sequence: Vec<(u8, u16)> = bus.control_log().iter().map(|r| (r.request, r.value)).collect();
        assert_eq!(
            sequence,
            vec![
                (ACCESSORY_REGISTER_HID, 0),
                (ACCESSORY_SET_HID_REPORT_DESC, 0),
                (ACCESSORY_REGISTER_HID, 1),
                (ACCESSORY_SET_HID_REPORT_DESC, 1),
                (ACCESSORY_REGISTER_HID, 2),
                (ACCESSORY_SET_HID_REPORT_DESC, 2),
            ]
        );
    }

    #[test]
    fn test_failed_hid_is_abandoned_and_others_continue() {
        // Arrange – the keyboard's registration is rejected
        let (bus, handle) = open(MockDevice::accessory().failing_request(ACCESSORY_REGISTER_HID, 1));

        // Act
        let report = register_hids(&handle, TIMEOUT);

        // Assert
        assert_eq!(report.registered, vec![HidDevice::Mouse, HidDevice::Touchpad]);
        assert_eq!(report.failed, vec![HidDevice::Keyboard]);
        assert!(!report.device_gone);
        let keyboard_descs = bus
            .control_log()
            .iter()
            .filter(|r| r.request == ACCESSORY_SET_HID_REPORT_DESC && r.value == 1)
            .count();
        assert_eq!(keyboard_descs, 0);
    }

    #[test]
    fn test_zero_packet_size_falls_back_to_eight_bytes() {
        let (_bus, handle) = open(MockDevice::accessory().with_max_packet_size(0));
        let chunks = register_hid(&handle, HidDevice::Mouse, TIMEOUT).unwrap();
        assert_eq!(chunks, HidDevice::Mouse.report_descriptor().len().div_ceil(8));
    }

    #[test]
    fn test_unplugged_device_marks_remaining_hids_failed() {
        let bus = MockUsbBus::new();
        let id = bus.attach(MockDevice::accessory());
        let info = bus.devices().unwrap().remove(0);
        let handle = bus.open(&info).unwrap();
        bus.unplug(id);

        let report = register_hids(&handle, TIMEOUT);

        assert!(report.registered.is_empty());
        assert_eq!(report.failed, HidDevice::ALL.to_vec());
        assert!(report.device_gone);
        assert_eq!(bus.control_log().len(), 1);
    }

    #[test]
    fn test_unregister_sends_one_request_per_device() {
        let (bus, handle) = open(MockDevice::accessory());

        unregister_hids(&handle, &[HidDevice::Mouse, HidDevice::Touchpad], TIMEOUT);

        let log = bus.control_log();
        assert!(log.iter().all(|r| r.request == ACCESSORY_UNREGISTER_HID));
        assert_eq!(log.iter().map(|r| r.value).collect::<Vec<_>>(), vec![0, 2]);
    }
}
