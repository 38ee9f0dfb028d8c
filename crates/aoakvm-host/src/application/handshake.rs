//! Accessory handshake: find a device and bring it into accessory mode.
//!
//! # The switch (for beginners)
//!
//! An Android phone normally enumerates with its own vendor/product id.  To
//! talk AOA to it the host:
//!
//! 1. reads the AOA protocol version (request 51); a failure means the device
//!    does not speak AOA and is skipped,
//! 2. sends six identity strings (request 52) so the phone can pick an app,
//! 3. asks the phone to start accessory mode (request 53).
//!
//! The phone then disconnects and reappears as `18d1:2d00` (or `18d1:2d01`
//! with ADB enabled).  The host polls the bus until that device shows up,
//! opens it and claims interface 0.  A device that already enumerates with an
//! accessory id is opened directly without any control transfer.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use aoakvm_core::protocol::accessory::{decode_protocol_version, MIN_HID_PROTOCOL_VERSION};
use aoakvm_core::{AccessoryIdentity, ControlRequest, ProtocolError};

use crate::application::transport::{DeviceInfo, TransportError, UsbBus, UsbHandle};

/// Errors from one handshake attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to enumerate USB devices: {0}")]
    Enumerate(#[source] TransportError),

    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to claim interface {interface} on {device}: {source}")]
    Claim {
        device: String,
        interface: u8,
        #[source]
        source: TransportError,
    },

    #[error("{device} does not support the accessory protocol")]
    Unsupported { device: String },

    #[error("control request {request} to {device} failed: {source}")]
    Control {
        device: String,
        request: u8,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("accessory did not appear after {attempts} attempts")]
    AccessoryTimeout { attempts: u32 },
}

/// Knobs for discovery and the switch sequence.
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub identity: AccessoryIdentity,
    pub interface: u8,
    pub control_timeout: Duration,
    pub accessory_poll_attempts: u32,
    pub accessory_poll_interval: Duration,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            identity: AccessoryIdentity::default(),
            interface: 0,
            control_timeout: Duration::from_millis(1000),
            accessory_poll_attempts: 10,
            accessory_poll_interval: Duration::from_millis(20),
        }
    }
}

/// Result of one pass over the attached devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing usable is attached.  Not an error.
    NoDevice,
    /// A device already enumerates as an accessory.
    AccessoryPresent,
    /// A device accepted the switch request and will re-enumerate.
    Switched,
}

/// Drives discovery and the accessory switch over a [`UsbBus`].
pub struct AccessoryHandshake<B: UsbBus> {
    bus: Arc<B>,
    settings: HandshakeSettings,
}

impl<B: UsbBus> AccessoryHandshake<B> {
    pub fn new(bus: Arc<B>, settings: HandshakeSettings) -> Self {
        Self { bus, settings }
    }

    /// Finds or creates an accessory-mode device and returns its claimed handle.
    ///
    /// Returns `Ok(None)` when no candidate is attached; the caller retries
    /// after a short delay.  `on_switch` runs once a device has accepted the
    /// start request, before polling for its re-enumeration.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AccessoryTimeout`] if the switched device
    /// never reappears, or the error that prevented the accessory from being
    /// opened and claimed.
    pub fn acquire(&self, on_switch: impl FnOnce()) -> Result<Option<Arc<B::Handle>>, HandshakeError> {
        match self.scan()? {
            ScanOutcome::NoDevice => Ok(None),
            ScanOutcome::AccessoryPresent => self.await_accessory().map(Some),
            ScanOutcome::Switched => {
                on_switch();
                self.await_accessory().map(Some)
            }
        }
    }

    /// One pass over the attached devices.
    ///
    /// A device already in accessory mode is reported without touching it.
    /// Otherwise every class-0 device is tried in turn; a device that fails
    /// any transfer is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Enumerate`] if the device list cannot be read.
    pub fn scan(&self) -> Result<ScanOutcome, HandshakeError> {
        let devices = self.bus.devices().map_err(HandshakeError::Enumerate)?;

        if let Some(device) = devices.iter().find(|d| d.is_accessory()) {
            debug!(%device, "device already in accessory mode");
            return Ok(ScanOutcome::AccessoryPresent);
        }

        for device in devices.iter().filter(|d| d.device_class == 0) {
            match self.switch_to_accessory(device) {
                Ok(()) => {
                    info!(%device, "accessory mode requested");
                    return Ok(ScanOutcome::Switched);
                }
                Err(HandshakeError::Unsupported { .. }) => {
                    debug!(%device, "no accessory support, skipping");
                }
                Err(e) => warn!(%device, error = %e, "accessory handshake failed, skipping device"),
            }
        }
        Ok(ScanOutcome::NoDevice)
    }

    /// Sends the version probe, identity strings and start request to `device`.
    ///
    /// The handle opened here is dropped on return: the device is about to
    /// disconnect anyway.
    fn switch_to_accessory(&self, device: &DeviceInfo) -> Result<(), HandshakeError> {
        let timeout = self.settings.control_timeout;
        let handle = self.bus.open(device).map_err(|source| HandshakeError::Open {
            device: device.to_string(),
            source,
        })?;

        let mut version_buf = [0u8; 2];
        let read = handle
            .read_control(&ControlRequest::get_protocol(), &mut version_buf, timeout)
            .map_err(|source| {
                debug!(%device, error = %source, "protocol version request failed");
                HandshakeError::Unsupported {
                    device: device.to_string(),
                }
            })?;
        let version = decode_protocol_version(&version_buf[..read])?;
        if version == 0 {
            return Err(HandshakeError::Unsupported {
                device: device.to_string(),
            });
        }
        if version < MIN_HID_PROTOCOL_VERSION {
            warn!(%device, version, "device speaks AOA v1 only; HID registration will fail");
        }
        debug!(%device, version, "AOA protocol version");

        let requests = self.settings.identity.send_string_requests()?;
        for request in requests.iter().chain(std::iter::once(&ControlRequest::start_accessory())) {
            handle
                .write_control(request, timeout)
                .map_err(|source| HandshakeError::Control {
                    device: device.to_string(),
                    request: request.request,
                    source,
                })?;
        }
        Ok(())
    }

    /// Polls the bus until an accessory-mode device appears, then opens it
    /// and claims the configured interface.
    ///
    /// The first poll happens immediately.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AccessoryTimeout`] when all attempts are used up.
    pub fn await_accessory(&self) -> Result<Arc<B::Handle>, HandshakeError> {
        let attempts = self.settings.accessory_poll_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(self.settings.accessory_poll_interval);
            }

            let devices = match self.bus.devices() {
                Ok(devices) => devices,
                Err(e) => {
                    debug!(attempt, error = %e, "device list unavailable while waiting for accessory");
                    continue;
                }
            };
            let Some(device) = devices.iter().find(|d| d.is_accessory()) else {
                continue;
            };

            match self.open_accessory(device) {
                Ok(handle) => {
                    info!(%device, attempt, "accessory opened");
                    return Ok(handle);
                }
                // The device may still be settling after re-enumeration.
                Err(e) => debug!(%device, attempt, error = %e, "accessory not ready yet"),
            }
        }
        Err(HandshakeError::AccessoryTimeout { attempts })
    }

    fn open_accessory(&self, device: &DeviceInfo) -> Result<Arc<B::Handle>, HandshakeError> {
        let mut handle = self.bus.open(device).map_err(|source| HandshakeError::Open {
            device: device.to_string(),
            source,
        })?;
        let interface = self.settings.interface;
        handle
            .claim_interface(interface)
            .map_err(|source| HandshakeError::Claim {
                device: device.to_string(),
                interface,
                source,
            })?;
        Ok(Arc::new(handle))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::usb::mock::{MockDevice, MockUsbBus};
    use aoakvm_core::protocol::accessory::{ACCESSORY_GET_PROTOCOL, ACCESSORY_SEND_STRING, ACCESSORY_START};

    fn fast_settings() -> HandshakeSettings {
        HandshakeSettings {
            accessory_poll_interval: Duration::from_millis(1),
            ..HandshakeSettings::default()
        }
    }

    #[test]
    fn test_no_devices_yields_none_without_transfers() {
        // Arrange
        let bus = Arc::new(MockUsbBus::new());
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());

        // Act
        let handle = handshake.acquire(|| panic!("no switch expected")).unwrap();

        // Assert
        assert!(handle.is_none());
        assert!(bus.control_log().is_empty());
    }

    #[test]
    fn test_accessory_mode_device_is_opened_without_control_transfers() {
        // Arrange
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::accessory());
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());

        // Act
        let handle = handshake.acquire(|| panic!("no switch expected")).unwrap();

        // Assert
        let handle = handle.expect("accessory handle");
        assert!(handle.info().is_accessory());
        assert!(bus.control_log().is_empty());
        assert_eq!(bus.claimed_interfaces(), vec![0]);
    }

    #[test]
    fn test_switch_sends_version_probe_strings_and_start_in_order() {
        // Arrange
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::phone(0x04E8, 0x6860));
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());
        let mut switched = false;

        // Act
        let handle = handshake.acquire(|| switched = true).unwrap();

        // Assert
        assert!(switched);
        assert!(handle.is_some());
        let log = bus.control_log();
        let codes: Vec<u8> = log.iter().map(|r| r.request).collect();
        let mut expected = vec![ACCESSORY_GET_PROTOCOL];
        expected.extend([ACCESSORY_SEND_STRING; 6]);
        expected.push(ACCESSORY_START);
        assert_eq!(codes, expected);
        let indices: Vec<u16> = log[1..7].iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_device_failing_version_read_is_skipped_for_next_device() {
        // Arrange
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::phone(0x1234, 0x0001).without_aoa());
        bus.attach(MockDevice::phone(0x04E8, 0x6860));
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());

        // Act
        let outcome = handshake.scan().unwrap();

        // Assert – first device got one probe, second the full sequence
        assert_eq!(outcome, ScanOutcome::Switched);
        let log = bus.control_log();
        assert_eq!(log.len(), 1 + 8);
        assert_eq!(log[0].request, ACCESSORY_GET_PROTOCOL);
        assert_eq!(log[1].request, ACCESSORY_GET_PROTOCOL);
    }

    #[test]
    fn test_string_failure_skips_device_without_aborting_scan() {
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::phone(0x04E8, 0x6860).failing_string(3));
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());

        let outcome = handshake.scan().unwrap();

        assert_eq!(outcome, ScanOutcome::NoDevice);
        assert!(bus.control_log().iter().all(|r| r.request != ACCESSORY_START));
    }

    #[test]
    fn test_non_class_zero_devices_are_not_probed() {
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::phone(0x046D, 0xC52B).with_class(9));

        let outcome = AccessoryHandshake::new(Arc::clone(&bus), fast_settings()).scan().unwrap();

        assert_eq!(outcome, ScanOutcome::NoDevice);
        assert!(bus.control_log().is_empty());
    }

    #[test]
    fn test_switched_device_that_never_reappears_times_out() {
        // Arrange
        let bus = Arc::new(MockUsbBus::new());
        bus.attach(MockDevice::phone(0x04E8, 0x6860).never_reenumerates());
        let handshake = AccessoryHandshake::new(Arc::clone(&bus), fast_settings());

        // Act
        let result = handshake.acquire(|| {});

        // Assert
        assert!(matches!(result, Err(HandshakeError::AccessoryTimeout { attempts: 10 })));
    }
}
