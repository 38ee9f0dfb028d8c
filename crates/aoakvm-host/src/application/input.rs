//! Input forwarding: HID reports from the host window to the device.
//!
//! Reports travel as `SEND_HID_EVENT` control transfers on the same handle
//! the video stream uses.  The forwarder never opens anything itself; it
//! borrows the current handle from the [`ConnectionContext`] and silently
//! drops events while no connection is up.  A `NoDevice` answer marks the
//! link lost, which the render loop turns into a teardown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use aoakvm_core::protocol::hid::{KeyboardReport, MouseReport, TouchReport};
use aoakvm_core::{ControlRequest, HidDevice, ProtocolError};

use crate::application::session::ConnectionContext;
use crate::application::transport::{TransportError, UsbHandle};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("HID event transfer failed: {0}")]
    Transport(#[from] TransportError),
}

/// What happened to one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    /// Transferred; carries the number of payload bytes sent.
    Sent(usize),
    /// No connection was up, nothing was transferred.
    Dropped,
}

/// Sends control requests on the current connection's handle.
pub struct InputForwarder<H: UsbHandle> {
    context: Arc<ConnectionContext<H>>,
    timeout: Duration,
}

impl<H: UsbHandle> InputForwarder<H> {
    pub fn new(context: Arc<ConnectionContext<H>>, timeout: Duration) -> Self {
        Self { context, timeout }
    }

    /// Sends one raw control request, or drops it when not connected.
    ///
    /// # Errors
    ///
    /// Returns the transport error.  [`TransportError::NoDevice`] also marks
    /// the device gone and the link lost.
    pub fn send_raw(&self, request: &ControlRequest) -> Result<Forwarded, TransportError> {
        if !self.context.is_connected() {
            trace!(request = request.request, "not connected, request dropped");
            return Ok(Forwarded::Dropped);
        }
        let Some(handle) = self.context.current_handle() else {
            return Ok(Forwarded::Dropped);
        };

        match handle.write_control(request, self.timeout) {
            Ok(sent) => Ok(Forwarded::Sent(sent)),
            Err(TransportError::NoDevice) => {
                debug!("device gone while forwarding input");
                self.context.mark_device_gone();
                Err(TransportError::NoDevice)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends `report` as an input event of `device`.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] if the report cannot be encoded or sent.
    pub fn send_hid_event(&self, device: HidDevice, report: &[u8]) -> Result<Forwarded, ForwardError> {
        let request = ControlRequest::send_hid_event(device, report)?;
        Ok(self.send_raw(&request)?)
    }

    pub fn send_mouse(&self, report: MouseReport) -> Result<Forwarded, ForwardError> {
        self.send_hid_event(HidDevice::Mouse, &report.to_bytes())
    }

    pub fn send_keyboard(&self, report: KeyboardReport) -> Result<Forwarded, ForwardError> {
        self.send_hid_event(HidDevice::Keyboard, &report.to_bytes())
    }

    pub fn send_touch(&self, report: TouchReport) -> Result<Forwarded, ForwardError> {
        self.send_hid_event(HidDevice::Touchpad, &report.to_bytes())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
