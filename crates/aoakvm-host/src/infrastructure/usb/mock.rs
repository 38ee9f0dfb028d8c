//! Scriptable in-memory USB bus for tests.
//!
//! # Why a mock bus?
//!
//! The real bus needs a phone on a cable, and a phone cannot be unplugged on
//! demand from a test.  `MockUsbBus` keeps a list of simulated devices and
//! records every control request and interface claim so tests can assert
//! exactly what went over the wire and in what order.
//!
//! Simulated devices follow the AOA life cycle:
//!
//! - a *phone* answers the version probe and, after the start request,
//!   disappears and re-enumerates as `18d1:2d01`,
//! - an *accessory* serves its bulk script on endpoint `0x81`,
//! - [`MockUsbBus::unplug`] removes a device; every handle to it then fails
//!   with [`TransportError::NoDevice`].
//!
//! # Usage in tests
//!
//! ```ignore
//! let bus = Arc::new(MockUsbBus::new());
//! bus.attach(MockDevice::accessory().with_bulk([BulkStep::data(vec![0; 64])]));
//!
//! let handle = AccessoryHandshake::new(Arc::clone(&bus), settings).acquire(|| {})?;
//!
//! assert!(bus.control_log().is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use aoakvm_core::protocol::accessory::{
    ACCESSORY_ADB_PRODUCT_ID, ACCESSORY_GET_PROTOCOL, ACCESSORY_SEND_STRING, ACCESSORY_START,
    ACCESSORY_VENDOR_ID,
};
use aoakvm_core::ControlRequest;

use crate::application::transport::{DeviceInfo, TransportError, UsbBus, UsbHandle};

/// One scripted response to a bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkStep {
    Data(Vec<u8>),
    Error(TransportError),
}

impl BulkStep {
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(bytes.into())
    }
}

/// A simulated device and its scripted behaviour.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub info: DeviceInfo,
    aoa_version: Option<u16>,
    failing_string: Option<u16>,
    reenumerates: bool,
    failing_requests: Vec<(u8, u16)>,
    bulk: VecDeque<BulkStep>,
}

impl MockDevice {
    /// A phone in normal mode that supports AOA v2.
    pub fn phone(vendor_id: u16, product_id: u16) -> Self {
        Self {
            info: DeviceInfo {
                vendor_id,
                product_id,
                device_class: 0,
                bus: 1,
                address: 0,
                max_packet_size0: 64,
            },
            aoa_version: Some(2),
            failing_string: None,
            reenumerates: true,
            failing_requests: Vec::new(),
            bulk: VecDeque::new(),
        }
    }

    /// A phone already enumerated in accessory + ADB mode.
    pub fn accessory() -> Self {
        Self::phone(ACCESSORY_VENDOR_ID, ACCESSORY_ADB_PRODUCT_ID)
    }

    /// The version probe stalls, as on devices without AOA support.
    pub fn without_aoa(mut self) -> Self {
        self.aoa_version = None;
        self
    }

    pub fn with_aoa_version(mut self, version: u16) -> Self {
        self.aoa_version = Some(version);
        self
    }

    /// The identity string with `wIndex == index` is rejected.
    pub fn failing_string(mut self, index: u16) -> Self {
        self.failing_string = Some(index);
        self
    }

    /// Every control request with this `bRequest`/`wValue` pair is rejected.
    pub fn failing_request(mut self, request: u8, value: u16) -> Self {
        self.failing_requests.push((request, value));
        self
    }

    pub fn with_class(mut self, class: u8) -> Self {
        self.info.device_class = class;
        self
    }

    pub fn with_max_packet_size(mut self, size: u8) -> Self {
        self.info.max_packet_size0 = size;
        self
    }

    /// Accepts the start request but never comes back as an accessory.
    pub fn never_reenumerates(mut self) -> Self {
        self.reenumerates = false;
        self
    }

    /// Bulk responses served once the device is in accessory mode.
    /// When the script runs out, reads time out.
    pub fn with_bulk(mut self, steps: impl IntoIterator<Item = BulkStep>) -> Self {
        self.bulk.extend(steps);
        self
    }
}

struct Attached {
    id: u64,
    device: MockDevice,
}

#[derive(Default)]
struct BusState {
    attached: Vec<Attached>,
    next_id: u64,
    control_log: Vec<ControlRequest>,
    claimed: Vec<u8>,
    bulk_reads: usize,
    opened: usize,
    closed: usize,
}

impl BusState {
    fn attach(&mut self, mut device: MockDevice) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        device.info.address = id as u8;
        self.attached.push(Attached { id, device });
        id
    }

    fn device_mut(&mut self, id: u64) -> Result<&mut MockDevice, TransportError> {
        self.attached
            .iter_mut()
            .find(|a| a.id == id)
            .map(|a| &mut a.device)
            .ok_or(TransportError::NoDevice)
    }
}

/// In-memory [`UsbBus`].  Cheap to clone; clones share the same devices.
#[derive(Clone, Default)]
pub struct MockUsbBus {
    state: Arc<Mutex<BusState>>,
}

impl MockUsbBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugs in `device`; returns its id for [`unplug`](Self::unplug).
    pub fn attach(&self, device: MockDevice) -> u64 {
        self.lock().attach(device)
    }

    /// Removes the device; open handles to it start failing with `NoDevice`.
    pub fn unplug(&self, id: u64) {
        self.lock().attached.retain(|a| a.id != id);
    }

    pub fn unplug_all(&self) {
        self.lock().attached.clear();
    }

    /// Ids of the attached devices, oldest first.
    pub fn attached_ids(&self) -> Vec<u64> {
        self.lock().attached.iter().map(|a| a.id).collect()
    }

    /// Every control request issued so far, including rejected ones.
    pub fn control_log(&self) -> Vec<ControlRequest> {
        self.lock().control_log.clone()
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.lock().claimed.clone()
    }

    /// Number of `read_bulk` calls that reached the bus.
    pub fn bulk_reads(&self) -> usize {
        self.lock().bulk_reads
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened
    }

    /// Handles opened and not yet dropped.
    pub fn open_handles(&self) -> usize {
        let state = self.lock();
        state.opened - state.closed
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UsbBus for MockUsbBus {
    type Handle = MockHandle;

    fn devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        Ok(self.lock().attached.iter().map(|a| a.device.info.clone()).collect())
    }

    fn open(&self, device: &DeviceInfo) -> Result<MockHandle, TransportError> {
        let mut state = self.lock();
        let id = state
            .attached
            .iter()
            .find(|a| a.device.info == *device)
            .map(|a| a.id)
            .ok_or(TransportError::NoDevice)?;
        state.opened += 1;
        Ok(MockHandle {
            id,
            info: device.clone(),
            bus: self.clone(),
        })
    }
}

/// Handle to a simulated device.  Counts as closed when dropped.
pub struct MockHandle {
    id: u64,
    info: DeviceInfo,
    bus: MockUsbBus,
}

impl MockHandle {
    /// Bus id of the device this handle was opened on.
    pub fn device_id(&self) -> u64 {
        self.id
    }

    fn control(&self, request: &ControlRequest) -> Result<(), TransportError> {
        let mut state = self.bus.lock();
        state.control_log.push(request.clone());
        let device = state.device_mut(self.id)?;

        if device.failing_requests.contains(&(request.request, request.value)) {
            return Err(TransportError::Pipe);
        }
        match request.request {
            ACCESSORY_GET_PROTOCOL if device.aoa_version.is_none() => Err(TransportError::Pipe),
            ACCESSORY_SEND_STRING if device.failing_string == Some(request.index) => {
                Err(TransportError::Pipe)
            }
            ACCESSORY_START => {
                let reenumerates = device.reenumerates;
                let mut accessory = device.clone();
                state.attached.retain(|a| a.id != self.id);
                if reenumerates {
                    accessory.info.vendor_id = ACCESSORY_VENDOR_ID;
                    accessory.info.product_id = ACCESSORY_ADB_PRODUCT_ID;
                    state.attach(accessory);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl UsbHandle for MockHandle {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let mut state = self.bus.lock();
        state.device_mut(self.id)?;
        state.claimed.push(interface);
        Ok(())
    }

    fn read_control(
        &self,
        request: &ControlRequest,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.control(request)?;
        let mut state = self.bus.lock();
        let device = state.device_mut(self.id)?;
        match (request.request, device.aoa_version) {
            (ACCESSORY_GET_PROTOCOL, Some(version)) => {
                let bytes = version.to_le_bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            _ => Ok(0),
        }
    }

    fn write_control(&self, request: &ControlRequest, _timeout: Duration) -> Result<usize, TransportError> {
        self.control(request)?;
        Ok(request.payload.len())
    }

    fn read_bulk(&self, _endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let step = {
            let mut state = self.bus.lock();
            state.bulk_reads += 1;
            state.device_mut(self.id)?.bulk.pop_front()
        };
        match step {
            Some(BulkStep::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(BulkStep::Error(e)) => Err(e),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(2)));
                Err(TransportError::Timeout)
            }
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.bus.lock().closed += 1;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
