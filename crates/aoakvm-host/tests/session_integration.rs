//! End-to-end tests of the connection state machine on the scripted USB bus.
//!
//! These run the real handshake, HID registration, ingestion adapter and
//! Annex-B decoder; only the USB bus and the renderer are simulated.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aoakvm_core::protocol::accessory::{
    ACCESSORY_GET_PROTOCOL, ACCESSORY_REGISTER_HID, ACCESSORY_SEND_STRING, ACCESSORY_SET_HID_REPORT_DESC,
    ACCESSORY_START, ACCESSORY_UNREGISTER_HID,
};
use aoakvm_core::{ConnectionState, FrameRing, StatusScreen};
use aoakvm_host::application::decode::VideoFrame;
use aoakvm_host::application::handshake::{AccessoryHandshake, HandshakeSettings};
use aoakvm_host::application::session::{
    ConnectionContext, ConnectionStateMachine, RenderError, Renderer, SessionSettings,
};
use aoakvm_host::infrastructure::usb::mock::{BulkStep, MockDevice, MockUsbBus};
use aoakvm_host::infrastructure::video::{AnnexBDecoderFactory, AnnexBSettings};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Baseline SPS for 1920x1080.
const SPS_1080P: &[u8] = &[0x67, 0x42, 0xC0, 0x28, 0xF4, 0x03, 0xC0, 0x11, 0x3F, 0x2A];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

fn picture(keyframe: bool, payload: u8) -> Vec<u8> {
    let mut out = Vec::new();
    if keyframe {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(SPS_1080P);
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(PPS);
    }
    out.extend_from_slice(&[0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }, 0x88]);
    out.extend(std::iter::repeat(payload).take(2000));
    out
}

/// A GOP of `pictures` pictures split into bulk transfers of uneven size.
fn gop_transfers(pictures: u8) -> Vec<BulkStep> {
    let stream: Vec<u8> = (0..pictures).flat_map(|i| picture(i == 0, 0x10 + i)).collect();
    stream.chunks(3000).map(BulkStep::data).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rendered {
    Status(StatusScreen),
    Prepared(u32, u32),
    Frame(u64),
}

/// Renderer recording everything it was asked to do.
#[derive(Clone, Default)]
struct RecordingRenderer {
    log: Arc<Mutex<Vec<Rendered>>>,
}

impl RecordingRenderer {
    fn log(&self) -> Vec<Rendered> {
        self.log.lock().unwrap().clone()
    }

    fn frames(&self) -> Vec<u64> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Rendered::Frame(sequence) => Some(sequence),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn show_status(&mut self, screen: StatusScreen) -> Result<(), RenderError> {
        self.log.lock().unwrap().push(Rendered::Status(screen));
        Ok(())
    }

    fn prepare(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.log.lock().unwrap().push(Rendered::Prepared(width, height));
        Ok(())
    }

    fn present(&mut self, frame: &VideoFrame) -> Result<(), RenderError> {
        self.log.lock().unwrap().push(Rendered::Frame(frame.sequence));
        Ok(())
    }
}

type Machine = ConnectionStateMachine<MockUsbBus, AnnexBDecoderFactory, RecordingRenderer>;

fn machine(bus: &Arc<MockUsbBus>, renderer: &RecordingRenderer) -> Machine {
    let handshake = AccessoryHandshake::new(
        Arc::clone(bus),
        HandshakeSettings {
            accessory_poll_interval: Duration::from_millis(1),
            ..HandshakeSettings::default()
        },
    );
    let settings = SessionSettings {
        scan_interval: Duration::from_millis(1),
        ..SessionSettings::default()
    };
    let frames = Arc::new(FrameRing::with_capacity(30).unwrap());
    ConnectionStateMachine::new(
        handshake,
        AnnexBDecoderFactory::new(AnnexBSettings::default()),
        renderer.clone(),
        Arc::new(ConnectionContext::new(frames)),
        settings,
    )
}

fn step_until(machine: &mut Machine, done: impl Fn(&Machine) -> bool, max_steps: usize) -> bool {
    for _ in 0..max_steps {
        if done(machine) {
            return true;
        }
        machine.step().unwrap();
    }
    done(machine)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_absent_device_waits_without_any_transfer() {
    // Arrange
    let bus = Arc::new(MockUsbBus::new());
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);

    // Act
    for _ in 0..10 {
        machine.step().unwrap();
    }

    // Assert
    assert_eq!(machine.state(), ConnectionState::WaitForDevice);
    assert!(bus.control_log().is_empty());
    assert_eq!(bus.open_count(), 0);
}

#[test]
fn test_accessory_mode_device_streams_without_handshake() {
    // Arrange
    let bus = Arc::new(MockUsbBus::new());
    bus.attach(MockDevice::accessory().with_bulk(gop_transfers(5)));
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);

    // Act
    let state = machine.step().unwrap();
    // The fifth picture stays buffered until a sixth one starts.
    let presented = step_until(&mut machine, |_| renderer.frames().len() == 4, 10_000);

    // Assert
    assert_eq!(state, ConnectionState::Streaming);
    assert!(presented);
    assert_eq!(renderer.frames(), vec![0, 1, 2, 3]);
    assert!(renderer.log().contains(&Rendered::Prepared(1920, 1080)));

    let requests: Vec<u8> = bus.control_log().iter().map(|r| r.request).collect();
    assert!(requests
        .iter()
        .all(|&r| r == ACCESSORY_REGISTER_HID || r == ACCESSORY_SET_HID_REPORT_DESC));
    assert_eq!(bus.claimed_interfaces(), vec![0]);

    machine.shutdown().unwrap();
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn test_phone_is_switched_then_streams() {
    // Arrange
    let bus = Arc::new(MockUsbBus::new());
    bus.attach(MockDevice::phone(0x04E8, 0x6860).with_bulk(gop_transfers(3)));
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);

    // Act
    let state = machine.step().unwrap();

    // Assert
    assert_eq!(state, ConnectionState::Streaming);
    let requests: Vec<u8> = bus.control_log().iter().map(|r| r.request).collect();
    assert_eq!(requests[0], ACCESSORY_GET_PROTOCOL);
    assert_eq!(&requests[1..7], &[ACCESSORY_SEND_STRING; 6]);
    assert_eq!(requests[7], ACCESSORY_START);
    assert_eq!(requests[8], ACCESSORY_REGISTER_HID);

    let statuses: Vec<Rendered> = renderer
        .log()
        .into_iter()
        .filter(|r| matches!(r, Rendered::Status(_)))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Rendered::Status(StatusScreen::AoaInitialized),
            Rendered::Status(StatusScreen::WaitForDataTransmission),
        ]
    );

    machine.shutdown().unwrap();
}

#[test]
fn test_unplug_mid_stream_tears_down_and_reconnects_to_new_device() {
    // Arrange – stream a little, then pull the cable
    let bus = Arc::new(MockUsbBus::new());
    let first = bus.attach(MockDevice::accessory().with_bulk(gop_transfers(3)));
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);
    assert_eq!(machine.step().unwrap(), ConnectionState::Streaming);
    assert_eq!(machine.context().current_handle().map(|h| h.device_id()), Some(first));

    // Act
    bus.unplug(first);
    let lost = step_until(&mut machine, |m| m.state() == ConnectionState::Lost, 10_000);
    let after_teardown = machine.step().unwrap();
    for _ in 0..5 {
        machine.step().unwrap();
    }

    // Assert – back to waiting, nothing held, nothing sent to the vanished device
    assert!(lost);
    assert_eq!(after_teardown, ConnectionState::WaitForDevice);
    assert_eq!(machine.state(), ConnectionState::WaitForDevice);
    assert!(machine.context().current_handle().is_none());
    assert!(!machine.context().is_connected());
    assert_eq!(bus.open_handles(), 0);
    let unregisters = bus
        .control_log()
        .iter()
        .filter(|r| r.request == ACCESSORY_UNREGISTER_HID)
        .count();
    assert_eq!(unregisters, 0, "nothing is sent to a device reported gone");
    assert!(machine.context().is_device_gone());

    // Act – a device comes back
    let second = bus.attach(MockDevice::accessory().with_bulk(gop_transfers(3)));
    let state = machine.step().unwrap();

    // Assert – the new connection uses a fresh handle on the new device
    assert_eq!(state, ConnectionState::Streaming);
    assert_eq!(machine.context().current_handle().map(|h| h.device_id()), Some(second));
    assert_ne!(first, second);
    machine.shutdown().unwrap();
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn test_stream_without_sps_returns_to_wait_for_device() {
    // Arrange – predicted pictures only, then the device goes away
    let bus = Arc::new(MockUsbBus::new());
    let mut steps: Vec<BulkStep> = (0..3).map(|i| BulkStep::data(picture(false, 0x20 + i))).collect();
    steps.push(BulkStep::Error(aoakvm_host::application::transport::TransportError::NoDevice));
    bus.attach(MockDevice::accessory().with_bulk(steps));
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);

    // Act
    let state = machine.step().unwrap();

    // Assert
    assert_eq!(state, ConnectionState::WaitForDevice);
    assert!(renderer.frames().is_empty());
    assert_eq!(bus.open_handles(), 0);
    assert!(bus
        .control_log()
        .iter()
        .all(|r| r.request != ACCESSORY_UNREGISTER_HID));
}

#[test]
fn test_state_changes_are_published_to_subscribers() {
    // Arrange
    let bus = Arc::new(MockUsbBus::new());
    bus.attach(MockDevice::accessory().with_bulk(gop_transfers(2)));
    let renderer = RecordingRenderer::default();
    let mut machine = machine(&bus, &renderer);
    let states = machine.context().subscribe();

    // Act
    machine.step().unwrap();

    // Assert
    assert_eq!(*states.borrow(), ConnectionState::Streaming);
    assert_eq!(machine.context().state(), ConnectionState::Streaming);
    machine.shutdown().unwrap();
    assert_eq!(machine.context().state(), ConnectionState::WaitForDevice);
}
