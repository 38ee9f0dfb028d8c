//! # aoakvm-core
//!
//! Shared library for AOA-KVM containing the Android Open Accessory (AOA)
//! control protocol, the fixed HID report descriptors, the frame queue that
//! bridges decoding and rendering, and the H.264 elementary stream parser.
//!
//! It has zero dependencies on USB libraries, OS APIs, or UI frameworks.
//! Everything here can be tested on any machine without a phone attached.
//!
//! # Architecture overview (for beginners)
//!
//! AOA-KVM turns a USB-attached Android phone into a remote screen and input
//! peripheral.  The host switches the phone into *accessory mode*, registers
//! itself as a mouse, keyboard and touchpad, and receives the phone's screen
//! as a raw H.264 stream over a USB bulk endpoint.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – The vendor control requests of the AOA protocol and the
//!   HID report descriptors and reports sent through them.
//!
//! - **`domain`** – The connection state machine vocabulary and the bounded
//!   frame ring that lets a decode thread hand frames to a render thread
//!   without ever blocking either one.
//!
//! - **`video`** – Annex-B start-code scanning, access-unit detection and
//!   sequence parameter set parsing for the incoming H.264 stream.

pub mod domain;
pub mod protocol;
pub mod video;

pub use domain::frame_ring::{FrameRing, DEFAULT_FRAME_RING_CAPACITY};
pub use domain::state::{ConnectionEvent, ConnectionState, StatusScreen};
pub use protocol::accessory::{AccessoryIdentity, ControlRequest, ProtocolError};
pub use protocol::hid::HidDevice;
