//! Application layer of the host: the connection lifecycle.
//!
//! # What lives here? (for beginners)
//!
//! The application layer sits between the pure protocol/domain code in
//! `aoakvm-core` and the concrete infrastructure (libusb, the decoder, the
//! window).  It depends only on traits, so every use case below can be driven
//! by the scripted mock bus in tests.
//!
//! # Sub-modules
//!
//! - **`transport`** – The USB seam: [`transport::UsbBus`] enumerates and
//!   opens devices, [`transport::UsbHandle`] performs control and bulk
//!   transfers on one open device.
//!
//! - **`handshake`** – Finds a device and switches it into accessory mode,
//!   or opens one that is already there.
//!
//! - **`hid_registration`** – Registers the mouse, keyboard and touchpad
//!   with the accessory and uploads their report descriptors.
//!
//! - **`ingest`** – Turns the bulk video endpoint into a `std::io::Read`.
//!
//! - **`decode`** – The decoder seam and the decode thread loop.
//!
//! - **`session`** – The connection state machine that strings the above
//!   together, plus the renderer seam.
//!
//! - **`input`** – Sends HID input reports over the current connection.

pub mod decode;
pub mod handshake;
pub mod hid_registration;
pub mod ingest;
pub mod input;
pub mod session;
pub mod transport;
