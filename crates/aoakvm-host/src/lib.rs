//! aoakvm-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the host do? (for beginners)
//!
//! The host is the computer an Android phone is plugged into over USB.  It
//! shows the phone's screen in a window and lets the host's keyboard and
//! mouse drive the phone, with nothing installed on the phone beyond the
//! app that streams its screen.  It does this with the Android Open
//! Accessory (AOA) v2 protocol:
//!
//! 1. Scans the USB bus.  A phone in normal mode is asked for its AOA
//!    version, told who we are (six identity strings) and told to restart as
//!    an *accessory*.  It drops off the bus and comes back with Google's
//!    vendor id `18d1` and product id `2d00`/`2d01`.
//! 2. Opens the accessory and registers three virtual HID devices (mouse,
//!    keyboard, touchpad), uploading a report descriptor for each.
//! 3. Reads the H.264 screen stream from the bulk IN endpoint, decodes it on
//!    a dedicated thread and presents the newest frame.
//! 4. When the phone is unplugged, releases everything and goes back to 1.

/// Application layer: the connection lifecycle behind trait seams.
pub mod application;

/// Infrastructure layer: libusb, decoder, renderer, and config adapters.
pub mod infrastructure;
