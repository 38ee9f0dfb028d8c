//! USB transport implementations.
//!
//! - **`rusb_bus`** – the real bus, backed by libusb through the `rusb` crate.
//! - **`mock`** – a scripted in-memory bus that simulates phones switching
//!   into accessory mode, bulk streams and unplug events.

pub mod mock;
pub mod rusb_bus;

pub use rusb_bus::RusbBus;
