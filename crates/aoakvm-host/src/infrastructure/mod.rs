//! Infrastructure layer for the host application.
//!
//! Contains the concrete adapters behind the application layer's traits:
//! libusb transfers, the H.264 decoder, the renderer and the config file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `aoakvm_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.
//!
//! # Sub-modules
//!
//! - **`usb`** – `rusb` implementation of `UsbBus`/`UsbHandle`, plus
//!   `MockUsbBus`, a scriptable in-memory bus that records every control
//!   transfer for tests.
//!
//! - **`video`** – Annex-B H.264 decoder implementing `DecoderFactory`.
//!
//! - **`render`** – Headless renderer implementing `Renderer`; status screens
//!   and presentation statistics go to the log.
//!
//! - **`storage`** – TOML configuration loading and defaults.

pub mod render;
pub mod storage;
pub mod usb;
pub mod video;
