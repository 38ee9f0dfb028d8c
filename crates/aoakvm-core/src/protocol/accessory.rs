//! Android Open Accessory (AOA) vendor control requests.
//!
//! Every AOA command is a USB *control transfer* on endpoint zero.  A control
//! transfer is described by a fixed 8-byte setup packet plus an optional data
//! stage:
//!
//! ```text
//! [bmRequestType:1][bRequest:1][wValue:2][wIndex:2][wLength:2] + payload
//! ```
//!
//! | Request                   | bmRequestType | bRequest | wValue    | wIndex        | payload          |
//! |---------------------------|---------------|----------|-----------|---------------|------------------|
//! | Get protocol version      | 0xC0 (IN)     | 51       | 0         | 0             | 2 bytes LE       |
//! | Send string               | 0x40 (OUT)    | 52       | 0         | field id 0..5 | string           |
//! | Start accessory mode      | 0x40 (OUT)    | 53       | 0         | 0             | none             |
//! | Register HID              | 0x40 (OUT)    | 54       | HID index | desc. length  | none             |
//! | Unregister HID            | 0x40 (OUT)    | 55       | HID index | 0             | none             |
//! | Set HID report descriptor | 0x40 (OUT)    | 56       | HID index | byte offset   | descriptor chunk |
//! | Send HID event            | 0x40 (OUT)    | 57       | HID index | 0             | HID report       |
//!
//! This module only *builds* requests.  Sending them is the job of the
//! transport layer in `aoakvm-host`, which keeps this crate free of any USB
//! library dependency.
//!
//! Reference: <https://source.android.com/devices/accessories/aoa2>

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::hid::HidDevice;

// ── Device identities ─────────────────────────────────────────────────────────

/// Vendor id every Android device reports once it is in accessory mode.
pub const ACCESSORY_VENDOR_ID: u16 = 0x18D1;

/// Product id of a device in plain accessory mode.
pub const ACCESSORY_PRODUCT_ID: u16 = 0x2D00;

/// Product id of a device in accessory mode with ADB still enabled.
pub const ACCESSORY_ADB_PRODUCT_ID: u16 = 0x2D01;

/// Returns `true` when the vendor/product pair identifies a device that is
/// already in accessory mode.
pub fn is_accessory_product(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == ACCESSORY_VENDOR_ID
        && (product_id == ACCESSORY_PRODUCT_ID || product_id == ACCESSORY_ADB_PRODUCT_ID)
}

// ── Request codes ─────────────────────────────────────────────────────────────

/// `bmRequestType` for vendor requests travelling device-to-host.
pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xC0;
/// `bmRequestType` for vendor requests travelling host-to-device.
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

pub const ACCESSORY_GET_PROTOCOL: u8 = 51;
pub const ACCESSORY_SEND_STRING: u8 = 52;
pub const ACCESSORY_START: u8 = 53;
pub const ACCESSORY_REGISTER_HID: u8 = 54;
pub const ACCESSORY_UNREGISTER_HID: u8 = 55;
pub const ACCESSORY_SET_HID_REPORT_DESC: u8 = 56;
pub const ACCESSORY_SEND_HID_EVENT: u8 = 57;

/// Length of the data stage of `ACCESSORY_GET_PROTOCOL`.
pub const PROTOCOL_VERSION_LEN: usize = 2;

/// First protocol version that supports the HID requests (54..57).
pub const MIN_HID_PROTOCOL_VERSION: u16 = 2;

/// Errors raised while building or decoding AOA requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A response was shorter than the request requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// An identity string contains a NUL byte, which would truncate it on the device.
    #[error("identity field {0:?} contains an interior NUL byte")]
    InteriorNul(AccessoryStringField),

    /// A payload does not fit in the 16-bit `wLength`/`wIndex` fields.
    #[error("payload of {len} bytes exceeds the 65535-byte control transfer limit")]
    PayloadTooLarge { len: usize },

    /// The device reported a max packet size of zero, so descriptors cannot be chunked.
    #[error("max control packet size must be non-zero")]
    ZeroPacketSize,
}

// ── Identity strings ──────────────────────────────────────────────────────────

/// The six identity strings, in the order they are sent.
///
/// The discriminant is the `wIndex` of the `ACCESSORY_SEND_STRING` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AccessoryStringField {
    Manufacturer = 0,
    Model = 1,
    Description = 2,
    Version = 3,
    Uri = 4,
    Serial = 5,
}

impl AccessoryStringField {
    /// All fields in transmission order.
    pub const ALL: [AccessoryStringField; 6] = [
        Self::Manufacturer,
        Self::Model,
        Self::Description,
        Self::Version,
        Self::Uri,
        Self::Serial,
    ];

    /// Whether the payload carries a trailing NUL.
    ///
    /// The manufacturer field is sent without one; devices in the field accept
    /// it that way and some reject the terminated form.
    pub fn is_nul_terminated(self) -> bool {
        !matches!(self, Self::Manufacturer)
    }
}

/// Identity the host announces to the phone before switching it to accessory mode.
///
/// Android matches `manufacturer` and `model` against the `<usb-accessory>`
/// filter of installed apps to decide which app receives the accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryIdentity {
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_serial")]
    pub serial: String,
}

fn default_manufacturer() -> String {
    "AOA-KVM".to_string()
}
fn default_model() -> String {
    "AOA-KVM Host".to_string()
}
fn default_description() -> String {
    "Remote screen and input for USB-attached devices".to_string()
}
fn default_version() -> String {
    "1.0".to_string()
}
fn default_uri() -> String {
    "https://github.com/aoa-kvm/aoa-kvm".to_string()
}
fn default_serial() -> String {
    "0000000000000001".to_string()
}

impl Default for AccessoryIdentity {
    fn default() -> Self {
        Self {
            manufacturer: default_manufacturer(),
            model: default_model(),
            description: default_description(),
            version: default_version(),
            uri: default_uri(),
            serial: default_serial(),
        }
    }
}

impl AccessoryIdentity {
    /// Returns the string belonging to `field`.
    pub fn field(&self, field: AccessoryStringField) -> &str {
        match field {
            AccessoryStringField::Manufacturer => &self.manufacturer,
            AccessoryStringField::Model => &self.model,
            AccessoryStringField::Description => &self.description,
            AccessoryStringField::Version => &self.version,
            AccessoryStringField::Uri => &self.uri,
            AccessoryStringField::Serial => &self.serial,
        }
    }

    /// Builds the six `ACCESSORY_SEND_STRING` requests in transmission order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if any field contains a NUL byte or is too long.
    pub fn send_string_requests(&self) -> Result<Vec<ControlRequest>, ProtocolError> {
        AccessoryStringField::ALL
            .iter()
            .map(|&field| ControlRequest::send_string(field, self.field(field)))
            .collect()
    }
}

// ── Control requests ──────────────────────────────────────────────────────────

/// A fully described vendor control transfer.
///
/// For device-to-host requests `payload` is empty and `length` gives the size
/// of the expected data stage; for host-to-device requests `length` equals
/// `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
    pub payload: Vec<u8>,
}

impl ControlRequest {
    /// Creates a host-to-device vendor request carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] when the payload does not fit `wLength`.
    pub fn vendor_out(
        request: u8,
        value: u16,
        index: u16,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        let length = u16::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge { len: payload.len() })?;
        Ok(Self {
            request_type: REQUEST_TYPE_VENDOR_OUT,
            request,
            value,
            index,
            length,
            payload,
        })
    }

    /// `ACCESSORY_GET_PROTOCOL`: reads the 2-byte protocol version.
    pub fn get_protocol() -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_IN,
            request: ACCESSORY_GET_PROTOCOL,
            value: 0,
            index: 0,
            length: PROTOCOL_VERSION_LEN as u16,
            payload: Vec::new(),
        }
    }

    /// `ACCESSORY_SEND_STRING` for one identity field.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InteriorNul`] if `value` contains a NUL byte.
    pub fn send_string(field: AccessoryStringField, value: &str) -> Result<Self, ProtocolError> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::InteriorNul(field));
        }
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        if field.is_nul_terminated() {
            payload.push(0);
        }
        Self::vendor_out(ACCESSORY_SEND_STRING, 0, field as u16, payload)
    }

    /// `ACCESSORY_START`: asks the device to re-enumerate in accessory mode.
    pub fn start_accessory() -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_OUT,
            request: ACCESSORY_START,
            value: 0,
            index: 0,
            length: 0,
            payload: Vec::new(),
        }
    }

    /// `ACCESSORY_REGISTER_HID`: announces a HID with a descriptor of `descriptor_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the length does not fit `wIndex`.
    pub fn register_hid(device: HidDevice, descriptor_len: usize) -> Result<Self, ProtocolError> {
        let index = u16::try_from(descriptor_len)
            .map_err(|_| ProtocolError::PayloadTooLarge { len: descriptor_len })?;
        Ok(Self {
            request_type: REQUEST_TYPE_VENDOR_OUT,
            request: ACCESSORY_REGISTER_HID,
            value: device.index(),
            index,
            length: 0,
            payload: Vec::new(),
        })
    }

    /// `ACCESSORY_UNREGISTER_HID`: removes a previously registered HID.
    pub fn unregister_hid(device: HidDevice) -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_OUT,
            request: ACCESSORY_UNREGISTER_HID,
            value: device.index(),
            index: 0,
            length: 0,
            payload: Vec::new(),
        }
    }

    /// `ACCESSORY_SET_HID_REPORT_DESC`: one descriptor chunk at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the chunk is too long.
    pub fn set_hid_report_desc(
        device: HidDevice,
        offset: u16,
        chunk: &[u8],
    ) -> Result<Self, ProtocolError> {
        Self::vendor_out(
            ACCESSORY_SET_HID_REPORT_DESC,
            device.index(),
            offset,
            chunk.to_vec(),
        )
    }

    /// `ACCESSORY_SEND_HID_EVENT`: one input report for a registered HID.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the report is too long.
    pub fn send_hid_event(device: HidDevice, report: &[u8]) -> Result<Self, ProtocolError> {
        Self::vendor_out(ACCESSORY_SEND_HID_EVENT, device.index(), 0, report.to_vec())
    }

    /// Returns `true` when the data stage flows from the device to the host.
    pub fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Decodes the little-endian protocol version returned by `ACCESSORY_GET_PROTOCOL`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when fewer than two bytes were read.
pub fn decode_protocol_version(bytes: &[u8]) -> Result<u16, ProtocolError> {
    match bytes {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(ProtocolError::InsufficientData {
            needed: PROTOCOL_VERSION_LEN,
            available: bytes.len(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
