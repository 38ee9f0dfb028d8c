//! Protocol module containing the AOA control requests and the HID layer
//! carried on top of them.

pub mod accessory;
pub mod hid;

pub use accessory::{
    decode_protocol_version, is_accessory_product, AccessoryIdentity, AccessoryStringField,
    ControlRequest, ProtocolError,
};
pub use hid::{plan_descriptor_chunks, DescriptorChunk, HidDevice};
