//! HID devices registered with an accessory-mode device.
//!
//! AOA v2 lets the host register up to several *virtual* HID devices on the
//! phone.  The phone then behaves exactly as if a real USB mouse, keyboard or
//! touchpad had been plugged into it, and the host injects input by sending
//! HID reports through `ACCESSORY_SEND_HID_EVENT`.
//!
//! # What is a HID report descriptor? (for beginners)
//!
//! A report descriptor is a small program, written in the HID "item" byte
//! code, that tells the receiving OS how to interpret every report a device
//! sends: which bits are buttons, which bytes are X/Y axes, their ranges and
//! whether they are absolute or relative.  The descriptors below are fixed;
//! each report builder in this module produces exactly the layout its
//! descriptor declares.
//!
//! # Chunking
//!
//! A descriptor may be longer than the device's endpoint-zero max packet
//! size.  It is then sent as several `ACCESSORY_SET_HID_REPORT_DESC`
//! requests whose `wIndex` carries the byte offset of the chunk; the device
//! reassembles them in order.

use crate::protocol::accessory::ProtocolError;

// ── Report descriptors ────────────────────────────────────────────────────────

/// Relative mouse: 5 buttons, X/Y and wheel as signed bytes.
pub const REPORT_DESC_MOUSE: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Button)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x05, //     Usage Maximum (Button 5)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Var, Abs)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x03, //     Report Size (3)
    0x81, 0x03, //     Input (Const, Var, Abs) padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Var, Rel)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Boot-style keyboard: modifier bitmap, reserved byte, six key slots.
pub const REPORT_DESC_KEYBOARD: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Keyboard)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x95, 0x08, //   Report Count (8)
    0x75, 0x01, //   Report Size (1)
    0x81, 0x02, //   Input (Data, Var, Abs)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Const) reserved byte
    0x05, 0x08, //   Usage Page (LEDs)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x05, 0x07, //   Usage Page (Keyboard)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xFF, //   Usage Maximum (255)
    0x81, 0x00, //   Input (Data, Array, Abs)
    0xC0, // End Collection
];

/// Absolute single-touch digitizer: tip/in-range bits, X/Y in 0..=10000.
pub const REPORT_DESC_TOUCHPAD: &[u8] = &[
    0x05, 0x0D, // Usage Page (Digitizer)
    0x09, 0x02, // Usage (Pen)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x20, //   Usage (Stylus)
    0xA1, 0x00, //   Collection (Physical)
    0x09, 0x42, //     Usage (Tip Switch)
    0x09, 0x32, //     Usage (In Range)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x75, 0x01, //     Report Size (1)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x02, //     Input (Data, Var, Abs)
    0x75, 0x01, //     Report Size (1)
    0x95, 0x06, //     Report Count (6)
    0x81, 0x01, //     Input (Const) padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x01, //     Usage (Pointer)
    0xA1, 0x00, //     Collection (Physical)
    0x09, 0x30, //       Usage (X)
    0x09, 0x31, //       Usage (Y)
    0x16, 0x00, 0x00, // Logical Minimum (0)
    0x26, 0x10, 0x27, // Logical Maximum (10000)
    0x36, 0x00, 0x00, // Physical Minimum (0)
    0x46, 0x10, 0x27, // Physical Maximum (10000)
    0x66, 0x00, 0x00, // Unit (None)
    0x75, 0x10, //       Report Size (16)
    0x95, 0x02, //       Report Count (2)
    0x81, 0x02, //       Input (Data, Var, Abs)
    0xC0, //     End Collection
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Upper bound of the touchpad's absolute axes.
pub const TOUCHPAD_AXIS_MAX: u16 = 10_000;

// ── HID devices ───────────────────────────────────────────────────────────────

/// One of the three virtual HIDs, identified on the wire by its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HidDevice {
    Mouse = 0,
    Keyboard = 1,
    Touchpad = 2,
}

impl HidDevice {
    /// Registration order.
    pub const ALL: [HidDevice; 3] = [Self::Mouse, Self::Keyboard, Self::Touchpad];

    /// The accessory-assigned id used in `wValue`.
    pub fn index(self) -> u16 {
        self as u16
    }

    /// The fixed report descriptor for this device class.
    pub fn report_descriptor(self) -> &'static [u8] {
        match self {
            Self::Mouse => REPORT_DESC_MOUSE,
            Self::Keyboard => REPORT_DESC_KEYBOARD,
            Self::Touchpad => REPORT_DESC_TOUCHPAD,
        }
    }
}

impl TryFrom<u16> for HidDevice {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Mouse),
            1 => Ok(Self::Keyboard),
            2 => Ok(Self::Touchpad),
            other => Err(other),
        }
    }
}

// ── Descriptor chunking ───────────────────────────────────────────────────────

/// One `ACCESSORY_SET_HID_REPORT_DESC` payload and its byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorChunk<'a> {
    pub offset: u16,
    pub bytes: &'a [u8],
}

/// Splits `descriptor` into chunks of at most `max_packet_size` bytes.
///
/// Offsets start at 0 and advance by the size of the previous chunk, so the
/// chunks are contiguous, non-overlapping and cover the whole descriptor.
///
/// # Errors
///
/// Returns [`ProtocolError::ZeroPacketSize`] for a zero packet size and
/// [`ProtocolError::PayloadTooLarge`] if an offset would not fit in `wIndex`.
pub fn plan_descriptor_chunks(
    descriptor: &[u8],
    max_packet_size: usize,
) -> Result<Vec<DescriptorChunk<'_>>, ProtocolError> {
    if max_packet_size == 0 {
        return Err(ProtocolError::ZeroPacketSize);
    }
    if descriptor.len() > usize::from(u16::MAX) {
        return Err(ProtocolError::PayloadTooLarge { len: descriptor.len() });
    }

    descriptor
        .chunks(max_packet_size)
        .enumerate()
        .map(|(i, bytes)| {
            let offset = u16::try_from(i * max_packet_size)
                .map_err(|_| ProtocolError::PayloadTooLarge { len: descriptor.len() })?;
            Ok(DescriptorChunk { offset, bytes })
        })
        .collect()
}

// ── Input reports ─────────────────────────────────────────────────────────────

/// Mouse button bits as laid out in [`REPORT_DESC_MOUSE`].
pub mod mouse_buttons {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const MIDDLE: u8 = 1 << 2;
    pub const BACK: u8 = 1 << 3;
    pub const FORWARD: u8 = 1 << 4;
}

/// A relative mouse report (4 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

impl MouseReport {
    pub fn to_bytes(self) -> [u8; 4] {
        // Only the low five bits are declared; the padding bits must stay clear.
        [
            self.buttons & 0x1F,
            self.dx as u8,
            self.dy as u8,
            self.wheel as u8,
        ]
    }
}

/// A keyboard report (8 bytes): modifiers, reserved, up to six HID usage ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    /// Builds a report from the pressed keys; extra keys beyond six are dropped.
    pub fn pressed(modifiers: u8, keys: &[u8]) -> Self {
        let mut slots = [0u8; 6];
        for (slot, key) in slots.iter_mut().zip(keys) {
            *slot = *key;
        }
        Self { modifiers, keys: slots }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.modifiers;
        out[2..].copy_from_slice(&self.keys);
        out
    }
}

/// An absolute touch report (5 bytes): state bits then little-endian X and Y.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchReport {
    pub tip: bool,
    pub in_range: bool,
    pub x: u16,
    pub y: u16,
}

impl TouchReport {
    /// Builds a report from coordinates normalised to `0.0..=1.0`.
    pub fn from_normalized(tip: bool, x: f32, y: f32) -> Self {
        let scale = |v: f32| (v.clamp(0.0, 1.0) * f32::from(TOUCHPAD_AXIS_MAX)).round() as u16;
        Self {
            tip,
            in_range: true,
            x: scale(x),
            y: scale(y),
        }
    }

    pub fn to_bytes(self) -> [u8; 5] {
        let state = u8::from(self.tip) | (u8::from(self.in_range) << 1);
        let x = self.x.min(TOUCHPAD_AXIS_MAX).to_le_bytes();
        let y = self.y.min(TOUCHPAD_AXIS_MAX).to_le_bytes();
        [state, x[0], x[1], y[0], y[1]]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
