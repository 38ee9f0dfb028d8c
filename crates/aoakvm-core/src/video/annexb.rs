//! H.264 Annex-B byte stream splitting.
//!
//! The device streams raw H.264 in Annex-B form: NAL units separated by
//! `00 00 01` or `00 00 00 01` start codes, with no container around them.
//! [`AccessUnitAssembler`] is fed arbitrary slices of that stream (bulk
//! transfers split wherever the USB stack likes) and emits one
//! [`AccessUnit`] per coded picture.
//!
//! An access unit ends when a NAL arrives that can only start a new picture:
//! an access unit delimiter, SEI, SPS or PPS after slice data, or a slice whose
//! `first_mb_in_slice` is zero (its first payload bit is set).

use tracing::warn;

/// Start code written in front of every NAL of an emitted access unit.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL units larger than this are dropped instead of buffered.
pub const MAX_NAL_LEN: usize = 16 * 1024 * 1024;

/// Default bound on one buffered access unit, start codes included.
pub const MAX_ACCESS_UNIT_LEN: usize = MAX_NAL_LEN;

/// The NAL unit types the assembler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Slice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl NalUnitType {
    /// Decodes the type from the first byte of a NAL unit.
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1..=4 => Self::Slice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            other => Self::Other(other),
        }
    }

    /// `true` for coded slice data.
    pub fn is_vcl(self) -> bool {
        matches!(self, Self::Slice | Self::IdrSlice)
    }

    /// `true` for NAL types that may only appear before the first slice of a picture.
    fn opens_access_unit(self) -> bool {
        match self {
            Self::Sei | Self::Sps | Self::Pps | Self::AccessUnitDelimiter => true,
            Self::Other(t) => (14..=18).contains(&t),
            Self::Slice | Self::IdrSlice => false,
        }
    }
}

/// One coded picture in Annex-B form, every NAL prefixed with [`START_CODE`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    /// Contains an IDR slice.
    pub keyframe: bool,
    /// The SPS NAL (without start code) carried in this unit, if any.
    pub sps: Option<Vec<u8>>,
}

#[derive(Default)]
struct PendingUnit {
    unit: AccessUnit,
    has_vcl: bool,
}

/// Incremental Annex-B parser producing complete access units.
pub struct AccessUnitAssembler {
    /// Unparsed bytes. Once `synced`, starts at the first byte of a NAL payload.
    buffer: Vec<u8>,
    synced: bool,
    scan_from: usize,
    pending: PendingUnit,
    max_unit_len: usize,
}

impl Default for AccessUnitAssembler {
    fn default() -> Self {
        Self::with_max_unit_len(MAX_ACCESS_UNIT_LEN)
    }
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler that discards a pending access unit once it would grow
    /// past `max_unit_len` bytes.
    pub fn with_max_unit_len(max_unit_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            synced: false,
            scan_from: 0,
            pending: PendingUnit::default(),
            max_unit_len,
        }
    }

    /// Feeds `bytes` and appends every access unit completed by them to `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut Vec<AccessUnit>) {
        self.buffer.extend_from_slice(bytes);

        loop {
            if !self.synced {
                match find_start_code(&self.buffer, 0) {
                    Some(payload) => {
                        self.buffer.drain(..payload);
                        self.synced = true;
                        self.scan_from = 0;
                    }
                    None => {
                        // Keep a possible partial start code.
                        let keep_from = self.buffer.len().saturating_sub(2);
                        self.buffer.drain(..keep_from);
                        return;
                    }
                }
            }

            match find_start_code(&self.buffer, self.scan_from) {
                Some(next_payload) => {
                    let nal_end = next_payload - 3;
                    let nal = trim_trailing_zeros(&self.buffer[..nal_end]).to_vec();
                    self.accept_nal(&nal, out);
                    self.buffer.drain(..next_payload);
                    self.scan_from = 0;
                }
                None => {
                    if self.buffer.len() > MAX_NAL_LEN {
                        warn!(len = self.buffer.len(), "dropping oversized NAL unit");
                        self.buffer.clear();
                        self.synced = false;
                    }
                    self.scan_from = self.buffer.len().saturating_sub(2);
                    return;
                }
            }
        }
    }

    /// Flushes the trailing NAL and returns the last access unit, if complete.
    ///
    /// Call once the byte stream has ended.
    pub fn finish(&mut self) -> Option<AccessUnit> {
        let mut out = Vec::new();
        if self.synced && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.accept_nal(trim_trailing_zeros(&rest), &mut out);
        }
        self.synced = false;
        self.scan_from = 0;
        self.buffer.clear();

        let pending = std::mem::take(&mut self.pending);
        if pending.has_vcl {
            out.push(pending.unit);
        }
        out.pop()
    }

    fn accept_nal(&mut self, nal: &[u8], out: &mut Vec<AccessUnit>) {
        let Some(&header) = nal.first() else {
            return;
        };
        let kind = NalUnitType::from_header(header);
        let first_slice_of_picture = kind.is_vcl() && nal.get(1).is_some_and(|b| b & 0x80 != 0);

        if self.pending.has_vcl && (kind.opens_access_unit() || first_slice_of_picture) {
            let done = std::mem::take(&mut self.pending);
            out.push(done.unit);
        }

        let grown = self.pending.unit.data.len() + START_CODE.len() + nal.len();
        if grown > self.max_unit_len && !self.pending.unit.data.is_empty() {
            warn!(
                len = self.pending.unit.data.len(),
                max = self.max_unit_len,
                "dropping oversized access unit"
            );
            self.pending = PendingUnit::default();
        }

        let unit = &mut self.pending.unit;
        unit.data.extend_from_slice(&START_CODE);
        unit.data.extend_from_slice(nal);
        match kind {
            NalUnitType::Sps => unit.sps = Some(nal.to_vec()),
            NalUnitType::IdrSlice => unit.keyframe = true,
            _ => {}
        }
        if kind.is_vcl() {
            self.pending.has_vcl = true;
        }
    }
}

/// Returns the index just past the first `00 00 01` at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 || from > data.len() - 3 {
        return None;
    }
    data[from..]
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|i| from + i + 3)
}

/// Strips the zero bytes that belong to a following 4-byte start code.
fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &nal[..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
