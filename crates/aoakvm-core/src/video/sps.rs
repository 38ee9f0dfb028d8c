//! Sequence parameter set (SPS) parsing.
//!
//! Only the fields needed to size the display are kept: profile, level and
//! the cropped picture dimensions.  Everything in between is parsed just far
//! enough to skip it correctly (ITU-T H.264 §7.3.2.1.1).

use thiserror::Error;

use crate::video::bits::BitReader;

/// Errors raised for malformed codec parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpsError {
    #[error("SPS ended before all required fields were read")]
    Truncated,

    #[error("invalid Exp-Golomb code in SPS")]
    InvalidExpGolomb,

    #[error("NAL unit type {0} is not an SPS")]
    NotAnSps(u8),

    #[error("SPS declares an unsupported chroma_format_idc {0}")]
    UnsupportedChroma(u32),

    #[error("SPS describes an invalid picture size")]
    InvalidDimensions,

    #[error("SPS scaling list delta {0} is outside -128..=127")]
    InvalidScalingDelta(i32),
}

/// The parts of an SPS relevant to presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceParameterSet {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

/// Profiles whose SPS carries the chroma/bit-depth/scaling-matrix block.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

impl SequenceParameterSet {
    /// Parses an SPS NAL unit (header byte included, start code excluded).
    ///
    /// # Errors
    ///
    /// Returns [`SpsError`] when the NAL is not an SPS or any field is malformed.
    pub fn parse(nal: &[u8]) -> Result<Self, SpsError> {
        let header = *nal.first().ok_or(SpsError::Truncated)?;
        let nal_type = header & 0x1F;
        if nal_type != 7 {
            return Err(SpsError::NotAnSps(nal_type));
        }

        let rbsp = unescape_rbsp(&nal[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_u8()?;
        let _constraint_flags = r.read_u8()?;
        let level_idc = r.read_u8()?;
        let _sps_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc > 3 {
                return Err(SpsError::UnsupportedChroma(chroma_format_idc));
            }
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            let _bit_depth_luma_minus8 = r.read_ue()?;
            let _bit_depth_chroma_minus8 = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_bit()?;
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num_minus4 = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_poc_lsb_minus4 = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    let _offset_for_ref_frame = r.read_se()?;
                }
            }
            _ => {}
        }
        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_bit()?;

        let width_in_mbs = r.read_ue()?.checked_add(1).ok_or(SpsError::InvalidDimensions)?;
        let height_in_map_units = r.read_ue()?.checked_add(1).ok_or(SpsError::InvalidDimensions)?;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            let _mb_adaptive_frame_field = r.read_bit()?;
        }
        let _direct_8x8_inference = r.read_bit()?;

        let field_factor: u32 = if frame_mbs_only { 1 } else { 2 };
        let coded_width = width_in_mbs.checked_mul(16).ok_or(SpsError::InvalidDimensions)?;
        let coded_height = height_in_map_units
            .checked_mul(16 * field_factor)
            .ok_or(SpsError::InvalidDimensions)?;

        let (mut crop_x, mut crop_y) = (0u32, 0u32);
        if r.read_bit()? {
            let left = r.read_ue()?;
            let right = r.read_ue()?;
            let top = r.read_ue()?;
            let bottom = r.read_ue()?;

            let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
            let (unit_x, unit_y) = match chroma_array_type {
                0 => (1, field_factor),
                1 => (2, 2 * field_factor),
                2 => (2, field_factor),
                _ => (1, field_factor),
            };
            crop_x = left
                .checked_add(right)
                .and_then(|v| v.checked_mul(unit_x))
                .ok_or(SpsError::InvalidDimensions)?;
            crop_y = top
                .checked_add(bottom)
                .and_then(|v| v.checked_mul(unit_y))
                .ok_or(SpsError::InvalidDimensions)?;
        }

        let width = coded_width.checked_sub(crop_x).filter(|w| *w > 0);
        let height = coded_height.checked_sub(crop_y).filter(|h| *h > 0);
        match (width, height) {
            (Some(width), Some(height)) => Ok(Self {
                profile_idc,
                level_idc,
                width,
                height,
            }),
            _ => Err(SpsError::InvalidDimensions),
        }
    }
}

/// Range of `delta_scale` allowed by H.264 §7.4.2.1.1.1.
const DELTA_SCALE_RANGE: std::ops::RangeInclusive<i32> = -128..=127;

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<(), SpsError> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            if !DELTA_SCALE_RANGE.contains(&delta) {
                return Err(SpsError::InvalidScalingDelta(delta));
            }
            next_scale = (last_scale + delta).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Removes emulation prevention bytes (`00 00 03` → `00 00`).
pub fn unescape_rbsp(escaped: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut zeros = 0;
    for &byte in escaped {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds SPS bit strings for tests.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bits: usize,
    }

    impl BitWriter {
        pub(crate) fn bit(&mut self, b: bool) -> &mut Self {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if b {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - (self.bits % 8));
            }
            self.bits += 1;
            self
        }

        pub(crate) fn bits(&mut self, value: u32, count: u32) -> &mut Self {
            for i in (0..count).rev() {
                self.bit((value >> i) & 1 == 1);
            }
            self
        }

        pub(crate) fn ue(&mut self, value: u32) -> &mut Self {
            let code = value + 1;
            let len = 32 - code.leading_zeros();
            self.bits(0, len - 1).bits(code, len)
        }

        pub(crate) fn finish(&mut self) -> Vec<u8> {
            // rbsp_stop_one_bit + alignment
            self.bit(true);
            std::mem::take(&mut self.bytes)
        }
    }

    /// Baseline-profile SPS for `width_mbs` x `height_mbs` macroblocks with
    /// an optional bottom crop (in crop units).
    pub(crate) fn baseline_sps(width_mbs: u32, height_mbs: u32, crop_bottom: Option<u32>) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(66, 8) // profile_idc (baseline)
            .bits(0xC0, 8) // constraint flags
            .bits(31, 8) // level_idc
            .ue(0) // sps id
            .ue(0) // log2_max_frame_num_minus4
            .ue(0) // pic_order_cnt_type
            .ue(0) // log2_max_poc_lsb_minus4
            .ue(1) // max_num_ref_frames
            .bit(false) // gaps
            .ue(width_mbs - 1)
            .ue(height_mbs - 1)
            .bit(true) // frame_mbs_only
            .bit(true); // direct_8x8_inference
        match crop_bottom {
            Some(bottom) => {
                w.bit(true).ue(0).ue(0).ue(0).ue(bottom);
            }
            None => {
                w.bit(false);
            }
        }
        w.bit(false); // vui_parameters_present
        let mut nal = vec![0x67];
        nal.extend(w.finish());
        nal
    }

    #[test]
    fn test_parse_baseline_720p() {
        // Arrange – 80 x 45 macroblocks = 1280 x 720
        let nal = baseline_sps(80, 45, None);

        // Act
        let sps = SequenceParameterSet::parse(&nal).unwrap();

        // Assert
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert_eq!((sps.width, sps.height), (1280, 720));
    }

    #[test]
    fn test_parse_applies_frame_cropping() {
        // 120 x 68 MBs = 1920 x 1088, cropped by 4 units of 2 rows = 1080
        let nal = baseline_sps(120, 68, Some(4));
        let sps = SequenceParameterSet::parse(&nal).unwrap();
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn test_parse_high_profile_with_chroma_block() {
        // Arrange
        let mut w = BitWriter::default();
        w.bits(100, 8)
            .bits(0, 8)
            .bits(40, 8)
            .ue(0) // sps id
            .ue(1) // chroma_format_idc 4:2:0
            .ue(0) // bit_depth_luma_minus8
            .ue(0) // bit_depth_chroma_minus8
            .bit(false) // qpprime bypass
            .bit(false) // no scaling matrix
            .ue(0)
            .ue(2) // pic_order_cnt_type 2
            .ue(1)
            .bit(false)
            .ue(44) // 45 MBs wide = 720
            .ue(79) // 80 MBs high = 1280 (portrait phone)
            .bit(true)
            .bit(true)
            .bit(false)
            .bit(false);
        let mut nal = vec![0x27];
        nal.extend(w.finish());

        // Act
        let sps = SequenceParameterSet::parse(&nal).unwrap();

        // Assert
        assert_eq!(sps.profile_idc, 100);
        assert_eq!((sps.width, sps.height), (720, 1280));
    }

    /// High-profile 4:2:0 SPS, 1280x720, whose first scaling list starts
    /// with `delta_code` (the raw `ue(v)` code of the first `delta_scale`)
    /// followed by zero deltas.
    fn high_sps_with_scaling_list(delta_code: u32) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(100, 8)
            .bits(0, 8)
            .bits(40, 8)
            .ue(0) // sps id
            .ue(1) // chroma_format_idc 4:2:0
            .ue(0)
            .ue(0)
            .bit(false)
            .bit(true) // seq_scaling_matrix_present
            .bit(true) // list 0 present
            .ue(delta_code);
        for _ in 1..16 {
            w.ue(0);
        }
        for _ in 1..8 {
            w.bit(false);
        }
        w.ue(0)
            .ue(2)
            .ue(1)
            .bit(false)
            .ue(79) // 80 MBs = 1280
            .ue(44) // 45 MBs = 720
            .bit(true)
            .bit(true)
            .bit(false)
            .bit(false);
        let mut nal = vec![0x27];
        nal.extend(w.finish());
        nal
    }

    #[test]
    fn test_parse_skips_scaling_list() {
        // ue 3 = se -2
        let sps = SequenceParameterSet::parse(&high_sps_with_scaling_list(3)).unwrap();
        assert_eq!((sps.width, sps.height), (1280, 720));
    }

    #[test]
    fn test_scaling_delta_out_of_range_is_error() {
        // Arrange – ue 2^32-3 = se +(2^31-1)
        let nal = high_sps_with_scaling_list(u32::MAX - 2);

        // Act
        let result = SequenceParameterSet::parse(&nal);

        // Assert
        assert_eq!(result, Err(SpsError::InvalidScalingDelta(i32::MAX)));
    }

    #[test]
    fn test_parse_rejects_non_sps_nal() {
        assert_eq!(SequenceParameterSet::parse(&[0x68, 0xCE]), Err(SpsError::NotAnSps(8)));
    }

    #[test]
    fn test_parse_truncated_sps_is_error() {
        let nal = baseline_sps(80, 45, None);
        assert_eq!(SequenceParameterSet::parse(&nal[..5]), Err(SpsError::Truncated));
    }

    #[test]
    fn test_crop_larger_than_picture_is_invalid() {
        let nal = baseline_sps(1, 1, Some(8));
        assert_eq!(SequenceParameterSet::parse(&nal), Err(SpsError::InvalidDimensions));
    }

    #[test]
    fn test_unescape_rbsp_removes_emulation_prevention() {
        assert_eq!(unescape_rbsp(&[0x00, 0x00, 0x03, 0x01]), vec![0x00, 0x00, 0x01]);
        assert_eq!(unescape_rbsp(&[0x00, 0x03, 0x01]), vec![0x00, 0x03, 0x01]);
    }
}
