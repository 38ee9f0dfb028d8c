//! Integration tests for H.264 stream parsing through the public API.
//!
//! A stream is split into access units chunk by chunk, the way bulk reads
//! deliver it, and the coded size is read from the SPS each keyframe carries.

use aoakvm_core::video::{AccessUnitAssembler, SequenceParameterSet};

/// Baseline SPS for 1920x1080: 120 x 68 macroblocks with 8 rows cropped.
const SPS_1080P: &[u8] = &[0x67, 0x42, 0xC0, 0x28, 0xF4, 0x03, 0xC0, 0x11, 0x3F, 0x2A];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

fn picture(keyframe: bool, payload: u8) -> Vec<u8> {
    let mut out = Vec::new();
    if keyframe {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(SPS_1080P);
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(PPS);
    }
    out.extend_from_slice(&[0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }, 0x88]);
    out.extend(std::iter::repeat(payload).take(3000));
    out
}

#[test]
fn test_sps_reports_1080p() {
    let sps = SequenceParameterSet::parse(SPS_1080P).unwrap();
    assert_eq!(sps.profile_idc, 66);
    assert_eq!((sps.width, sps.height), (1920, 1080));
}

#[test]
fn test_chunked_stream_yields_one_unit_per_picture() {
    // Arrange – a GOP of one keyframe and nine predicted pictures
    let mut stream = Vec::new();
    for i in 0..10u8 {
        stream.extend(picture(i == 0, 0x10 + i));
    }

    // Act – feed in the 4 KiB pieces a bulk endpoint delivers
    let mut assembler = AccessUnitAssembler::new();
    let mut units = Vec::new();
    for chunk in stream.chunks(4096) {
        assembler.push(chunk, &mut units);
    }
    units.extend(assembler.finish());

    // Assert
    assert_eq!(units.len(), 10);
    assert!(units[0].keyframe);
    assert!(units[1..].iter().all(|u| !u.keyframe && u.sps.is_none()));

    let sps = units[0].sps.as_deref().map(SequenceParameterSet::parse);
    assert_eq!(sps.map(|s| s.map(|s| (s.width, s.height))), Some(Ok((1920, 1080))));
}

#[test]
fn test_finish_on_empty_assembler_returns_nothing() {
    let mut assembler = AccessUnitAssembler::new();
    assert_eq!(assembler.finish(), None);
}
