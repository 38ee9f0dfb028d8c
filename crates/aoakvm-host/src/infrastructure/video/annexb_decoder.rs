//! H.264 Annex-B decoder over the ingestion byte stream.
//!
//! Opening a stream reads up to `probe_size` bytes looking for the first
//! access unit that carries a sequence parameter set; its coded size becomes
//! the stream's dimensions.  Anything before that unit cannot be decoded and
//! is discarded.  After opening, every access unit becomes one
//! [`VideoFrame`] whose payload is the unit's Annex-B bytes.

use std::collections::VecDeque;
use std::io::{self, Read};

use tracing::{debug, info};

use aoakvm_core::video::{AccessUnit, AccessUnitAssembler, SequenceParameterSet, SpsError};

use crate::application::decode::{ByteSource, DecodeError, DecoderFactory, VideoDecoder, VideoFrame};

/// Read sizes used while probing and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnexBSettings {
    /// Bytes read while looking for the first SPS before giving up.
    pub probe_size: usize,
    /// Size of each `read` on the byte source.
    pub read_chunk: usize,
}

impl Default for AnnexBSettings {
    fn default() -> Self {
        Self {
            probe_size: 1024 * 1024,
            read_chunk: 4096,
        }
    }
}

/// Opens [`AnnexBDecoder`]s.
#[derive(Debug, Clone, Default)]
pub struct AnnexBDecoderFactory {
    settings: AnnexBSettings,
}

impl AnnexBDecoderFactory {
    pub fn new(settings: AnnexBSettings) -> Self {
        Self { settings }
    }
}

impl DecoderFactory for AnnexBDecoderFactory {
    fn open(&self, source: ByteSource) -> Result<Box<dyn VideoDecoder>, DecodeError> {
        let decoder = AnnexBDecoder::probe(source, self.settings)?;
        Ok(Box::new(decoder))
    }
}

/// One opened H.264 stream.
pub struct AnnexBDecoder {
    source: ByteSource,
    assembler: AccessUnitAssembler,
    pending: VecDeque<AccessUnit>,
    chunk: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    ended: bool,
}

impl AnnexBDecoder {
    /// Reads from `source` until the first decodable access unit is found.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Probe`] if no SPS with a non-zero picture size
    /// appears within `probe_size` bytes, and [`DecodeError::Io`] if the
    /// source fails first.
    pub fn probe(source: ByteSource, settings: AnnexBSettings) -> Result<Self, DecodeError> {
        let mut decoder = Self {
            source,
            assembler: AccessUnitAssembler::new(),
            pending: VecDeque::new(),
            chunk: vec![0; settings.read_chunk.max(1)],
            width: 0,
            height: 0,
            sequence: 0,
            ended: false,
        };

        let mut probed = 0usize;
        loop {
            while let Some(unit) = decoder.pending.pop_front() {
                let Some(sps) = unit.sps.as_deref() else {
                    debug!(len = unit.data.len(), "discarding access unit before first SPS");
                    continue;
                };
                let sps = SequenceParameterSet::parse(sps)
                    .map_err(|e| DecodeError::Probe(format!("unusable SPS: {e}")))?;
                info!(
                    profile = sps.profile_idc,
                    level = sps.level_idc,
                    width = sps.width,
                    height = sps.height,
                    probed,
                    "H.264 stream found"
                );
                decoder.width = sps.width;
                decoder.height = sps.height;
                decoder.pending.push_front(unit);
                return Ok(decoder);
            }

            if decoder.ended {
                return Err(DecodeError::Probe(format!("stream ended after {probed} bytes without an SPS")));
            }
            if probed >= settings.probe_size {
                return Err(DecodeError::Probe(format!("no SPS within the first {probed} bytes")));
            }
            probed += decoder.fill()?;
        }
    }

    /// Reads one chunk into the assembler.  Returns the number of bytes read.
    fn fill(&mut self) -> Result<usize, DecodeError> {
        loop {
            match self.source.read(&mut self.chunk) {
                Ok(0) => {
                    self.ended = true;
                    self.pending.extend(self.assembler.finish());
                    return Ok(0);
                }
                Ok(n) => {
                    let mut units = Vec::new();
                    self.assembler.push(&self.chunk[..n], &mut units);
                    self.pending.extend(units);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::Io(e)),
            }
        }
    }

    fn frame_from(&mut self, unit: AccessUnit) -> Result<VideoFrame, DecodeError> {
        if let Some(sps) = unit.sps.as_deref() {
            match SequenceParameterSet::parse(sps) {
                Ok(sps) if (sps.width, sps.height) != (self.width, self.height) => {
                    info!(width = sps.width, height = sps.height, "stream resolution changed");
                    self.width = sps.width;
                    self.height = sps.height;
                }
                Ok(_) => {}
                Err(e @ SpsError::UnsupportedChroma(_)) => return Err(DecodeError::Fatal(e.to_string())),
                Err(e) => return Err(DecodeError::Corrupt(format!("bad SPS: {e}"))),
            }
        }

        let frame = VideoFrame {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            keyframe: unit.keyframe,
            data: unit.data,
        };
        self.sequence += 1;
        Ok(frame)
    }
}

impl VideoDecoder for AnnexBDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return self.frame_from(unit).map(Some);
            }
            if self.ended {
                return Ok(None);
            }
            self.fill()?;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
