//! Decoder seam and the decode thread loop.
//!
//! The decoder is an external collaborator: it pulls bytes from the
//! ingestion adapter through a `Read` and yields frames.  The application
//! layer only knows the two traits below; `infrastructure::video` provides
//! the Annex-B implementation.
//!
//! # Decode thread
//!
//! [`run_decode_loop`] runs on its own OS thread for the lifetime of one
//! stream.  It pushes every frame into the shared [`FrameRing`] and stops as
//! soon as the shared connected flag drops.  When the stream itself ends or
//! fails, the loop clears the flag so the render loop notices.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, trace};

use aoakvm_core::FrameRing;

/// One decoded picture ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Position in the stream, starting at 0 for each opened stream.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The byte source failed; usually the device went away.
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),

    /// No usable video stream was found while opening.
    #[error("no decodable video stream: {0}")]
    Probe(String),

    /// One frame could not be decoded; the stream continues.
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// The decoder cannot continue with this stream.
    #[error("unrecoverable decoder error: {0}")]
    Fatal(String),
}

/// Byte source handed to a decoder.
pub type ByteSource = Box<dyn Read + Send>;

/// An opened video stream.
#[cfg_attr(test, mockall::automock)]
pub trait VideoDecoder: Send {
    /// Coded picture size found while opening.  Never zero.
    fn dimensions(&self) -> (u32, u32);

    /// Blocks until the next frame is decoded.  `Ok(None)` means end of stream.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError>;
}

/// Opens decoders over a byte source.
#[cfg_attr(test, mockall::automock)]
pub trait DecoderFactory: Send + Sync {
    /// Probes `source` for a video stream.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Probe`] when no stream with a non-zero picture
    /// size is found, or [`DecodeError::Io`] if the source fails first.
    fn open(&self, source: ByteSource) -> Result<Box<dyn VideoDecoder>, DecodeError>;
}

/// Why the decode thread returned.
#[derive(Debug)]
pub enum DecodeExit {
    /// The connected flag was cleared by someone else.
    Stopped,
    /// The byte source ended or failed.
    StreamEnded,
    /// The decoder reported an unrecoverable condition.
    Fatal(DecodeError),
}

/// Decodes frames into `frames` until `connected` drops or the stream ends.
pub fn run_decode_loop(
    mut decoder: Box<dyn VideoDecoder>,
    frames: &FrameRing<VideoFrame>,
    connected: &AtomicBool,
) -> DecodeExit {
    let mut decoded = 0u64;
    let mut skipped = 0u64;

    let exit = loop {
        if !connected.load(Ordering::Acquire) {
            break DecodeExit::Stopped;
        }
        match decoder.next_frame() {
            Ok(Some(frame)) => {
                decoded += 1;
                if frames.push(frame) {
                    trace!("frame ring full, oldest frame dropped");
                }
            }
            Ok(None) => {
                info!("video stream ended");
                break DecodeExit::StreamEnded;
            }
            Err(DecodeError::Corrupt(reason)) => {
                skipped += 1;
                debug!(%reason, "skipping undecodable frame");
            }
            Err(DecodeError::Io(e)) => {
                info!(error = %e, "video stream interrupted");
                break DecodeExit::StreamEnded;
            }
            Err(e) => {
                error!(error = %e, "decoder cannot continue");
                break DecodeExit::Fatal(e);
            }
        }
    };

    connected.store(false, Ordering::Release);
    info!(decoded, skipped, evicted = frames.evicted(), "decode thread finished");
    exit
}

// ── Tests ─────────────────────────────────────────────────────────────────────
