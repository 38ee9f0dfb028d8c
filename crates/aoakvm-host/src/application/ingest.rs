//! Video ingestion: the bulk IN endpoint as a `std::io::Read` byte stream.
//!
//! # Why a leftover buffer? (for beginners)
//!
//! A bulk transfer returns whatever the device had ready: 3 bytes, 5000
//! bytes, anything up to the scratch buffer size.  The demuxer on the other
//! side asks for its own fixed amounts (4 KiB at a time).  When a transfer
//! returns more than was asked for, the surplus stays in the scratch buffer
//! and the next `read` is served from there without touching the USB bus.
//!
//! ```text
//!  scratch: [ served to caller | leftover ............ | unused ]
//!            0                 offset       offset+pending
//! ```
//!
//! # Error handling
//!
//! Soft transport errors (I/O, timeout, busy, ...) are retried.  Between
//! retries the adapter checks the shared connected flag, so once the session
//! marks the link lost the decode thread unwinds within one bulk timeout.
//! `NoDevice` ends the stream for good: the adapter raises the shared
//! device-gone flag, and this and every later read fails with
//! [`io::ErrorKind::NotConnected`].

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::application::transport::{TransportError, UsbHandle};

/// Bulk IN endpoint the device streams video on.
pub const VIDEO_ENDPOINT: u8 = 0x81;

/// Endpoint, timeout and buffer sizing for one adapter.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub endpoint: u8,
    pub bulk_timeout: Duration,
    pub scratch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            endpoint: VIDEO_ENDPOINT,
            bulk_timeout: Duration::from_millis(200),
            scratch_size: 16 * 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("scratch buffer size must be non-zero")]
    ZeroScratch,

    #[error("failed to allocate a {0}-byte scratch buffer")]
    Allocation(usize),
}

/// Pull-based byte source over the bulk endpoint.
///
/// Owned by the decode thread for the lifetime of one stream.
pub struct VideoIngestion<H: UsbHandle> {
    handle: Arc<H>,
    connected: Arc<AtomicBool>,
    device_gone: Arc<AtomicBool>,
    settings: IngestSettings,
    scratch: Vec<u8>,
    offset: usize,
    pending: usize,
    disconnected: bool,
}

impl<H: UsbHandle> VideoIngestion<H> {
    /// Binds an adapter to `handle`, allocating its scratch buffer.
    ///
    /// `device_gone` is raised when the endpoint reports that the device no
    /// longer exists; the handle must not be used for anything after that.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the scratch buffer cannot be allocated.
    pub fn open(
        handle: Arc<H>,
        connected: Arc<AtomicBool>,
        device_gone: Arc<AtomicBool>,
        settings: IngestSettings,
    ) -> Result<Self, IngestError> {
        if settings.scratch_size == 0 {
            return Err(IngestError::ZeroScratch);
        }
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(settings.scratch_size)
            .map_err(|_| IngestError::Allocation(settings.scratch_size))?;
        scratch.resize(settings.scratch_size, 0);

        Ok(Self {
            handle,
            connected,
            device_gone,
            settings,
            scratch,
            offset: 0,
            pending: 0,
            disconnected: false,
        })
    }

    /// Bytes held from the last transfer and not yet handed out.
    pub fn leftover(&self) -> usize {
        self.pending
    }

    fn serve_leftover(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.min(buf.len());
        buf[..n].copy_from_slice(&self.scratch[self.offset..self.offset + n]);
        self.offset += n;
        self.pending -= n;
        n
    }

    /// One bulk transfer into the scratch buffer, retrying soft errors.
    fn fill(&mut self) -> io::Result<usize> {
        loop {
            if !self.connected.load(Ordering::Acquire) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "link marked lost"));
            }
            match self
                .handle
                .read_bulk(self.settings.endpoint, &mut self.scratch, self.settings.bulk_timeout)
            {
                Ok(0) => continue,
                Ok(n) => return Ok(n),
                Err(e) if e.is_soft() => trace!(error = %e, "bulk read retry"),
                Err(TransportError::NoDevice) => {
                    debug!("bulk endpoint reports no device");
                    self.disconnected = true;
                    self.device_gone.store(true, Ordering::Release);
                    return Err(io::Error::new(io::ErrorKind::NotConnected, TransportError::NoDevice));
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
    }
}

impl<H: UsbHandle> Read for VideoIngestion<H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending > 0 {
            return Ok(self.serve_leftover(buf));
        }
        if self.disconnected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, TransportError::NoDevice));
        }

        let received = self.fill()?;
        self.offset = 0;
        self.pending = received;
        Ok(self.serve_leftover(buf))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
