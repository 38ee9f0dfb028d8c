//! H.264 elementary stream parsing.
//!
//! The phone sends its screen as a raw Annex-B byte stream: NAL units
//! separated by `00 00 01` / `00 00 00 01` start codes, with no container
//! and no framing added by the transport.  This module finds the NAL units,
//! groups them into access units (one coded picture each) and reads the
//! coded resolution from the sequence parameter set.

pub mod annexb;
mod bits;
pub mod sps;

pub use annexb::{AccessUnit, AccessUnitAssembler, NalUnitType};
pub use sps::{SequenceParameterSet, SpsError};
