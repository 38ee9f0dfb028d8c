//! Video infrastructure: the H.264 decoder behind the decoder seam.

pub mod annexb_decoder;

pub use annexb_decoder::{AnnexBDecoder, AnnexBDecoderFactory, AnnexBSettings};
