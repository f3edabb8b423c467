//! Media-channel frame extraction (C3): turns
//! `[36-byte header][44-byte sub-header][payload]` frames into a clean
//! H.264 elementary byte stream.

mod extractor;
mod frame;

pub use extractor::{extract_nal_slice, Extractor};
pub use frame::{CodecTag, SubHeader, SUB_HEADER_LEN};
