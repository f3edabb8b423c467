//! The 44-byte sub-header that precedes every media payload.

/// Sub-header length in bytes.
pub const SUB_HEADER_LEN: usize = 44;

/// Codec tag carried in the sub-header. Only H.264 is consulted by the
/// core; other values pass the tag through unconsulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecTag {
    H264,
    Other(u8),
}

impl From<u8> for CodecTag {
    fn from(v: u8) -> Self {
        match v {
            3 => CodecTag::H264,
            other => CodecTag::Other(other),
        }
    }
}

/// Parsed view of the 44-byte sub-header: timestamp, codec tag, frame
/// counter. Only the fields the core consults are broken out; the rest
/// of the buffer is kept verbatim for forwarding/debugging.
#[derive(Debug, Clone)]
pub struct SubHeader {
    pub timestamp: u32,
    pub codec: CodecTag,
    pub frame_counter: u32,
    raw: [u8; SUB_HEADER_LEN],
}

impl SubHeader {
    /// Parses a 44-byte sub-header. Layout beyond the three consulted
    /// fields (offsets 0, 4, 8) is unspecified and preserved as-is.
    pub fn parse(buf: &[u8; SUB_HEADER_LEN]) -> Self {
        let timestamp = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let codec = CodecTag::from(buf[4]);
        let frame_counter = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        SubHeader { timestamp, codec, frame_counter, raw: *buf }
    }

    pub fn raw(&self) -> &[u8; SUB_HEADER_LEN] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codec_tag_and_timestamp() {
        let mut buf = [0u8; SUB_HEADER_LEN];
        buf[0..4].copy_from_slice(&1_700_000_000u32.to_be_bytes());
        buf[4] = 3;
        let sub = SubHeader::parse(&buf);
        assert_eq!(sub.timestamp, 1_700_000_000);
        assert_eq!(sub.codec, CodecTag::H264);
    }

    #[test]
    fn unknown_codec_tag_is_preserved() {
        let mut buf = [0u8; SUB_HEADER_LEN];
        buf[4] = 9;
        assert_eq!(SubHeader::parse(&buf).codec, CodecTag::Other(9));
    }
}
