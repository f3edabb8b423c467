//! The 36-byte fixed header shared by the command and media channels.

/// Magic value used on the command channel (`0x05011154`).
pub const CMD_MAGIC: u32 = 0x0501_1154;

/// Magic value used on the media channel (`0x05011150`).
pub const MEDIA_MAGIC: u32 = 0x0501_1150;

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 0x0000_1001;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 36;

/// The 36-byte header, big-endian on the wire.
///
/// Field names follow the spec's own placeholder numbering (`field3`,
/// `field5`..`field8`) where no more specific meaning is pinned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// `CMD_MAGIC` or `MEDIA_MAGIC`.
    pub magic: u32,
    /// Always [`PROTOCOL_VERSION`].
    pub version: u32,
    /// Monotonic per-connection transaction id (offset 0x08).
    pub txn_id: u32,
    /// Payload byte count on inbound media frames; 0 on the command
    /// channel.
    pub field3: u32,
    /// Body length in bytes, including the XML body's trailing NUL.
    pub body_len: u32,
    /// Observed constant `3` on command-channel traffic.
    pub field5: u32,
    pub field6: u32,
    pub field7: u32,
    /// `0` for ordinary commands; the media session id on the media
    /// handshake frame.
    pub field8: u32,
}

impl Header {
    /// A command-channel header for a body of `body_len` bytes.
    pub fn command(txn_id: u32, body_len: u32) -> Self {
        Header {
            magic: CMD_MAGIC,
            version: PROTOCOL_VERSION,
            txn_id,
            field3: 0,
            body_len,
            field5: 3,
            field6: 0,
            field7: 0,
            field8: 0,
        }
    }

    /// The empty-body header sent to open the media channel handshake,
    /// carrying the media session id in `field8`.
    pub fn media_handshake(media_session: u32) -> Self {
        Header {
            magic: MEDIA_MAGIC,
            version: PROTOCOL_VERSION,
            txn_id: 0,
            field3: 0,
            body_len: 0,
            field5: 3,
            field6: 0,
            field7: 0,
            field8: media_session,
        }
    }

    pub fn is_command(&self) -> bool {
        self.magic == CMD_MAGIC
    }

    pub fn is_media(&self) -> bool {
        self.magic == MEDIA_MAGIC
    }

    /// Writes the header to its 36-byte big-endian wire form.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..12].copy_from_slice(&self.txn_id.to_be_bytes());
        buf[12..16].copy_from_slice(&self.field3.to_be_bytes());
        buf[16..20].copy_from_slice(&self.body_len.to_be_bytes());
        buf[20..24].copy_from_slice(&self.field5.to_be_bytes());
        buf[24..28].copy_from_slice(&self.field6.to_be_bytes());
        buf[28..32].copy_from_slice(&self.field7.to_be_bytes());
        buf[32..36].copy_from_slice(&self.field8.to_be_bytes());
        buf
    }

    /// Parses a 36-byte big-endian buffer. Callers are expected to have
    /// already validated `buf.len() == HEADER_LEN`.
    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        let f = |r: std::ops::Range<usize>| u32::from_be_bytes(buf[r].try_into().unwrap());
        Header {
            magic: f(0..4),
            version: f(4..8),
            txn_id: f(8..12),
            field3: f(12..16),
            body_len: f(16..20),
            field5: f(20..24),
            field6: f(24..28),
            field7: f(28..32),
            field8: f(32..36),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header::command(7, 42);
        let bytes = h.to_bytes();
        assert_eq!(Header::from_bytes(&bytes), h);
    }

    #[test]
    fn command_header_has_expected_constants() {
        let h = Header::command(1, 0);
        assert_eq!(h.magic, CMD_MAGIC);
        assert_eq!(h.version, PROTOCOL_VERSION);
        assert_eq!(h.field5, 3);
        assert_eq!(h.field8, 0);
    }

    #[test]
    fn media_handshake_carries_session_in_field8() {
        let h = Header::media_handshake(0xdead_beef);
        assert!(h.is_media());
        assert_eq!(h.field8, 0xdead_beef);
        assert_eq!(h.body_len, 0);
    }
}
