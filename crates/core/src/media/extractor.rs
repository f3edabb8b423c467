//! Scans a raw media payload for the first standard H.264 start code
//! and drives resync over the underlying media-channel socket.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::wire::{decode_media_header, Header, HEADER_LEN, MEDIA_MAGIC};

use super::frame::{SubHeader, SUB_HEADER_LEN};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const VENDOR_NAL_TYPES: [u8; 2] = [0xC6, 0xC7];

/// Scans `payload` for the first 4-byte `00 00 00 01` start code whose
/// following byte is not a vendor NAL type (§4.2.3). Returns the slice
/// from that start code to the end of the payload, or `None` if no
/// qualifying start code exists (the frame is dropped).
pub fn extract_nal_slice(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() < 5 {
        return None;
    }
    let mut i = 0;
    while i + 5 <= payload.len() {
        if payload[i..i + 4] == START_CODE && !VENDOR_NAL_TYPES.contains(&payload[i + 4]) {
            return Some(&payload[i..]);
        }
        i += 1;
    }
    None
}

/// Drives the media channel's read loop: header, sub-header, payload,
/// extraction, and resync-on-desync.
pub struct Extractor<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> Extractor<R> {
    pub fn new(reader: R) -> Self {
        Extractor { reader }
    }

    /// Reads and returns the next complete H.264 NAL slice, or `Ok(None)`
    /// if the stream ended cleanly between frames. Desynchronization
    /// (bad magic, a negative/implausible length) triggers a resync scan
    /// rather than an error.
    pub async fn next_nal(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let header = match self.read_header_with_resync().await? {
                Some(h) => h,
                None => return Ok(None),
            };

            // field3 carries the payload byte count on the media channel;
            // an implausible value is a desync signal, not a fatal error.
            const MAX_PLAUSIBLE_PAYLOAD: u32 = 16 * 1024 * 1024;
            if header.field3 == 0 || header.field3 > MAX_PLAUSIBLE_PAYLOAD {
                log::warn!("media frame claims implausible length {}, resyncing", header.field3);
                continue;
            }
            if (header.field3 as usize) < SUB_HEADER_LEN {
                log::warn!("media frame shorter than sub-header, resyncing");
                self.discard(header.field3 as usize).await?;
                continue;
            }

            let mut sub_buf = [0u8; SUB_HEADER_LEN];
            if self.reader.read_exact(&mut sub_buf).await.is_err() {
                return Err(Error::MediaReadError("short read on sub-header".to_string()));
            }
            let sub = SubHeader::parse(&sub_buf);

            let payload_len = header.field3 as usize - SUB_HEADER_LEN;
            let mut payload = vec![0u8; payload_len];
            if self.reader.read_exact(&mut payload).await.is_err() {
                return Err(Error::MediaReadError("short read on payload".to_string()));
            }

            log::trace!(
                "media frame: codec={:?} ts={} ctr={} payload_len={}",
                sub.codec,
                sub.timestamp,
                sub.frame_counter,
                payload_len
            );

            match extract_nal_slice(&payload) {
                Some(nal) => return Ok(Some(nal.to_vec())),
                None => {
                    log::warn!("no qualifying H.264 start code in payload, dropping frame");
                    continue;
                }
            }
        }
    }

    async fn discard(&mut self, n: usize) -> Result<()> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).await.map(|_| ()).map_err(Error::Io)
    }

    /// Reads a 36-byte header, resyncing on magic mismatch or EOF-before-
    /// header by scanning byte-at-a-time for the next media magic.
    async fn read_header_with_resync(&mut self) -> Result<Option<Header>> {
        let mut buf = [0u8; HEADER_LEN];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }

        match decode_media_header(&buf) {
            Ok((_, header)) => Ok(Some(header)),
            Err(_) => {
                log::warn!("media header magic mismatch, scanning for resync");
                self.scan_for_magic(&buf).await
            }
        }
    }

    /// Slides a 4-byte window forward one byte at a time (refilling from
    /// the socket) until the media magic is found, then reads the
    /// remaining 32 header bytes.
    async fn scan_for_magic(&mut self, seed: &[u8; HEADER_LEN]) -> Result<Option<Header>> {
        let magic = MEDIA_MAGIC.to_be_bytes();
        let mut window: Vec<u8> = seed.to_vec();

        loop {
            if let Some(pos) = find_subslice(&window, &magic) {
                let mut rest = window[pos + 4..].to_vec();
                while rest.len() < HEADER_LEN - 4 {
                    let mut byte = [0u8; 1];
                    match self.reader.read_exact(&mut byte).await {
                        Ok(_) => rest.push(byte[0]),
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
                let mut full = [0u8; HEADER_LEN];
                full[0..4].copy_from_slice(&magic);
                full[4..].copy_from_slice(&rest[..HEADER_LEN - 4]);
                return match decode_media_header(&full) {
                    Ok((_, header)) => Ok(Some(header)),
                    Err(_) => Box::pin(self.scan_for_magic(&full)).await,
                };
            }

            let mut byte = [0u8; 1];
            match self.reader.read_exact(&mut byte).await {
                Ok(_) => {
                    window.push(byte[0]);
                    if window.len() > 4096 {
                        window.drain(0..window.len() - 4);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8; 4]) -> Option<usize> {
    haystack.windows(4).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_standard_start_code_after_vendor_nal() {
        let mut payload = vec![0u8; 22];
        payload[0..4].copy_from_slice(&START_CODE);
        payload[4] = 0xC6;
        payload.extend_from_slice(&START_CODE);
        payload.push(0x67); // SPS NAL type, not a vendor prefix
        payload.extend_from_slice(&[1, 2, 3]);

        let found = extract_nal_slice(&payload).unwrap();
        assert_eq!(&found[0..4], &START_CODE);
        assert_eq!(found[4], 0x67);
        assert_eq!(found.len(), payload.len() - 22);
    }

    #[test]
    fn drops_frame_with_no_qualifying_start_code() {
        let payload = vec![0x00, 0x00, 0x00, 0x01, 0xC6, 0x00, 0x00, 0x00, 0x01, 0xC7];
        assert!(extract_nal_slice(&payload).is_none());
    }

    #[test]
    fn handles_start_code_at_offset_zero() {
        let mut payload = START_CODE.to_vec();
        payload.push(0x67);
        payload.extend_from_slice(&[9, 9]);
        let found = extract_nal_slice(&payload).unwrap();
        assert_eq!(found, &payload[..]);
    }

    #[tokio::test]
    async fn extractor_resyncs_after_garbage() {
        let mut stream = Vec::new();
        // 256 bytes of garbage the spec requires recovery from.
        stream.extend_from_slice(&[0xAA; 256]);

        let sub_header = [0u8; SUB_HEADER_LEN];
        let mut payload = vec![0u8; 22];
        payload[0..4].copy_from_slice(&START_CODE);
        payload[4] = 0xC6;
        payload.extend_from_slice(&START_CODE);
        payload.push(0x67);
        payload.extend_from_slice(&[0xAB, 0xCD]);

        let header = Header::media_handshake(0);
        let mut header = header;
        header.field3 = (SUB_HEADER_LEN + payload.len()) as u32;
        stream.extend_from_slice(&header.to_bytes());
        stream.extend_from_slice(&sub_header);
        stream.extend_from_slice(&payload);

        let cursor = std::io::Cursor::new(stream);
        let mut extractor = Extractor::new(cursor);
        let nal = extractor.next_nal().await.unwrap().unwrap();
        assert_eq!(&nal[0..4], &START_CODE);
        assert_eq!(nal[4], 0x67);

        assert!(extractor.next_nal().await.unwrap().is_none());
    }
}
