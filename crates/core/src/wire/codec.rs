//! Combines a [`Header`] with its body into the bytes written to a
//! socket, and parses a header back out of a read buffer.
//!
//! Header parsing uses `nom` the way the protocol core it's grounded on
//! does: a small combinator per fixed-width field, composed with `tuple`.
//! The body is handed back as a length-delimited slice for the caller
//! (command-channel XML or media-channel payload) to interpret.

use nom::bytes::streaming::{tag, take};
use nom::number::streaming::be_u32;
use nom::sequence::tuple;
use nom::IResult;

use super::header::{Header, CMD_MAGIC, HEADER_LEN, MEDIA_MAGIC};

/// Smallest number of bytes [`decode_header`] needs before it can return
/// anything but `Incomplete`.
pub const MIN_FRAME_LEN: usize = HEADER_LEN;

fn header_fields(input: &[u8]) -> IResult<&[u8], (u32, u32, u32, u32, u32, u32, u32, u32, u32)> {
    tuple((be_u32, be_u32, be_u32, be_u32, be_u32, be_u32, be_u32, be_u32, be_u32))(input)
}

/// Parses a header from `input`, accepting either channel's magic.
/// Returns the header and the remaining (body + trailing) bytes.
pub fn decode_header(input: &[u8]) -> IResult<&[u8], Header> {
    let (rest, (magic, version, txn_id, field3, body_len, field5, field6, field7, field8)) =
        header_fields(input)?;
    Ok((
        rest,
        Header { magic, version, txn_id, field3, body_len, field5, field6, field7, field8 },
    ))
}

/// Parses a header whose magic must match the command channel's.
pub fn decode_command_header(input: &[u8]) -> IResult<&[u8], Header> {
    let (rest, _) = tag(CMD_MAGIC.to_be_bytes())(input)?;
    let (rest, header) = decode_header_after_magic(rest, CMD_MAGIC)?;
    Ok((rest, header))
}

/// Parses a header whose magic must match the media channel's.
pub fn decode_media_header(input: &[u8]) -> IResult<&[u8], Header> {
    let (rest, _) = tag(MEDIA_MAGIC.to_be_bytes())(input)?;
    let (rest, header) = decode_header_after_magic(rest, MEDIA_MAGIC)?;
    Ok((rest, header))
}

fn decode_header_after_magic(input: &[u8], magic: u32) -> IResult<&[u8], Header> {
    let (rest, (version, txn_id, field3, body_len, field5, field6, field7, field8)) =
        tuple((be_u32, be_u32, be_u32, be_u32, be_u32, be_u32, be_u32, be_u32))(input)?;
    Ok((
        rest,
        Header { magic, version, txn_id, field3, body_len, field5, field6, field7, field8 },
    ))
}

/// Consumes exactly `len` bytes as a body slice once a header has been
/// parsed and its length field read.
pub fn take_body(input: &[u8], len: u32) -> IResult<&[u8], &[u8]> {
    take(len as usize)(input)
}

/// Serializes a header + body into a single buffer ready to write to a
/// socket.
pub fn encode_message(header: Header, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::header::Header;

    #[test]
    fn decode_command_header_round_trips_with_encode() {
        let header = Header::command(5, 11);
        let body = b"<Foo/>\0";
        let msg = encode_message(header, body);

        let (rest, parsed) = decode_command_header(&msg).unwrap();
        assert_eq!(parsed, header);
        let (rest, parsed_body) = take_body(rest, parsed.body_len).unwrap();
        assert_eq!(parsed_body, body);
        assert!(rest.is_empty());
    }

    #[test]
    fn decode_media_header_rejects_command_magic() {
        let header = Header::command(1, 0);
        let msg = encode_message(header, &[]);
        assert!(decode_media_header(&msg).is_err());
    }

    #[test]
    fn decode_header_is_incomplete_on_short_input() {
        let res = decode_header(&[0u8; 10]);
        assert!(matches!(res, Err(nom::Err::Incomplete(_))));
    }
}
