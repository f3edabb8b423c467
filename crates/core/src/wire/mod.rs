//! Binary header + XML body wire format (C2).
//!
//! A message on either channel is a fixed 36-byte header followed by a
//! body whose length the header carries. On the command channel the body
//! is a NUL-terminated XML document; on the media channel it is raw
//! payload bytes consumed by [`crate::media`].

mod codec;
mod header;
mod xml;

pub use codec::{
    decode_command_header, decode_header, decode_media_header, encode_message, take_body,
    MIN_FRAME_LEN,
};
pub use header::{Header, CMD_MAGIC, HEADER_LEN, MEDIA_MAGIC, PROTOCOL_VERSION};
pub use xml::{parse_reply, Command, CommandId, XmlReply};
