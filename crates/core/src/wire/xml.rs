//! Command XML bodies: envelope construction and tag/attribute extraction
//! of replies.
//!
//! Every command body is `<Command ID="N">...</Command>` wrapped in the
//! fixed XML declaration and a trailing NUL (§4.2.1). Replies are parsed
//! shallowly into root tag name + attribute map rather than per-command
//! serde structs: the session layer only ever needs to read a handful of
//! named attributes off a known root tag (`CmdReply`, `Channel`, ...),
//! and the mailbox files replies by that root tag name (§4.2.2).

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Command IDs used by the core (§4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    UserLogin,
    UserLoginReply,
    LoginGetFlag,
    LoginGetFlagReply,
    Logout,
    GetCfg,
    GetCfgReply,
    HeartBeatNotice,
    HeartBeatReply,
    RealStreamCreate,
    RealStreamCreateReply,
    RealStreamStart,
    RealStreamStartReply,
}

impl CommandId {
    pub fn as_u32(self) -> u32 {
        match self {
            CommandId::LoginGetFlag => 26,
            CommandId::LoginGetFlagReply => 27,
            CommandId::UserLogin => 24,
            CommandId::UserLoginReply => 25,
            CommandId::RealStreamCreate => 136,
            CommandId::RealStreamCreateReply => 137,
            CommandId::RealStreamStart => 138,
            CommandId::RealStreamStartReply => 139,
            CommandId::Logout => 28,
            CommandId::HeartBeatNotice => 78,
            CommandId::HeartBeatReply => 79,
            CommandId::GetCfg => 30,
            CommandId::GetCfgReply => 31,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            26 => CommandId::LoginGetFlag,
            27 => CommandId::LoginGetFlagReply,
            24 => CommandId::UserLogin,
            25 => CommandId::UserLoginReply,
            136 => CommandId::RealStreamCreate,
            137 => CommandId::RealStreamCreateReply,
            138 => CommandId::RealStreamStart,
            139 => CommandId::RealStreamStartReply,
            28 => CommandId::Logout,
            78 => CommandId::HeartBeatNotice,
            79 => CommandId::HeartBeatReply,
            30 => CommandId::GetCfg,
            31 => CommandId::GetCfgReply,
            _ => return None,
        })
    }
}

/// A command body ready to be wrapped into a full message by
/// [`crate::wire::encode_message`].
pub struct Command {
    pub id: CommandId,
    pub inner_xml: String,
}

impl Command {
    fn new(id: CommandId, inner_xml: impl Into<String>) -> Self {
        Command { id, inner_xml: inner_xml.into() }
    }

    pub fn login_get_flag() -> Self {
        Command::new(CommandId::LoginGetFlag, String::new())
    }

    pub fn user_login(username: &str, token: &str) -> Self {
        Command::new(
            CommandId::UserLogin,
            format!(r#"<UserName>{username}</UserName><LoginFlag>{token}</LoginFlag>"#),
        )
    }

    pub fn logout() -> Self {
        Command::new(CommandId::Logout, String::new())
    }

    pub fn real_stream_create(channel: u8, stream_type: u8) -> Self {
        Command::new(
            CommandId::RealStreamCreate,
            format!(r#"<Channel>{channel}</Channel><Mode>0</Mode><Type>{stream_type}</Type>"#),
        )
    }

    pub fn real_stream_start(channel: u8, media_session: u32) -> Self {
        Command::new(
            CommandId::RealStreamStart,
            format!(r#"<Channel>{channel}</Channel><MediaSession>{media_session}</MediaSession>"#),
        )
    }

    pub fn heartbeat_reply() -> Self {
        Command::new(CommandId::HeartBeatReply, String::new())
    }

    pub fn get_cfg(main_cmd: i32) -> Self {
        Command::new(CommandId::GetCfg, format!(r#"<MainCmd>{main_cmd}</MainCmd>"#))
    }

    /// Full `<?xml...?><Command ...>...</Command>\0` body, NUL included.
    pub fn to_body_bytes(&self) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="GB2312"?><Command ID="{}">{}</Command>"#,
            self.id.as_u32(),
            self.inner_xml
        );
        let mut bytes = xml.into_bytes();
        bytes.push(0);
        bytes
    }
}

/// A shallow view of a parsed reply: the root tag name plus its direct
/// attributes and direct child elements' text content (flattened one
/// level, which is all the core's replies need).
#[derive(Debug, Clone, Default)]
pub struct XmlReply {
    pub root_tag: String,
    pub attrs: HashMap<String, String>,
    pub children: HashMap<String, String>,
}

impl XmlReply {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&str> {
        self.children.get(name).map(String::as_str)
    }
}

/// Parses a NUL-terminated (or not) XML body into an [`XmlReply`].
/// Tolerant of the leading `<?xml?>` declaration and the outer
/// `<Command>` wrapper the DVR's own commands use, descending into the
/// Command's single child element if present.
pub fn parse_reply(body: &[u8]) -> Result<XmlReply> {
    let trimmed = match body.iter().position(|&b| b == 0) {
        Some(i) => &body[..i],
        None => body,
    };

    let mut reader = Reader::from_reader(trimmed);
    reader.trim_text(true);

    let mut stack: Vec<XmlReply> = Vec::new();
    let mut text_buf = String::new();
    let mut root: Option<XmlReply> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let mut node = XmlReply { root_tag: decode_name(&e), ..Default::default() };
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let val = attr.unescape_value().unwrap_or_default().into_owned();
                    node.attrs.insert(key, val);
                }
                stack.push(node);
                text_buf.clear();
            }
            Ok(Event::Text(t)) => {
                text_buf.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                if let Some(mut node) = stack.pop() {
                    if !text_buf.trim().is_empty() {
                        node.attrs.entry("#text".to_string()).or_insert_with(|| text_buf.trim().to_string());
                    }
                    text_buf.clear();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.insert(node.root_tag.clone(), node.attr("#text").unwrap_or_default().to_string());
                        for (k, v) in node.attrs.iter() {
                            parent.children.entry(format!("{}.{}", node.root_tag, k)).or_insert_with(|| v.clone());
                        }
                    } else {
                        root = Some(node);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::ProtocolError(format!("malformed xml body: {e}"))),
        }
    }

    root.ok_or_else(|| Error::ProtocolError("xml body had no root element".to_string()))
}

fn decode_name(e: &quick_xml::events::BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_round_trip() {
        for id in [
            CommandId::UserLogin,
            CommandId::UserLoginReply,
            CommandId::RealStreamCreate,
            CommandId::HeartBeatNotice,
            CommandId::GetCfg,
        ] {
            assert_eq!(CommandId::from_u32(id.as_u32()), Some(id));
        }
    }

    #[test]
    fn user_login_body_is_null_terminated() {
        let cmd = Command::user_login("admin", "deadbeef");
        let body = cmd.to_body_bytes();
        assert_eq!(*body.last().unwrap(), 0);
        let xml = String::from_utf8_lossy(&body[..body.len() - 1]);
        assert!(xml.contains(r#"ID="24""#));
        assert!(xml.contains("admin"));
    }

    #[test]
    fn parse_reply_reads_root_attribute() {
        let body = br#"<?xml version="1.0" encoding="GB2312"?><UserLoginReply CmdReply="0"></UserLoginReply>"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.root_tag, "UserLoginReply");
        assert_eq!(reply.attr("CmdReply"), Some("0"));
    }

    #[test]
    fn parse_reply_reads_nonzero_cmdreply() {
        let body = b"<UserLoginReply CmdReply=\"22\"></UserLoginReply>\0";
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.attr("CmdReply"), Some("22"));
    }

    #[test]
    fn parse_reply_reads_nested_flag() {
        let body = b"<LoginGetFlagReply><LoginFlag>1873207978</LoginFlag></LoginGetFlagReply>\0";
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.child("LoginFlag"), Some("1873207978"));
    }
}
