//! Error taxonomy for the protocol core.
//!
//! Mirrors the failure modes a DVR session can hit (§7 of the spec): dial
//! failures and timeouts are retriable by a caller, `AuthFailed` and
//! `ProtocolError` are fatal to the session that raised them.

use std::sync::Arc;

/// Result alias used throughout `dvrgate_core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cipher, wire codec, frame extractor, and session
/// state machine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP connect to the command or media channel failed.
    #[error("failed to connect to {addr}: {source}")]
    DialFailed {
        /// Host:port that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `UserLoginReply` carried a non-zero `CmdReply`.
    #[error("login rejected by DVR (CmdReply={code})")]
    AuthFailed {
        /// The `CmdReply` value the DVR returned.
        code: String,
    },

    /// Malformed header/body or an unexpected tag where a specific reply
    /// was required.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A reply-await or heartbeat-gap timeout elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The media channel could not be read (socket error, desync beyond
    /// recovery, or the channel was closed).
    #[error("media channel read error: {0}")]
    MediaReadError(String),

    /// DVR refused `RealStreamCreate`.
    #[error("DVR refused to create stream for channel {channel}: {detail}")]
    StreamCreateFailed {
        /// Channel that was requested.
        channel: u8,
        /// Human-readable detail from the reply, if any.
        detail: String,
    },

    /// DVR refused `RealStreamStart`.
    #[error("DVR refused to start stream for channel {channel}: {detail}")]
    StreamStartFailed {
        /// Channel that was requested.
        channel: u8,
        /// Human-readable detail from the reply, if any.
        detail: String,
    },

    /// No command-channel bytes were received within the heartbeat gap.
    #[error("no traffic from DVR in over 60s, heartbeat timed out")]
    HeartbeatTimeout,

    /// A command was issued outside the login sequence.
    #[error("not logged in")]
    NotLoggedIn,

    /// The command-channel socket was closed while a caller awaited a
    /// reply.
    #[error("command channel closed")]
    ConnectionClosed,

    /// Wrapped I/O error not otherwise classified above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// XML body failed to parse or serialize.
    #[error("xml error: {0}")]
    Xml(Arc<quick_xml::de::DeError>),
}

impl From<quick_xml::de::DeError> for Error {
    fn from(e: quick_xml::de::DeError) -> Self {
        Error::Xml(Arc::new(e))
    }
}

impl Error {
    /// True for failures a caller should retry rather than give up on.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::DialFailed { .. }
                | Error::Timeout(_)
                | Error::StreamCreateFailed { .. }
                | Error::StreamStartFailed { .. }
                | Error::HeartbeatTimeout
                | Error::MediaReadError(_)
                | Error::ConnectionClosed
        )
    }
}
