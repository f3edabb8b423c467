//! The session state machine enum (§4.2.2). `Connection` drives these
//! transitions internally; callers only see the public operations in
//! [`super::connection`].

/// Where a [`super::Connection`] sits in the login/stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    CmdOpen,
    WaitFlag,
    HaveNonce,
    WaitLogin,
    LoggedIn,
    WaitSession,
    HaveSession,
    MediaHandshake,
    MediaReady,
    WaitStart,
    Streaming,
    Closing,
}

impl State {
    /// True once `UserLoginReply(CmdReply=0)` has been observed; no
    /// command besides `LoginGetFlag` may be sent before this.
    pub fn is_logged_in_or_later(self) -> bool {
        !matches!(
            self,
            State::Disconnected | State::CmdOpen | State::WaitFlag | State::HaveNonce | State::WaitLogin
        )
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, State::Streaming)
    }
}
