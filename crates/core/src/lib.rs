//! Protocol core for the DVR bridge.
//!
//! Covers the three tightly-coupled subsystems where the real protocol
//! engineering lives: the login [`cipher`], the [`wire`] codec, the
//! [`media`] frame extractor, and the [`session`] state machine built on
//! top of all three. Supervisor, recorder, and HTTP layers live in the
//! workspace's root binary crate and build on this one.

pub mod cipher;
pub mod error;
pub mod media;
pub mod session;
pub mod wire;

pub use error::{Error, Result};
