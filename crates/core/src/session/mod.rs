//! The DVR session state machine (C4): login, stream open, frame
//! reading, teardown, and config fetch, with an inline heartbeat
//! watchdog and a single-reader reply mailbox.

mod connection;
mod heartbeat;
mod mailbox;
mod state;

pub use connection::{Connection, MediaStream};
pub use state::State;
