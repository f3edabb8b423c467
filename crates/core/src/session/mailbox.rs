//! Single-reader / multi-waiter reply dispatch for the command channel
//! (§4.2.2): one task reads framed messages and files them by root XML
//! tag; callers await a named tag with a timeout.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::wire::XmlReply;

/// Per-tag mailbox. Cloning is cheap (`Arc` around this type is held by
/// both the reader task and every caller).
#[derive(Default)]
pub struct Mailbox {
    waiters: Mutex<HashMap<String, oneshot::Sender<XmlReply>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox::default()
    }

    /// Registers interest in `tag` and waits up to `budget` for the
    /// reader task to deliver it.
    pub async fn await_tag(&self, tag: &str, budget: Duration) -> Result<XmlReply> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(tag.to_string(), tx);

        match timeout(budget, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.waiters.lock().unwrap().remove(tag);
                Err(Error::Timeout(format!("waiting for {tag}")))
            }
        }
    }

    /// Called by the reader task for every parsed reply whose tag is not
    /// a heartbeat notice. Replies with no registered waiter are logged
    /// and dropped — the spec promises per-tag FIFO, not that every
    /// reply has a reader.
    pub fn deliver(&self, reply: XmlReply) {
        let sender = self.waiters.lock().unwrap().remove(&reply.root_tag);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => log::debug!("no waiter registered for reply tag {:?}", reply.root_tag),
        }
    }

    /// Fails every outstanding waiter, e.g. when the connection closes.
    pub fn close_all(&self) {
        let mut waiters = self.waiters.lock().unwrap();
        for (_, tx) in waiters.drain() {
            drop(tx);
        }
    }
}
