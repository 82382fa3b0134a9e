//! Session handles for locally connected resources.
//!
//! A `SessionContext` is the relay-facing view of one authenticated
//! client connection: the bound full JID, the outbound channel the
//! connection task reads from, and the per-session bookkeeping the
//! presence handlers need.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use jid::{BareJid, FullJid, Jid};
use tokio::sync::mpsc;
use tracing::debug;

use crate::stanza::Stanza;

/// Outcome of a non-blocking write to a session's outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// The channel is full; the connection is not keeping up.
    ChannelFull,
    /// The connection task has gone away.
    ChannelClosed,
}

/// One bound resource of a local user.
pub struct SessionContext {
    jid: FullJid,
    sender: mpsc::Sender<Stanza>,
    authenticated: AtomicBool,
    sequence: AtomicU64,
    directed_presence: DirectedPresenceSet,
}

impl SessionContext {
    pub fn new(jid: FullJid, sender: mpsc::Sender<Stanza>) -> Arc<Self> {
        Arc::new(Self {
            jid,
            sender,
            authenticated: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            directed_presence: DirectedPresenceSet::new(),
        })
    }

    pub fn jid(&self) -> &FullJid {
        &self.jid
    }

    pub fn bare(&self) -> BareJid {
        self.jid.to_bare()
    }

    pub fn resource(&self) -> &str {
        self.jid.resource().as_str()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    /// The connection task is still holding its receiver.
    pub fn is_live(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Monotonic per-session counter, used for roster push ids.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn directed_presence(&self) -> &DirectedPresenceSet {
        &self.directed_presence
    }

    /// Queue a stanza for the connection without blocking.
    pub fn write(&self, stanza: Stanza) -> SendResult {
        match self.sender.try_send(stanza) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(jid = %self.jid, "session channel full, dropping stanza");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(jid = %self.jid, "session channel closed");
                SendResult::ChannelClosed
            }
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("jid", &self.jid)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Entities this session has sent directed presence to.
///
/// Targets recorded here receive unavailable presence when the session
/// goes unavailable, even if no roster subscription links them.
#[derive(Debug, Default)]
pub struct DirectedPresenceSet {
    targets: DashSet<Jid>,
}

impl DirectedPresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, target: Jid) {
        self.targets.insert(target);
    }

    pub fn remove(&self, target: &Jid) {
        self.targets.remove(target);
    }

    pub fn contains(&self, target: &Jid) -> bool {
        self.targets.contains(target)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Take all recorded targets, leaving the set empty.
    pub fn drain(&self) -> Vec<Jid> {
        let targets: Vec<Jid> = self.targets.iter().map(|t| t.clone()).collect();
        self.targets.clear();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use xmpp_parsers::message::Message;

    fn session(jid: &str, capacity: usize) -> (Arc<SessionContext>, mpsc::Receiver<Stanza>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = SessionContext::new(FullJid::from_str(jid).unwrap(), tx);
        (session, rx)
    }

    #[tokio::test]
    async fn write_reports_full_and_closed_channels() {
        let (session, mut rx) = session("alice@example.org/desk", 1);

        assert_eq!(
            session.write(Stanza::Message(Message::new(None))),
            SendResult::Sent
        );
        assert_eq!(
            session.write(Stanza::Message(Message::new(None))),
            SendResult::ChannelFull
        );

        rx.recv().await.unwrap();
        rx.close();
        drop(rx);
        assert_eq!(
            session.write(Stanza::Message(Message::new(None))),
            SendResult::ChannelClosed
        );
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn directed_presence_drain_empties_the_set() {
        let (session, _rx) = session("alice@example.org/desk", 4);
        let target = Jid::from_str("stranger@other.org/home").unwrap();

        session.directed_presence().record(target.clone());
        assert!(session.directed_presence().contains(&target));

        let drained = session.directed_presence().drain();
        assert_eq!(drained, vec![target]);
        assert!(session.directed_presence().is_empty());
    }

    #[test]
    fn sequence_is_monotonic() {
        let (tx, _rx) = mpsc::channel(1);
        let session = SessionContext::new(FullJid::from_str("a@b.org/r").unwrap(), tx);
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
    }
}
