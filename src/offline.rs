//! Offline stanza storage.
//!
//! Stanzas for an existing but fully offline user are parked here and
//! flushed to the first resource that sends initial presence.

use dashmap::DashMap;
use jid::BareJid;
use tracing::debug;

use crate::stanza::Stanza;

pub trait OfflineStanzaStore: Send + Sync {
    fn store(&self, receiver: &BareJid, stanza: Stanza);
    /// Remove and return everything stored for a user, in arrival
    /// order.
    fn take(&self, receiver: &BareJid) -> Vec<Stanza>;
}

/// In-memory store, for tests and embedded setups.
#[derive(Debug, Default)]
pub struct MemoryOfflineStore {
    stanzas: DashMap<BareJid, Vec<Stanza>>,
}

impl MemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, receiver: &BareJid) -> usize {
        self.stanzas.get(receiver).map(|v| v.len()).unwrap_or(0)
    }
}

impl OfflineStanzaStore for MemoryOfflineStore {
    fn store(&self, receiver: &BareJid, stanza: Stanza) {
        debug!(receiver = %receiver, kind = stanza.name(), "storing stanza for offline receiver");
        self.stanzas.entry(receiver.clone()).or_default().push(stanza);
    }

    fn take(&self, receiver: &BareJid) -> Vec<Stanza> {
        self.stanzas
            .remove(receiver)
            .map(|(_, stanzas)| stanzas)
            .unwrap_or_default()
    }
}
