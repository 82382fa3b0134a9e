//! Roster storage backends.

use async_trait::async_trait;
use dashmap::DashMap;
use jid::BareJid;

use super::{RosterItem, RosterStore};
use crate::error::XmppError;

/// In-memory roster store, for tests and embedded setups.
///
/// Items are keyed by owner; each owner holds at most one item per
/// contact.
#[derive(Debug, Default)]
pub struct MemoryRosterStore {
    rosters: DashMap<BareJid, Vec<RosterItem>>,
}

impl MemoryRosterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RosterStore for MemoryRosterStore {
    async fn get(
        &self,
        owner: &BareJid,
        contact: &BareJid,
    ) -> Result<Option<RosterItem>, XmppError> {
        Ok(self.rosters.get(owner).and_then(|items| {
            items.iter().find(|item| &item.jid == contact).cloned()
        }))
    }

    async fn put(&self, owner: &BareJid, item: RosterItem) -> Result<(), XmppError> {
        let mut items = self.rosters.entry(owner.clone()).or_default();
        match items.iter_mut().find(|existing| existing.jid == item.jid) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Ok(())
    }

    async fn remove(&self, owner: &BareJid, contact: &BareJid) -> Result<bool, XmppError> {
        let Some(mut items) = self.rosters.get_mut(owner) else {
            return Ok(false);
        };
        let before = items.len();
        items.retain(|item| &item.jid != contact);
        Ok(before != items.len())
    }

    async fn items(&self, owner: &BareJid) -> Result<Vec<RosterItem>, XmppError> {
        Ok(self
            .rosters
            .get(owner)
            .map(|items| items.clone())
            .unwrap_or_default())
    }
}
