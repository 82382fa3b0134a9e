//! Last-known presence per resource.
//!
//! The subscription handler replays these to newly approved contacts
//! and the availability handler answers probes from here without
//! involving the client.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jid::{BareJid, FullJid};
use xmpp_parsers::presence::Presence;

#[derive(Debug, Clone)]
struct CachedPresence {
    stanza: Presence,
    updated_at: DateTime<Utc>,
}

/// Cache of the latest available presence per full JID.
#[derive(Debug, Default)]
pub struct PresenceCache {
    entries: DashMap<FullJid, CachedPresence>,
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, jid: FullJid, stanza: Presence) {
        self.entries.insert(
            jid,
            CachedPresence {
                stanza,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, jid: &FullJid) -> Option<Presence> {
        self.entries.get(jid).map(|entry| entry.stanza.clone())
    }

    /// Most recently updated presence among all resources of a user.
    pub fn get_for_bare(&self, bare: &BareJid) -> Option<Presence> {
        self.entries
            .iter()
            .filter(|entry| &entry.key().to_bare() == bare)
            .max_by_key(|entry| entry.updated_at)
            .map(|entry| entry.stanza.clone())
    }

    pub fn remove(&self, jid: &FullJid) {
        self.entries.remove(jid);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use xmpp_parsers::presence::{Presence, Show, Type};

    fn full(s: &str) -> FullJid {
        FullJid::from_str(s).unwrap()
    }

    #[test]
    fn latest_resource_wins_for_bare_lookup() {
        let cache = PresenceCache::new();
        let bare = BareJid::from_str("alice@example.org").unwrap();

        let mut first = Presence::new(Type::None);
        first.show = Some(Show::Away);
        cache.put(full("alice@example.org/desk"), first);

        let mut second = Presence::new(Type::None);
        second.show = Some(Show::Chat);
        cache.put(full("alice@example.org/phone"), second);

        let latest = cache.get_for_bare(&bare).unwrap();
        assert_eq!(latest.show, Some(Show::Chat));
    }

    #[test]
    fn removal_clears_only_the_named_resource() {
        let cache = PresenceCache::new();
        cache.put(full("alice@example.org/desk"), Presence::new(Type::None));
        cache.put(full("alice@example.org/phone"), Presence::new(Type::None));

        cache.remove(&full("alice@example.org/desk"));
        assert!(cache.get(&full("alice@example.org/desk")).is_none());
        assert!(cache.get(&full("alice@example.org/phone")).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bare_lookup_misses_other_users() {
        let cache = PresenceCache::new();
        cache.put(full("alice@example.org/desk"), Presence::new(Type::None));

        let other = BareJid::from_str("bob@example.org").unwrap();
        assert!(cache.get_for_bare(&other).is_none());
    }
}
