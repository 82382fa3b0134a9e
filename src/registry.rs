//! Resource registry.
//!
//! Tracks which resources of which local users are bound, their
//! availability state and presence priority, and hands out session
//! handles to the router. All per-user mutation goes through the
//! DashMap entry for that user's bare JID, which serializes competing
//! updates for the same user without a global lock.

use std::sync::Arc;

use dashmap::DashMap;
use jid::{BareJid, FullJid, Jid};
use tracing::debug;

use crate::session::SessionContext;

/// Availability of a bound resource.
///
/// A resource that has requested its roster is "interested" and keeps
/// that property across later presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unavailable,
    Available,
    AvailableInterested,
}

impl ResourceState {
    pub fn is_available(self) -> bool {
        matches!(
            self,
            ResourceState::Available | ResourceState::AvailableInterested
        )
    }

    pub fn is_interested(self) -> bool {
        matches!(self, ResourceState::AvailableInterested)
    }

    /// The state after an available presence, preserving interest.
    pub fn into_available(self) -> Self {
        match self {
            ResourceState::AvailableInterested => ResourceState::AvailableInterested,
            _ => ResourceState::Available,
        }
    }
}

struct ResourceBinding {
    resource: String,
    priority: i8,
    state: ResourceState,
    session: Arc<SessionContext>,
}

/// Registry of all bound resources, keyed by bare JID.
#[derive(Default)]
pub struct ResourceRegistry {
    bindings: DashMap<BareJid, Vec<ResourceBinding>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session under its full JID. A prior binding for the same
    /// resource is replaced.
    pub fn bind(&self, session: Arc<SessionContext>) {
        let bare = session.bare();
        let resource = session.resource().to_owned();
        let mut entry = self.bindings.entry(bare).or_default();
        entry.retain(|b| b.resource != resource);
        entry.push(ResourceBinding {
            resource,
            priority: 0,
            state: ResourceState::Unavailable,
            session,
        });
    }

    /// Drop the binding for a full JID, if any.
    pub fn unbind(&self, jid: &FullJid) -> bool {
        let bare = jid.to_bare();
        let resource = jid.resource().as_str();
        let removed = match self.bindings.get_mut(&bare) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|b| b.resource != resource);
                before != entry.len()
            }
            None => false,
        };
        self.bindings.remove_if(&bare, |_, bindings| bindings.is_empty());
        removed
    }

    /// Set the availability state of a bound resource. Returns whether
    /// the state actually changed, or `None` when the resource is not
    /// bound. The compare happens under the entry lock, so two racing
    /// identical transitions report the change exactly once.
    pub fn set_resource_state(&self, jid: &FullJid, state: ResourceState) -> Option<bool> {
        let mut entry = self.bindings.get_mut(&jid.to_bare())?;
        let binding = entry
            .iter_mut()
            .find(|b| b.resource == jid.resource().as_str())?;
        let changed = binding.state != state;
        binding.state = state;
        Some(changed)
    }

    pub fn resource_state(&self, jid: &FullJid) -> Option<ResourceState> {
        let entry = self.bindings.get(&jid.to_bare())?;
        entry
            .iter()
            .find(|b| b.resource == jid.resource().as_str())
            .map(|b| b.state)
    }

    pub fn set_priority(&self, jid: &FullJid, priority: i8) -> bool {
        let Some(mut entry) = self.bindings.get_mut(&jid.to_bare()) else {
            return false;
        };
        match entry
            .iter_mut()
            .find(|b| b.resource == jid.resource().as_str())
        {
            Some(binding) => {
                binding.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Mark a resource as having requested its roster.
    pub fn mark_interested(&self, jid: &FullJid) -> bool {
        let Some(mut entry) = self.bindings.get_mut(&jid.to_bare()) else {
            return false;
        };
        match entry
            .iter_mut()
            .find(|b| b.resource == jid.resource().as_str())
        {
            Some(binding) => {
                binding.state = ResourceState::AvailableInterested;
                true
            }
            None => false,
        }
    }

    /// Session bound exactly under this full JID, if still live.
    pub fn session_for(&self, jid: &FullJid) -> Option<Arc<SessionContext>> {
        let entry = self.bindings.get(&jid.to_bare())?;
        entry
            .iter()
            .find(|b| b.resource == jid.resource().as_str() && b.session.is_live())
            .map(|b| Arc::clone(&b.session))
    }

    /// All live sessions of a user, regardless of priority or state.
    pub fn sessions_for_bare(&self, bare: &BareJid) -> Vec<Arc<SessionContext>> {
        self.bindings
            .get(bare)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|b| b.session.is_live())
                    .map(|b| Arc::clone(&b.session))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All live sessions of a user with priority at or above the
    /// threshold.
    pub fn sessions_above(&self, bare: &BareJid, threshold: i8) -> Vec<Arc<SessionContext>> {
        self.bindings
            .get(bare)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|b| b.session.is_live() && b.priority >= threshold)
                    .map(|b| Arc::clone(&b.session))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The best delivery targets for a receiver.
    ///
    /// A full JID names one specific resource; the caller asked for it,
    /// so the priority threshold does not apply. A bare JID selects all
    /// resources sharing the highest priority at or above the
    /// threshold, which can be more than one.
    pub fn best_sessions(&self, receiver: &Jid, threshold: i8) -> Vec<Arc<SessionContext>> {
        match receiver.clone().try_into_full() {
            Ok(full) => self.session_for(&full).into_iter().collect(),
            Err(bare) => {
                let Some(entry) = self.bindings.get(&bare) else {
                    return Vec::new();
                };
                let best = entry
                    .iter()
                    .filter(|b| b.session.is_live() && b.priority >= threshold)
                    .map(|b| b.priority)
                    .max();
                match best {
                    Some(priority) => entry
                        .iter()
                        .filter(|b| b.session.is_live() && b.priority == priority)
                        .map(|b| Arc::clone(&b.session))
                        .collect(),
                    None => Vec::new(),
                }
            }
        }
    }

    /// Full JIDs of all available resources of a user.
    pub fn available_resources(&self, bare: &BareJid) -> Vec<FullJid> {
        self.resources_where(bare, |state| state.is_available())
    }

    /// Full JIDs of all resources that have requested their roster.
    pub fn interested_resources(&self, bare: &BareJid) -> Vec<FullJid> {
        self.resources_where(bare, |state| state.is_interested())
    }

    fn resources_where(
        &self,
        bare: &BareJid,
        predicate: impl Fn(ResourceState) -> bool,
    ) -> Vec<FullJid> {
        self.bindings
            .get(bare)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|b| b.session.is_live() && predicate(b.state))
                    .map(|b| b.session.jid().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bound_resources(&self, bare: &BareJid) -> Vec<String> {
        self.bindings
            .get(bare)
            .map(|entry| entry.iter().map(|b| b.resource.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop bindings whose connection task has gone away. Returns the
    /// number of bindings removed.
    pub fn cleanup_stale(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.bindings.iter_mut() {
            let before = entry.len();
            entry.retain(|b| b.session.is_live());
            removed += before - entry.len();
        }
        self.bindings.retain(|_, bindings| !bindings.is_empty());
        if removed > 0 {
            debug!(removed, "removed stale resource bindings");
        }
        removed
    }
}
