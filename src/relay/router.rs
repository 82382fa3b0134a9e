//! Stanza routing.
//!
//! The router turns a receiver JID plus a stanza into writes on live
//! session channels, an offline-store handoff, or a set of recorded
//! delivery errors. It never blocks on slow receivers and never lets
//! one failing target abort delivery to the others.

use std::sync::Arc;

use jid::{BareJid, Jid};
use tracing::{debug, instrument, warn};
use xmpp_parsers::message::MessageType;
use xmpp_parsers::presence;

use crate::accounts::AccountManagement;
use crate::components::ComponentRegistry;
use crate::config::RelayConfig;
use crate::error::DeliveryError;
use crate::offline::OfflineStanzaStore;
use crate::registry::ResourceRegistry;
use crate::session::{SendResult, SessionContext};
use crate::stanza::Stanza;

/// Resources below this priority do not receive stanzas addressed to
/// the bare JID.
pub const PRIORITY_THRESHOLD: i8 = 0;

/// Accumulated outcome of one routing run.
#[derive(Debug, Default)]
pub struct RelayResult {
    processed: bool,
    errors: Vec<DeliveryError>,
}

impl RelayResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure(error: DeliveryError) -> Self {
        let mut result = Self::default();
        result.errors.push(error);
        result
    }

    fn mark_processed(&mut self) {
        self.processed = true;
    }

    fn record(&mut self, error: DeliveryError) {
        self.errors.push(error);
    }

    /// A delivery path ran to completion for at least one target.
    pub fn was_processed(&self) -> bool {
        self.processed
    }

    /// Every error recorded during the run, qualified successes
    /// included.
    pub fn errors(&self) -> &[DeliveryError] {
        &self.errors
    }

    /// Only the genuine failures.
    pub fn failures(&self) -> Vec<DeliveryError> {
        self.errors
            .iter()
            .filter(|e| e.is_failure())
            .cloned()
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.errors.iter().any(|e| e.is_failure())
    }
}

/// Routing core shared by all relay workers.
pub struct StanzaRouter {
    config: RelayConfig,
    registry: Arc<ResourceRegistry>,
    components: Arc<ComponentRegistry>,
    accounts: Arc<dyn AccountManagement>,
    offline: Option<Arc<dyn OfflineStanzaStore>>,
}

impl StanzaRouter {
    pub fn new(
        config: RelayConfig,
        registry: Arc<ResourceRegistry>,
        components: Arc<ComponentRegistry>,
        accounts: Arc<dyn AccountManagement>,
    ) -> Self {
        Self {
            config,
            registry,
            components,
            accounts,
            offline: None,
        }
    }

    pub fn with_offline_store(mut self, store: Arc<dyn OfflineStanzaStore>) -> Self {
        self.offline = Some(store);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Route one stanza to the given receiver.
    #[instrument(skip(self, stanza), fields(kind = stanza.name(), receiver = %receiver))]
    pub async fn route(&self, receiver: &Jid, stanza: &Stanza) -> RelayResult {
        let domain = receiver.domain().as_str();
        if !self.config.is_local_domain(domain) {
            return self.route_to_component(domain, stanza).await;
        }

        match receiver.clone().try_into_full() {
            Ok(full) => self.deliver_to_full(&Jid::from(full), stanza),
            Err(bare) => self.deliver_to_bare(&bare, stanza),
        }
    }

    async fn route_to_component(&self, domain: &str, stanza: &Stanza) -> RelayResult {
        if self.config.is_component_domain(domain) {
            if let Some(processor) = self.components.processor_for(domain) {
                debug!(%domain, "handing stanza to component");
                let mut result = RelayResult::new();
                match processor.process(stanza.clone()).await {
                    Ok(()) => result.mark_processed(),
                    Err(e) => result.record(e),
                }
                return result;
            }
        }
        RelayResult::failure(DeliveryError::ServiceNotAvailable(format!(
            "domain not served here: {}",
            domain
        )))
    }

    fn deliver_to_full(&self, receiver: &Jid, stanza: &Stanza) -> RelayResult {
        match stanza {
            Stanza::Message(m) => match m.type_ {
                MessageType::Chat | MessageType::Normal | MessageType::Headline => {
                    self.relay_to_best(receiver, stanza, true)
                }
                // Error replies go to the exact resource, never to another
                // one of the user's sessions.
                MessageType::Error => self.relay_to_best(receiver, stanza, false),
                MessageType::Groupchat => RelayResult::failure(
                    DeliveryError::ServiceNotAvailable(
                        "groupchat requires a conference service".into(),
                    ),
                ),
            },
            // Addressed to one specific resource; no bare fallback.
            Stanza::Presence(_) | Stanza::Iq(_) => self.relay_to_best(receiver, stanza, false),
        }
    }

    fn deliver_to_bare(&self, receiver: &BareJid, stanza: &Stanza) -> RelayResult {
        match stanza {
            Stanza::Presence(_) => self.relay_to_all(receiver, stanza, None),
            Stanza::Iq(_) => {
                self.relay_to_best(&Jid::from(receiver.clone()), stanza, false)
            }
            Stanza::Message(m) => match m.type_ {
                MessageType::Chat | MessageType::Normal => {
                    if self.config.deliver_to_highest_priority_only {
                        self.relay_to_best(&Jid::from(receiver.clone()), stanza, false)
                    } else {
                        self.relay_to_all(receiver, stanza, Some(PRIORITY_THRESHOLD))
                    }
                }
                MessageType::Headline => self.relay_to_all(receiver, stanza, None),
                MessageType::Error => {
                    debug!("dropping undeliverable error message");
                    RelayResult::new()
                }
                MessageType::Groupchat => RelayResult::failure(
                    DeliveryError::ServiceNotAvailable(
                        "groupchat requires a conference service".into(),
                    ),
                ),
            },
        }
    }

    /// Deliver to the highest-priority sessions for the receiver. When
    /// `bare_fallback` is set and the named resource is gone, retry
    /// against the bare JID before going to the offline path.
    fn relay_to_best(&self, receiver: &Jid, stanza: &Stanza, bare_fallback: bool) -> RelayResult {
        let mut sessions = self.registry.best_sessions(receiver, PRIORITY_THRESHOLD);
        if sessions.is_empty() && bare_fallback {
            if let Ok(full) = receiver.clone().try_into_full() {
                let bare = Jid::from(full.to_bare());
                debug!(receiver = %receiver, "resource gone, retrying against bare JID");
                sessions = self.registry.best_sessions(&bare, PRIORITY_THRESHOLD);
            }
        }
        if sessions.is_empty() {
            return self.deliver_offline(&receiver.to_bare(), stanza);
        }
        self.write_to_sessions(&sessions, stanza)
    }

    /// Deliver to every live session of the user, optionally gated by a
    /// priority threshold.
    fn relay_to_all(
        &self,
        receiver: &BareJid,
        stanza: &Stanza,
        threshold: Option<i8>,
    ) -> RelayResult {
        let sessions = match threshold {
            Some(t) => self.registry.sessions_above(receiver, t),
            None => self.registry.sessions_for_bare(receiver),
        };
        if sessions.is_empty() {
            return self.deliver_offline(receiver, stanza);
        }
        self.write_to_sessions(&sessions, stanza)
    }

    fn write_to_sessions(&self, sessions: &[Arc<SessionContext>], stanza: &Stanza) -> RelayResult {
        if sessions.len() > 1 {
            warn!(
                count = sessions.len(),
                kind = stanza.name(),
                "multiplexing stanza to several resources"
            );
        }
        let mut result = RelayResult::new();
        for session in sessions {
            if !session.is_authenticated() {
                result.record(DeliveryError::Delivery(format!(
                    "no relay to unauthenticated session {}",
                    session.jid()
                )));
                continue;
            }
            match session.write(stanza.clone()) {
                SendResult::Sent => {}
                SendResult::ChannelFull => result.record(DeliveryError::Delivery(format!(
                    "outbound channel full for {}",
                    session.jid()
                ))),
                SendResult::ChannelClosed => result.record(DeliveryError::Delivery(format!(
                    "outbound channel closed for {}",
                    session.jid()
                ))),
            }
        }
        result.mark_processed();
        result
    }

    fn deliver_offline(&self, receiver: &BareJid, stanza: &Stanza) -> RelayResult {
        if !self.accounts.account_exists(receiver) {
            warn!(receiver = %receiver, "cannot deliver, no such local user");
            return RelayResult::failure(DeliveryError::NoSuchLocalUser);
        }
        if let Some(store) = &self.offline {
            if offline_eligible(stanza) {
                store.store(receiver, stanza.clone());
                let mut result = RelayResult::new();
                result.record(DeliveryError::DeliveredToOfflineReceiver);
                result.mark_processed();
                return result;
            }
        }
        warn!(receiver = %receiver, kind = stanza.name(), "recipient offline, stanza not stored");
        RelayResult::failure(DeliveryError::LocalRecipientOffline)
    }
}

/// Stanzas worth keeping for a user who is entirely offline: ordinary
/// messages and the subscription handshake.
fn offline_eligible(stanza: &Stanza) -> bool {
    match stanza {
        Stanza::Message(m) => matches!(
            m.type_,
            MessageType::Chat | MessageType::Normal | MessageType::Headline
        ),
        Stanza::Presence(p) => matches!(
            p.type_,
            presence::Type::Subscribe
                | presence::Type::Subscribed
                | presence::Type::Unsubscribe
                | presence::Type::Unsubscribed
        ),
        Stanza::Iq(_) => false,
    }
}
