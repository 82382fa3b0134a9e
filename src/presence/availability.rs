//! Presence availability handling.
//!
//! Outbound available and unavailable presence updates the registry
//! and the presence cache, then fans out to subscribers and the user's
//! other resources. The first available presence of a session
//! additionally flushes stored offline stanzas and probes the user's
//! own subscriptions.

use std::sync::Arc;

use jid::Jid;
use tracing::{debug, info, instrument, warn};
use xmpp_parsers::presence::{self, Presence};

use super::{build_presence, is_subscription_type, readdress, StanzaDirection};
use crate::error::XmppError;
use crate::offline::OfflineStanzaStore;
use crate::presence_cache::PresenceCache;
use crate::registry::{ResourceRegistry, ResourceState};
use crate::relay::{IgnoreFailure, StanzaRelay};
use crate::roster::{self, RosterStore};
use crate::session::{SendResult, SessionContext};
use crate::stanza::Stanza;

pub struct PresenceAvailabilityHandler {
    registry: Arc<ResourceRegistry>,
    roster: Arc<dyn RosterStore>,
    cache: Arc<PresenceCache>,
    relay: Arc<StanzaRelay>,
    offline: Option<Arc<dyn OfflineStanzaStore>>,
}

impl PresenceAvailabilityHandler {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        roster: Arc<dyn RosterStore>,
        cache: Arc<PresenceCache>,
        relay: Arc<StanzaRelay>,
    ) -> Self {
        Self {
            registry,
            roster,
            cache,
            relay,
            offline: None,
        }
    }

    pub fn with_offline_store(mut self, store: Arc<dyn OfflineStanzaStore>) -> Self {
        self.offline = Some(store);
        self
    }

    /// Handle one availability presence for the given session.
    #[instrument(skip(self, session, stanza), fields(session = %session.jid(), presence_type = ?stanza.type_))]
    pub async fn handle(
        &self,
        direction: StanzaDirection,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        if is_subscription_type(&stanza.type_) {
            return Err(XmppError::protocol_violation(
                "subscription presence on the availability path",
            ));
        }
        match direction {
            StanzaDirection::Outbound => match stanza.type_ {
                presence::Type::None => self.outbound_available(session, stanza).await,
                presence::Type::Unavailable => self.outbound_unavailable(session, stanza).await,
                presence::Type::Probe => Err(XmppError::protocol_violation(
                    "clients must not send presence probes",
                )),
                _ => Err(XmppError::protocol_violation(
                    "clients must not send presence errors",
                )),
            },
            StanzaDirection::Inbound => match stanza.type_ {
                presence::Type::Probe => self.inbound_probe(stanza).await,
                _ => self.forward_to_session(session, stanza),
            },
        }
    }

    /// Inbound available, unavailable and error presence goes straight
    /// to the client.
    fn forward_to_session(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        if let Some(from) = &stanza.from {
            info!(contact = %from, presence_type = ?stanza.type_, "relaying contact presence to session");
        }
        if session.write(Stanza::Presence(stanza.clone())) != SendResult::Sent {
            warn!(session = %session.jid(), "failed to forward presence to session");
        }
        Ok(())
    }

    async fn outbound_available(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        if stanza.to.is_some() {
            return self.outbound_directed(session, stanza, false).await;
        }
        self.verify_sender(session, stanza)?;

        let user = session.jid().clone();
        let previous = self
            .registry
            .resource_state(&user)
            .ok_or_else(|| XmppError::internal("presence from an unbound resource"))?;
        let is_update = previous.is_available();

        let mut latest = stanza.clone();
        latest.from = Some(Jid::from(user.clone()));
        self.cache.put(user.clone(), latest.clone());
        self.registry
            .set_resource_state(&user, previous.into_available());
        self.registry.set_priority(&user, stanza.priority);

        let bare = user.to_bare();
        let items = self.roster.items(&bare).await?;

        if !is_update {
            info!(user = %user, "resource became available");
            match &self.offline {
                Some(store) => {
                    for stored in store.take(&bare) {
                        if session.write(stored) != SendResult::Sent {
                            warn!(user = %user, "failed to flush offline stanza");
                        }
                    }
                }
                None => debug!("no offline store configured, nothing to flush"),
            }
        }

        // Subscribers first, then the user's own available resources
        // (the sending one included).
        let mut receivers = roster::subscribers(&items);
        receivers.extend(
            self.registry
                .available_resources(&bare)
                .into_iter()
                .map(Jid::from),
        );
        for receiver in receivers {
            let broadcast = readdress(&latest, Jid::from(user.clone()), receiver.clone());
            if let Err(e) =
                self.relay
                    .relay(&receiver, Stanza::Presence(broadcast), Arc::new(IgnoreFailure))
            {
                warn!(receiver = %receiver, error = %e, "presence broadcast not relayed");
            }
        }

        // Initial presence asks every subscription for its state.
        if !is_update {
            for contact in roster::subscriptions(&items) {
                let probe = build_presence(
                    Jid::from(user.clone()),
                    contact.clone(),
                    presence::Type::Probe,
                );
                if let Err(e) =
                    self.relay
                        .relay(&contact, Stanza::Presence(probe), Arc::new(IgnoreFailure))
                {
                    warn!(contact = %contact, error = %e, "presence probe not relayed");
                }
            }
        }
        Ok(())
    }

    async fn outbound_unavailable(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        if stanza.to.is_some() {
            return self.outbound_directed(session, stanza, true).await;
        }
        self.verify_sender(session, stanza)?;

        let user = session.jid().clone();
        let changed = self
            .registry
            .set_resource_state(&user, ResourceState::Unavailable)
            .ok_or_else(|| XmppError::internal("presence from an unbound resource"))?;
        // Racing unavailable presences broadcast only once.
        if !changed {
            debug!(user = %user, "resource already unavailable");
            return Ok(());
        }
        info!(user = %user, "resource became unavailable");
        self.cache.remove(&user);

        let bare = user.to_bare();
        let items = self.roster.items(&bare).await?;

        let mut receivers = roster::subscribers(&items);
        receivers.extend(
            self.registry
                .available_resources(&bare)
                .into_iter()
                .filter(|resource| resource != &user)
                .map(Jid::from),
        );
        // Directed-presence targets get the farewell too, exactly once.
        for target in session.directed_presence().drain() {
            if !receivers.contains(&target) {
                receivers.push(target);
            }
        }
        for receiver in receivers {
            let farewell = readdress(stanza, Jid::from(user.clone()), receiver.clone());
            if let Err(e) =
                self.relay
                    .relay(&receiver, Stanza::Presence(farewell), Arc::new(IgnoreFailure))
            {
                warn!(receiver = %receiver, error = %e, "unavailable presence not relayed");
            }
        }
        Ok(())
    }

    /// Presence with an explicit receiver bypasses the broadcast and
    /// goes to that entity alone.
    async fn outbound_directed(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
        unavailable: bool,
    ) -> Result<(), XmppError> {
        let Some(target) = stanza.to.clone() else {
            return Err(XmppError::internal("directed presence without receiver"));
        };
        let user = session.jid().clone();

        if unavailable {
            session.directed_presence().remove(&target);
        } else {
            // Subscribers that already receive our broadcasts need no
            // extra farewell bookkeeping.
            let item = self
                .roster
                .get(&user.to_bare(), &target.to_bare())
                .await?;
            let target_is_subscriber = item
                .map(|i| i.subscription.includes_from())
                .unwrap_or(false);
            let broadcasting = self
                .registry
                .resource_state(&user)
                .map(|s| s.is_available())
                .unwrap_or(false);
            if !(target_is_subscriber && broadcasting) {
                session.directed_presence().record(target.clone());
            }
        }

        let stamped = readdress(stanza, Jid::from(user), target.clone());
        self.relay
            .relay(&target, Stanza::Presence(stamped), Arc::new(IgnoreFailure))?;
        Ok(())
    }

    /// Answer a probe on behalf of the probed user.
    async fn inbound_probe(&self, stanza: &Presence) -> Result<(), XmppError> {
        let Some(prober) = stanza.from.clone() else {
            return Err(XmppError::protocol_violation("probe without sender"));
        };
        let Some(probed) = stanza.to.clone() else {
            return Err(XmppError::protocol_violation("probe without receiver"));
        };
        let user_bare = probed.to_bare();

        let item = self.roster.get(&user_bare, &prober.to_bare()).await?;
        let subscribed = item
            .map(|i| i.subscription.includes_from())
            .unwrap_or(false);
        // Probes arrive from a specific resource; a bare sender gets the
        // same refusal as an unauthorized one.
        let from_full = prober.clone().try_into_full().is_ok();

        if !subscribed || !from_full {
            debug!(prober = %prober, probed = %user_bare, "probe from unauthorized entity");
            let reply = build_presence(
                Jid::from(user_bare),
                prober.clone(),
                presence::Type::Unsubscribed,
            );
            self.relay
                .relay(&prober, Stanza::Presence(reply), Arc::new(IgnoreFailure))?;
            return Ok(());
        }

        match self.cache.get_for_bare(&user_bare) {
            Some(latest) => {
                let from = latest
                    .from
                    .clone()
                    .unwrap_or_else(|| Jid::from(user_bare.clone()));
                let reply = readdress(&latest, from, prober.clone());
                self.relay
                    .relay(&prober, Stanza::Presence(reply), Arc::new(IgnoreFailure))?;
            }
            None => {
                let reply = build_presence(
                    Jid::from(user_bare),
                    prober.clone(),
                    presence::Type::Unavailable,
                );
                self.relay
                    .relay(&prober, Stanza::Presence(reply), Arc::new(IgnoreFailure))?;
            }
        }
        Ok(())
    }

    fn verify_sender(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        if let Some(from) = &stanza.from {
            if from.to_bare() != session.bare() {
                return Err(XmppError::protocol_violation(
                    "presence sender does not match session",
                ));
            }
        }
        Ok(())
    }
}
