//! RFC 6121 subscription handshake.
//!
//! Each handshake stanza maps to one pure roster mutation; the handler
//! only decides what to relay, forward and push once the mutation
//! outcome is known. Handshake stanzas travel between bare JIDs, so
//! everything sent out here is stamped accordingly.

use std::sync::Arc;

use jid::{BareJid, Jid};
use tracing::{debug, instrument, warn};
use xmpp_parsers::presence::{self, Presence};

use super::{build_presence, readdress, StanzaDirection};
use crate::error::XmppError;
use crate::presence_cache::PresenceCache;
use crate::registry::ResourceRegistry;
use crate::relay::{IgnoreFailure, ReturnErrorToSender, StanzaRelay};
use crate::roster::mutator::{self, MutationOutcome, SubscriptionChange};
use crate::roster::{build_roster_push, RosterItem, RosterStore};
use crate::session::{SendResult, SessionContext};
use crate::stanza::Stanza;

pub struct PresenceSubscriptionHandler {
    registry: Arc<ResourceRegistry>,
    roster: Arc<dyn RosterStore>,
    cache: Arc<PresenceCache>,
    relay: Arc<StanzaRelay>,
}

impl PresenceSubscriptionHandler {
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
        }
    }

    /// Handle one handshake presence for the given session.
    #[instrument(skip(self, session, stanza), fields(session = %session.jid(), presence_type = ?stanza.type_))]
    pub async fn handle(
        &self,
        direction: StanzaDirection,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        match (direction, &stanza.type_) {
            (StanzaDirection::Outbound, presence::Type::Subscribe) => {
                self.outbound_subscribe(session, stanza).await
            }
            (StanzaDirection::Outbound, presence::Type::Subscribed) => {
                self.outbound_subscribed(session, stanza).await
            }
            (StanzaDirection::Outbound, presence::Type::Unsubscribe) => {
                self.outbound_unsubscribe(session, stanza).await
            }
            (StanzaDirection::Outbound, presence::Type::Unsubscribed) => {
                self.outbound_unsubscribed(session, stanza).await
            }
            (StanzaDirection::Inbound, presence::Type::Subscribe) => {
                self.inbound_subscribe(session, stanza).await
            }
            (StanzaDirection::Inbound, presence::Type::Subscribed) => {
                self.inbound_subscribed(session, stanza).await
            }
            (StanzaDirection::Inbound, presence::Type::Unsubscribe) => {
                self.inbound_unsubscribe(session, stanza).await
            }
            (StanzaDirection::Inbound, presence::Type::Unsubscribed) => {
                self.inbound_unsubscribed(session, stanza).await
            }
            _ => Err(XmppError::protocol_violation(
                "availability presence on the subscription path",
            )),
        }
    }

    /// The user asks for the contact's presence.
    async fn outbound_subscribe(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = receiver_bare(stanza)?;

        let mut item = self.roster.get_or_new(&user, &contact).await?;
        let outcome = mutator::apply(&mut item, SubscriptionChange::AskSubscribe);
        if outcome != MutationOutcome::Applied {
            debug!(?outcome, "subscribe request changed nothing");
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;

        // A request to a nonexistent account comes back as
        // unsubscribed via the bounce strategy.
        self.relay_handshake(stanza, &user, &contact, true)?;
        self.push_roster_update(&user, &item);
        Ok(())
    }

    /// The user approves the contact's pending request.
    async fn outbound_subscribed(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = receiver_bare(stanza)?;

        let mut item = self.roster.get_or_new(&user, &contact).await?;
        let outcome = mutator::apply(&mut item, SubscriptionChange::AddFrom);
        if outcome != MutationOutcome::Applied {
            debug!(?outcome, "approval changed nothing");
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;

        self.relay_handshake(stanza, &user, &contact, false)?;
        self.push_roster_update(&user, &item);

        // The new subscriber immediately learns the user's current
        // presence, one stanza per available resource.
        let contact_jid = Jid::from(contact.clone());
        for resource in self.registry.available_resources(&user) {
            if let Some(cached) = self.cache.get(&resource) {
                let replay = readdress(&cached, Jid::from(resource), contact_jid.clone());
                if let Err(e) = self.relay.relay(
                    &contact_jid,
                    Stanza::Presence(replay),
                    Arc::new(IgnoreFailure),
                ) {
                    warn!(contact = %contact_jid, error = %e, "presence replay not relayed");
                }
            }
        }
        Ok(())
    }

    /// The user cancels its own subscription to the contact.
    async fn outbound_unsubscribe(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = receiver_bare(stanza)?;

        let Some(mut item) = self.roster.get(&user, &contact).await? else {
            debug!(contact = %contact, "unsubscribe for unknown contact");
            return Ok(());
        };
        let outcome = mutator::apply(&mut item, SubscriptionChange::RemoveTo);
        if outcome != MutationOutcome::Applied {
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;

        self.relay_handshake(stanza, &user, &contact, false)?;
        self.push_roster_update(&user, &item);
        Ok(())
    }

    /// The user revokes the contact's subscription.
    async fn outbound_unsubscribed(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = receiver_bare(stanza)?;

        let Some(mut item) = self.roster.get(&user, &contact).await? else {
            debug!(contact = %contact, "revocation for unknown contact");
            return Ok(());
        };
        let outcome = mutator::apply(&mut item, SubscriptionChange::RemoveFrom);
        if outcome != MutationOutcome::Applied {
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;

        self.relay_handshake(stanza, &user, &contact, false)?;
        self.push_roster_update(&user, &item);
        Ok(())
    }

    /// A contact asks for this user's presence.
    async fn inbound_subscribe(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = sender_bare(stanza)?;

        let mut item = self.roster.get_or_new(&user, &contact).await?;
        let outcome = mutator::apply(&mut item, SubscriptionChange::AskSubscribed);
        match outcome {
            MutationOutcome::Applied => {
                self.roster.put(&user, item).await?;
                self.forward_to_session(session, stanza);
            }
            // The contact is already subscribed; re-approve without
            // bothering the user.
            MutationOutcome::AlreadySet => {
                let reply = build_presence(
                    Jid::from(user),
                    Jid::from(contact.clone()),
                    presence::Type::Subscribed,
                );
                self.relay.relay(
                    &Jid::from(contact),
                    Stanza::Presence(reply),
                    Arc::new(IgnoreFailure),
                )?;
            }
            // Crossing requests: the user still decides.
            MutationOutcome::Rejected => self.forward_to_session(session, stanza),
        }
        Ok(())
    }

    /// A contact approved this user's request.
    async fn inbound_subscribed(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = sender_bare(stanza)?;

        let mut item = self.roster.get_or_new(&user, &contact).await?;
        let outcome = mutator::apply(&mut item, SubscriptionChange::AddTo);
        match outcome {
            MutationOutcome::Applied => {
                self.roster.put(&user, item.clone()).await?;
                self.forward_to_session(session, stanza);
                self.push_roster_update(&user, &item);
            }
            // A duplicate approval still reaches the interested
            // resources so they see a consistent roster.
            MutationOutcome::AlreadySet => {
                self.forward_to_session(session, stanza);
                self.push_roster_update(&user, &item);
            }
            MutationOutcome::Rejected => {
                debug!(contact = %contact, "dropping unexpected approval");
            }
        }
        Ok(())
    }

    /// A contact cancelled its subscription to this user.
    async fn inbound_unsubscribe(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = sender_bare(stanza)?;

        let Some(mut item) = self.roster.get(&user, &contact).await? else {
            return Ok(());
        };
        let outcome = mutator::apply(&mut item, SubscriptionChange::RemoveFrom);
        if outcome != MutationOutcome::Applied {
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;
        self.forward_to_session(session, stanza);
        self.push_roster_update(&user, &item);
        Ok(())
    }

    /// A contact revoked this user's subscription.
    async fn inbound_unsubscribed(
        &self,
        session: &Arc<SessionContext>,
        stanza: &Presence,
    ) -> Result<(), XmppError> {
        let user = session.bare();
        let contact = sender_bare(stanza)?;

        let Some(mut item) = self.roster.get(&user, &contact).await? else {
            return Ok(());
        };
        let outcome = mutator::apply(&mut item, SubscriptionChange::RemoveTo);
        if outcome != MutationOutcome::Applied {
            return Ok(());
        }
        self.roster.put(&user, item.clone()).await?;
        self.forward_to_session(session, stanza);
        self.push_roster_update(&user, &item);
        Ok(())
    }

    /// Relay the handshake stanza to the contact, stamped bare to
    /// bare. Subscribes bounce errors back; everything else fails
    /// silently.
    fn relay_handshake(
        &self,
        stanza: &Presence,
        user: &BareJid,
        contact: &BareJid,
        bounce: bool,
    ) -> Result<(), XmppError> {
        let stamped = readdress(
            stanza,
            Jid::from(user.clone()),
            Jid::from(contact.clone()),
        );
        let strategy: Arc<dyn crate::relay::DeliveryFailureStrategy> = if bounce {
            Arc::new(ReturnErrorToSender::new(Arc::clone(&self.relay)))
        } else {
            Arc::new(IgnoreFailure)
        };
        self.relay
            .relay(&Jid::from(contact.clone()), Stanza::Presence(stamped), strategy)?;
        Ok(())
    }

    fn forward_to_session(&self, session: &Arc<SessionContext>, stanza: &Presence) {
        if session.write(Stanza::Presence(stanza.clone())) != SendResult::Sent {
            warn!(session = %session.jid(), "failed to forward handshake presence to session");
        }
    }

    /// Push the changed item to every resource of the user that has
    /// requested its roster.
    fn push_roster_update(&self, user: &BareJid, item: &RosterItem) {
        for resource in self.registry.interested_resources(user) {
            let Some(target) = self.registry.session_for(&resource) else {
                continue;
            };
            let push_id = format!("push-{}", target.next_sequence());
            let push = build_roster_push(&resource, &push_id, item);
            if target.write(Stanza::Iq(push)) != SendResult::Sent {
                warn!(resource = %resource, "failed to push roster update");
            }
        }
    }
}

fn receiver_bare(stanza: &Presence) -> Result<BareJid, XmppError> {
    stanza
        .to
        .as_ref()
        .map(|jid| jid.to_bare())
        .ok_or_else(|| XmppError::protocol_violation("handshake presence requires a receiver"))
}

fn sender_bare(stanza: &Presence) -> Result<BareJid, XmppError> {
    stanza
        .from
        .as_ref()
        .map(|jid| jid.to_bare())
        .ok_or_else(|| XmppError::protocol_violation("handshake presence requires a sender"))
}
