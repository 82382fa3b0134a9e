//! Delivery failure strategies.
//!
//! When a relay run ends with failures, the stanza's submitter decides
//! what happens next by picking a strategy at submission time. The
//! relay invokes the strategy once per failed run, with the full batch
//! of recorded errors.

use std::sync::Arc;

use jid::Jid;
use tracing::{debug, trace, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::{self, Presence};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use super::StanzaRelay;
use crate::error::DeliveryError;
use crate::stanza::Stanza;

/// Reaction to a failed relay run.
///
/// A strategy failing is contained by the relay; it is logged and never
/// propagated back to the submitter.
pub trait DeliveryFailureStrategy: Send + Sync {
    fn process(&self, stanza: &Stanza, errors: &[DeliveryError]) -> Result<(), DeliveryError>;
}

/// Swallow failures. Used for server-generated stanzas where a bounce
/// would only produce noise or loops.
pub struct IgnoreFailure;

impl DeliveryFailureStrategy for IgnoreFailure {
    fn process(&self, stanza: &Stanza, errors: &[DeliveryError]) -> Result<(), DeliveryError> {
        trace!(
            kind = stanza.name(),
            errors = errors.len(),
            "ignoring delivery failure"
        );
        Ok(())
    }
}

/// Bounce an error stanza back to the original sender.
pub struct ReturnErrorToSender {
    relay: Arc<StanzaRelay>,
}

impl ReturnErrorToSender {
    pub fn new(relay: Arc<StanzaRelay>) -> Self {
        Self { relay }
    }

    fn bounce(&self, receiver: &Jid, stanza: Stanza) -> Result<(), DeliveryError> {
        // The bounce itself uses the ignoring strategy; a failed bounce
        // must not bounce again.
        self.relay.relay(receiver, stanza, Arc::new(IgnoreFailure))
    }

    fn bounce_presence(
        &self,
        original: &Presence,
        sender: &Jid,
        primary: &DeliveryError,
    ) -> Result<(), DeliveryError> {
        // A subscribe aimed at a nonexistent account is answered the
        // way the account itself would answer: with unsubscribed.
        if original.type_ == presence::Type::Subscribe
            && *primary == DeliveryError::NoSuchLocalUser
        {
            let Some(target) = original.to.clone() else {
                return Ok(());
            };
            let mut reply = Presence::new(presence::Type::Unsubscribed);
            reply.from = Some(target);
            reply.to = Some(sender.clone());
            reply.id = original.id.clone();
            return self.bounce(sender, Stanza::Presence(reply));
        }
        // Availability and the remaining handshake types fail silently.
        debug!(presence_type = ?original.type_, "not bouncing undeliverable presence");
        Ok(())
    }
}

/// An offline receiver is reported distinctly from a missing or
/// unroutable one.
fn stanza_error_for(primary: &DeliveryError) -> StanzaError {
    let condition = match primary {
        DeliveryError::LocalRecipientOffline => DefinedCondition::RecipientUnavailable,
        _ => DefinedCondition::ServiceUnavailable,
    };
    StanzaError::new(ErrorType::Cancel, condition, "en", "")
}

impl DeliveryFailureStrategy for ReturnErrorToSender {
    fn process(&self, stanza: &Stanza, errors: &[DeliveryError]) -> Result<(), DeliveryError> {
        // Bouncing an error would ping-pong between two dead ends.
        if stanza.is_error() {
            return Ok(());
        }
        let Some(primary) = errors.first() else {
            return Ok(());
        };
        let Some(sender) = stanza.from().cloned() else {
            warn!(kind = stanza.name(), "cannot bounce stanza without sender");
            return Err(DeliveryError::Delivery(
                "undeliverable stanza carries no sender".into(),
            ));
        };

        match stanza {
            Stanza::Presence(p) => self.bounce_presence(p, &sender, primary),
            Stanza::Message(m) => {
                let mut bounce = m.clone();
                bounce.from = m.to.clone();
                bounce.to = Some(sender.clone());
                bounce.type_ = xmpp_parsers::message::MessageType::Error;
                bounce.payloads.push(stanza_error_for(primary).into());
                self.bounce(&sender, Stanza::Message(bounce))
            }
            Stanza::Iq(iq) => {
                let bounce = Iq {
                    from: iq.to.clone(),
                    to: Some(sender.clone()),
                    id: iq.id.clone(),
                    payload: IqType::Error(stanza_error_for(primary)),
                };
                self.bounce(&sender, Stanza::Iq(bounce))
            }
        }
    }
}
