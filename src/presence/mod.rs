//! Presence handling.
//!
//! Two handlers split the presence namespace: availability broadcast
//! (available, unavailable, probe, error) and the RFC 6121
//! subscription handshake (subscribe, subscribed, unsubscribe,
//! unsubscribed). Both are driven by the stanza's direction relative
//! to this server.

pub mod availability;
pub mod subscription;

pub use availability::PresenceAvailabilityHandler;
pub use subscription::PresenceSubscriptionHandler;

use jid::Jid;
use uuid::Uuid;
use xmpp_parsers::presence::{self, Presence};

/// Which side of the server a stanza is seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaDirection {
    /// Sent by a locally connected client.
    Outbound,
    /// Arriving for a locally connected client.
    Inbound,
}

/// Presence types belonging to the subscription handshake.
pub fn is_subscription_type(type_: &presence::Type) -> bool {
    matches!(
        *type_,
        presence::Type::Subscribe
            | presence::Type::Subscribed
            | presence::Type::Unsubscribe
            | presence::Type::Unsubscribed
    )
}

/// Minimal server-generated presence of the given type between two
/// entities, with a fresh stanza id.
pub(crate) fn build_presence(from: Jid, to: Jid, type_: presence::Type) -> Presence {
    let mut pres = Presence::new(type_);
    pres.id = Some(Uuid::new_v4().to_string());
    pres.from = Some(from);
    pres.to = Some(to);
    pres
}

/// Clone a presence, carrying show, status, priority and payloads, but
/// with fresh addressing.
pub(crate) fn readdress(original: &Presence, from: Jid, to: Jid) -> Presence {
    let mut pres = original.clone();
    pres.from = Some(from);
    pres.to = Some(to);
    pres
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_types_are_recognized() {
        assert!(is_subscription_type(&presence::Type::Subscribe));
        assert!(is_subscription_type(&presence::Type::Subscribed));
        assert!(is_subscription_type(&presence::Type::Unsubscribe));
        assert!(is_subscription_type(&presence::Type::Unsubscribed));
        assert!(!is_subscription_type(&presence::Type::None));
        assert!(!is_subscription_type(&presence::Type::Unavailable));
        assert!(!is_subscription_type(&presence::Type::Probe));
        assert!(!is_subscription_type(&presence::Type::Error));
    }
}
