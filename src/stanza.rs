//! Closed stanza model.
//!
//! Everything that moves through the relay is one of the three RFC 6120
//! stanza kinds. Using an enum instead of a trait object lets routing
//! decisions match exhaustively on the kind instead of downcasting.

use jid::Jid;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::presence::{self, Presence};

/// A message, presence or IQ stanza addressed to some entity.
#[derive(Debug, Clone)]
pub enum Stanza {
    Message(Message),
    Presence(Presence),
    Iq(Iq),
}

impl Stanza {
    /// Element name of the wrapped stanza.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.to.as_ref(),
            Stanza::Presence(p) => p.to.as_ref(),
            Stanza::Iq(iq) => iq.to.as_ref(),
        }
    }

    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.from.as_ref(),
            Stanza::Presence(p) => p.from.as_ref(),
            Stanza::Iq(iq) => iq.from.as_ref(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Message(m) => m.id.as_deref(),
            Stanza::Presence(p) => p.id.as_deref(),
            Stanza::Iq(iq) => Some(iq.id.as_str()),
        }
    }

    /// True for stanzas of type "error". Error stanzas are never
    /// bounced back to their sender.
    pub fn is_error(&self) -> bool {
        match self {
            Stanza::Message(m) => m.type_ == MessageType::Error,
            Stanza::Presence(p) => p.type_ == presence::Type::Error,
            Stanza::Iq(iq) => matches!(iq.payload, xmpp_parsers::iq::IqType::Error(_)),
        }
    }

    /// Clone with the addressing attributes replaced. The payload is
    /// carried over untouched.
    pub fn readdressed(&self, from: Jid, to: Jid) -> Stanza {
        match self {
            Stanza::Message(m) => {
                let mut m = m.clone();
                m.from = Some(from);
                m.to = Some(to);
                Stanza::Message(m)
            }
            Stanza::Presence(p) => {
                let mut p = p.clone();
                p.from = Some(from);
                p.to = Some(to);
                Stanza::Presence(p)
            }
            Stanza::Iq(iq) => {
                let mut iq = iq.clone();
                iq.from = Some(from);
                iq.to = Some(to);
                Stanza::Iq(iq)
            }
        }
    }
}

impl From<Message> for Stanza {
    fn from(m: Message) -> Self {
        Stanza::Message(m)
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Self {
        Stanza::Presence(p)
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Stanza::Iq(iq)
    }
}
