//! RFC 6121 roster model.
//!
//! Rosters here exist to drive presence: the subscription state of an
//! item decides who receives broadcasts and probes, and every change
//! made by the subscription handshake is pushed to the user's
//! interested resources:
//!
//! ```xml
//! <iq type='set' id='push-1' to='user@domain/resource'>
//!   <query xmlns='jabber:iq:roster'>
//!     <item jid='contact@domain' subscription='to' ask='subscribe'/>
//!   </query>
//! </iq>
//! ```

pub mod mutator;
pub mod storage;

pub use mutator::{MutationOutcome, SubscriptionChange};
pub use storage::MemoryRosterStore;

use std::fmt;

use async_trait::async_trait;
use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use serde::{Deserialize, Serialize};
use xmpp_parsers::iq::Iq;

use crate::error::XmppError;

/// Namespace for RFC 6121 Roster Management.
pub const ROSTER_NS: &str = "jabber:iq:roster";

/// A contact in a user's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// The contact's bare JID.
    pub jid: BareJid,
    /// Optional human-readable name for the contact.
    pub name: Option<String>,
    /// Current subscription state.
    pub subscription: SubscriptionType,
    /// Pending subscription handshake, if any.
    pub ask: PendingAsk,
    /// Groups this contact belongs to.
    pub groups: Vec<String>,
}

impl RosterItem {
    pub fn new(jid: BareJid) -> Self {
        Self {
            jid,
            name: None,
            subscription: SubscriptionType::None,
            ask: PendingAsk::None,
            groups: Vec::new(),
        }
    }

    pub fn with_name(jid: BareJid, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(jid)
        }
    }

    pub fn set_subscription(mut self, subscription: SubscriptionType) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn set_ask(mut self, ask: PendingAsk) -> Self {
        self.ask = ask;
        self
    }

    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Serialize as a roster `<item/>` element.
    ///
    /// Only a pending outbound subscribe is visible on the wire; a
    /// pending inbound approval is server-internal state.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("item", ROSTER_NS)
            .attr("jid", self.jid.to_string())
            .attr("subscription", self.subscription.as_str());

        if let Some(ref name) = self.name {
            builder = builder.attr("name", name);
        }

        if let Some(ask) = self.ask.attr_value() {
            builder = builder.attr("ask", ask);
        }

        for group in &self.groups {
            let group_elem = Element::builder("group", ROSTER_NS)
                .append(group.clone())
                .build();
            builder = builder.append(group_elem);
        }

        builder.build()
    }
}

/// Subscription state of a roster item.
///
/// Per RFC 6121:
/// - `none`: no subscription in either direction
/// - `to`: the user receives the contact's presence
/// - `from`: the contact receives the user's presence
/// - `both`: mutual subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionType {
    #[default]
    None,
    To,
    From,
    Both,
}

impl SubscriptionType {
    /// The user is subscribed to the contact's presence.
    pub fn includes_to(self) -> bool {
        matches!(self, SubscriptionType::To | SubscriptionType::Both)
    }

    /// The contact is subscribed to the user's presence.
    pub fn includes_from(self) -> bool {
        matches!(self, SubscriptionType::From | SubscriptionType::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionType::None => "none",
            SubscriptionType::To => "to",
            SubscriptionType::From => "from",
            SubscriptionType::Both => "both",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, XmppError> {
        match s {
            "none" => Ok(SubscriptionType::None),
            "to" => Ok(SubscriptionType::To),
            "from" => Ok(SubscriptionType::From),
            "both" => Ok(SubscriptionType::Both),
            _ => Err(XmppError::roster_storage(format!(
                "invalid subscription state: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unanswered half of a subscription handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PendingAsk {
    #[default]
    None,
    /// The user asked the contact and awaits approval.
    Subscribe,
    /// The contact asked the user and awaits approval.
    Subscribed,
}

impl PendingAsk {
    /// Wire value for the `ask` attribute. Only the outbound pending
    /// subscribe is serialized, per RFC 6121.
    pub fn attr_value(self) -> Option<&'static str> {
        match self {
            PendingAsk::Subscribe => Some("subscribe"),
            _ => None,
        }
    }
}

/// Persistent roster access used by the presence handlers.
#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn get(
        &self,
        owner: &BareJid,
        contact: &BareJid,
    ) -> Result<Option<RosterItem>, XmppError>;

    async fn put(&self, owner: &BareJid, item: RosterItem) -> Result<(), XmppError>;

    async fn remove(&self, owner: &BareJid, contact: &BareJid) -> Result<bool, XmppError>;

    async fn items(&self, owner: &BareJid) -> Result<Vec<RosterItem>, XmppError>;

    /// The stored item for a contact, or a fresh unsubscribed one.
    async fn get_or_new(
        &self,
        owner: &BareJid,
        contact: &BareJid,
    ) -> Result<RosterItem, XmppError> {
        Ok(self
            .get(owner, contact)
            .await?
            .unwrap_or_else(|| RosterItem::new(contact.clone())))
    }
}

/// Contacts of `items` subscribed to the owner's presence, as routable
/// JIDs.
pub fn subscribers(items: &[RosterItem]) -> Vec<Jid> {
    items
        .iter()
        .filter(|item| item.subscription.includes_from())
        .map(|item| Jid::from(item.jid.clone()))
        .collect()
}

/// Contacts of `items` whose presence the owner is subscribed to.
pub fn subscriptions(items: &[RosterItem]) -> Vec<Jid> {
    items
        .iter()
        .filter(|item| item.subscription.includes_to())
        .map(|item| Jid::from(item.jid.clone()))
        .collect()
}

/// Build a roster push IQ for one changed item.
///
/// Sent from the server to every interested resource after the
/// subscription handshake mutates an item.
pub fn build_roster_push(to: &FullJid, push_id: &str, item: &RosterItem) -> Iq {
    let query = Element::builder("query", ROSTER_NS)
        .append(item.to_element())
        .build();

    Iq {
        // Pushes originate from the server itself.
        from: None,
        to: Some(Jid::from(to.clone())),
        id: push_id.to_string(),
        payload: xmpp_parsers::iq::IqType::Set(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn contact() -> BareJid {
        BareJid::from_str("contact@example.org").unwrap()
    }

    #[test]
    fn subscription_direction_predicates() {
        assert!(!SubscriptionType::None.includes_to());
        assert!(!SubscriptionType::None.includes_from());
        assert!(SubscriptionType::To.includes_to());
        assert!(!SubscriptionType::To.includes_from());
        assert!(!SubscriptionType::From.includes_to());
        assert!(SubscriptionType::From.includes_from());
        assert!(SubscriptionType::Both.includes_to());
        assert!(SubscriptionType::Both.includes_from());
    }

    #[test]
    fn subscription_round_trips_through_strings() {
        for s in ["none", "to", "from", "both"] {
            assert_eq!(SubscriptionType::from_str(s).unwrap().as_str(), s);
        }
        assert!(SubscriptionType::from_str("remove").is_err());
    }

    #[test]
    fn only_outbound_ask_is_serialized() {
        let elem = RosterItem::new(contact())
            .set_ask(PendingAsk::Subscribe)
            .to_element();
        assert_eq!(elem.attr("ask"), Some("subscribe"));

        let elem = RosterItem::new(contact())
            .set_ask(PendingAsk::Subscribed)
            .to_element();
        assert_eq!(elem.attr("ask"), None);
    }

    #[test]
    fn item_element_carries_subscription_and_groups() {
        let item = RosterItem::with_name(contact(), "Alice")
            .set_subscription(SubscriptionType::Both)
            .add_group("Friends");

        let elem = item.to_element();
        assert_eq!(elem.name(), "item");
        assert_eq!(elem.ns(), ROSTER_NS);
        assert_eq!(elem.attr("jid"), Some("contact@example.org"));
        assert_eq!(elem.attr("name"), Some("Alice"));
        assert_eq!(elem.attr("subscription"), Some("both"));
        assert_eq!(
            elem.children().filter(|c| c.name() == "group").count(),
            1
        );
    }

    #[test]
    fn roster_push_targets_the_given_resource() {
        let item = RosterItem::new(contact()).set_subscription(SubscriptionType::To);
        let to = FullJid::from_str("user@example.org/desk").unwrap();

        let push = build_roster_push(&to, "push-7", &item);

        assert_eq!(push.id, "push-7");
        assert!(push.from.is_none());
        assert_eq!(push.to.as_ref().unwrap().to_string(), "user@example.org/desk");

        match push.payload {
            xmpp_parsers::iq::IqType::Set(elem) => {
                assert_eq!(elem.name(), "query");
                assert_eq!(elem.ns(), ROSTER_NS);
                let items: Vec<_> = elem.children().filter(|c| c.name() == "item").collect();
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].attr("subscription"), Some("to"));
            }
            _ => panic!("expected Set payload"),
        }
    }

    #[test]
    fn subscriber_partitions() {
        let items = vec![
            RosterItem::new(BareJid::from_str("a@x.org").unwrap())
                .set_subscription(SubscriptionType::From),
            RosterItem::new(BareJid::from_str("b@x.org").unwrap())
                .set_subscription(SubscriptionType::To),
            RosterItem::new(BareJid::from_str("c@x.org").unwrap())
                .set_subscription(SubscriptionType::Both),
            RosterItem::new(BareJid::from_str("d@x.org").unwrap()),
        ];

        let from: Vec<String> = subscribers(&items).iter().map(|j| j.to_string()).collect();
        assert_eq!(from, vec!["a@x.org", "c@x.org"]);

        let to: Vec<String> = subscriptions(&items).iter().map(|j| j.to_string()).collect();
        assert_eq!(to, vec!["b@x.org", "c@x.org"]);
    }
}
