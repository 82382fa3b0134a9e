//! Pure subscription-state transitions.
//!
//! The handshake handlers decide *which* transition a stanza asks for;
//! this module decides *whether* it applies and mutates the item
//! accordingly. Keeping it free of I/O makes every transition
//! exhaustively testable.

use tracing::trace;

use super::{PendingAsk, RosterItem, SubscriptionType};

/// A requested change to a roster item's subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// The user now receives the contact's presence.
    AddTo,
    /// The contact now receives the user's presence.
    AddFrom,
    /// The user stops receiving the contact's presence.
    RemoveTo,
    /// The contact stops receiving the user's presence.
    RemoveFrom,
    /// The user sent a subscribe and awaits approval.
    AskSubscribe,
    /// The contact sent a subscribe and awaits the user's approval.
    AskSubscribed,
}

/// What applying a change did to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The item changed.
    Applied,
    /// The requested state already holds; the item is untouched.
    AlreadySet,
    /// The change conflicts with the current state; the item is
    /// untouched.
    Rejected,
}

/// Apply a subscription change to a roster item.
pub fn apply(item: &mut RosterItem, change: SubscriptionChange) -> MutationOutcome {
    let outcome = match change {
        SubscriptionChange::AddTo => add_to(item),
        SubscriptionChange::AddFrom => add_from(item),
        SubscriptionChange::RemoveTo => remove_to(item),
        SubscriptionChange::RemoveFrom => remove_from(item),
        SubscriptionChange::AskSubscribe => ask_subscribe(item),
        SubscriptionChange::AskSubscribed => ask_subscribed(item),
    };
    trace!(
        contact = %item.jid,
        ?change,
        ?outcome,
        subscription = %item.subscription,
        "applied subscription change"
    );
    outcome
}

fn ask_subscribe(item: &mut RosterItem) -> MutationOutcome {
    if item.subscription.includes_to() {
        return MutationOutcome::AlreadySet;
    }
    if item.ask == PendingAsk::Subscribe {
        return MutationOutcome::AlreadySet;
    }
    item.ask = PendingAsk::Subscribe;
    MutationOutcome::Applied
}

fn ask_subscribed(item: &mut RosterItem) -> MutationOutcome {
    if item.subscription.includes_from() {
        return MutationOutcome::AlreadySet;
    }
    match item.ask {
        PendingAsk::Subscribed => MutationOutcome::AlreadySet,
        // An outbound ask to the same contact takes precedence; the
        // crossing subscribes resolve through the approval path.
        PendingAsk::Subscribe => MutationOutcome::Rejected,
        PendingAsk::None => {
            item.ask = PendingAsk::Subscribed;
            MutationOutcome::Applied
        }
    }
}

fn add_to(item: &mut RosterItem) -> MutationOutcome {
    if item.subscription.includes_to() {
        return MutationOutcome::AlreadySet;
    }
    item.subscription = match item.subscription {
        SubscriptionType::From => SubscriptionType::Both,
        _ => SubscriptionType::To,
    };
    // The pending outbound ask is answered by this grant.
    if item.ask == PendingAsk::Subscribe {
        item.ask = PendingAsk::None;
    }
    MutationOutcome::Applied
}

fn add_from(item: &mut RosterItem) -> MutationOutcome {
    if item.subscription.includes_from() {
        return MutationOutcome::AlreadySet;
    }
    item.subscription = match item.subscription {
        SubscriptionType::To => SubscriptionType::Both,
        _ => SubscriptionType::From,
    };
    if item.ask == PendingAsk::Subscribed {
        item.ask = PendingAsk::None;
    }
    MutationOutcome::Applied
}

fn remove_to(item: &mut RosterItem) -> MutationOutcome {
    if !item.subscription.includes_to() {
        // Withdrawing an unanswered request still counts as a change.
        if item.ask == PendingAsk::Subscribe {
            item.ask = PendingAsk::None;
            return MutationOutcome::Applied;
        }
        return MutationOutcome::AlreadySet;
    }
    item.subscription = match item.subscription {
        SubscriptionType::Both => SubscriptionType::From,
        _ => SubscriptionType::None,
    };
    MutationOutcome::Applied
}

fn remove_from(item: &mut RosterItem) -> MutationOutcome {
    if !item.subscription.includes_from() {
        if item.ask == PendingAsk::Subscribed {
            item.ask = PendingAsk::None;
            return MutationOutcome::Applied;
        }
        return MutationOutcome::AlreadySet;
    }
    item.subscription = match item.subscription {
        SubscriptionType::Both => SubscriptionType::To,
        _ => SubscriptionType::None,
    };
    MutationOutcome::Applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use jid::BareJid;
    use std::str::FromStr;

    fn item() -> RosterItem {
        RosterItem::new(BareJid::from_str("contact@example.org").unwrap())
    }

    #[test]
    fn ask_subscribe_is_idempotent() {
        let mut it = item();
        assert_eq!(apply(&mut it, SubscriptionChange::AskSubscribe), MutationOutcome::Applied);
        assert_eq!(it.ask, PendingAsk::Subscribe);

        let before = it.clone();
        assert_eq!(
            apply(&mut it, SubscriptionChange::AskSubscribe),
            MutationOutcome::AlreadySet
        );
        assert_eq!(it, before);
    }

    #[test]
    fn ask_subscribe_after_grant_is_already_set() {
        let mut it = item().set_subscription(SubscriptionType::To);
        assert_eq!(
            apply(&mut it, SubscriptionChange::AskSubscribe),
            MutationOutcome::AlreadySet
        );
        let mut it = item().set_subscription(SubscriptionType::Both);
        assert_eq!(
            apply(&mut it, SubscriptionChange::AskSubscribe),
            MutationOutcome::AlreadySet
        );
    }

    #[test]
    fn crossing_asks_reject_the_inbound_one() {
        let mut it = item().set_ask(PendingAsk::Subscribe);
        assert_eq!(
            apply(&mut it, SubscriptionChange::AskSubscribed),
            MutationOutcome::Rejected
        );
        assert_eq!(it.ask, PendingAsk::Subscribe);
    }

    #[test]
    fn grants_upgrade_towards_both() {
        let mut it = item();
        assert_eq!(apply(&mut it, SubscriptionChange::AddTo), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::To);
        assert_eq!(apply(&mut it, SubscriptionChange::AddFrom), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::Both);

        let mut it = item();
        assert_eq!(apply(&mut it, SubscriptionChange::AddFrom), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::From);
        assert_eq!(apply(&mut it, SubscriptionChange::AddTo), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::Both);
    }

    #[test]
    fn grant_clears_the_matching_pending_ask() {
        let mut it = item().set_ask(PendingAsk::Subscribe);
        apply(&mut it, SubscriptionChange::AddTo);
        assert_eq!(it.ask, PendingAsk::None);

        let mut it = item().set_ask(PendingAsk::Subscribed);
        apply(&mut it, SubscriptionChange::AddFrom);
        assert_eq!(it.ask, PendingAsk::None);
    }

    #[test]
    fn duplicate_grants_leave_the_item_untouched() {
        let mut it = item().set_subscription(SubscriptionType::Both);
        let before = it.clone();
        assert_eq!(apply(&mut it, SubscriptionChange::AddTo), MutationOutcome::AlreadySet);
        assert_eq!(apply(&mut it, SubscriptionChange::AddFrom), MutationOutcome::AlreadySet);
        assert_eq!(it, before);
    }

    #[test]
    fn removals_downgrade_towards_none() {
        let mut it = item().set_subscription(SubscriptionType::Both);
        assert_eq!(apply(&mut it, SubscriptionChange::RemoveTo), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::From);
        assert_eq!(apply(&mut it, SubscriptionChange::RemoveFrom), MutationOutcome::Applied);
        assert_eq!(it.subscription, SubscriptionType::None);
    }

    #[test]
    fn removal_without_subscription_withdraws_a_pending_ask() {
        let mut it = item().set_ask(PendingAsk::Subscribe);
        assert_eq!(apply(&mut it, SubscriptionChange::RemoveTo), MutationOutcome::Applied);
        assert_eq!(it.ask, PendingAsk::None);
        assert_eq!(
            apply(&mut it, SubscriptionChange::RemoveTo),
            MutationOutcome::AlreadySet
        );

        let mut it = item().set_ask(PendingAsk::Subscribed);
        assert_eq!(apply(&mut it, SubscriptionChange::RemoveFrom), MutationOutcome::Applied);
        assert_eq!(it.ask, PendingAsk::None);
        assert_eq!(
            apply(&mut it, SubscriptionChange::RemoveFrom),
            MutationOutcome::AlreadySet
        );
    }

    #[test]
    fn interleaved_handshakes_converge_to_both() {
        // Both sides subscribe to each other; whatever the order of
        // grant application, the item ends at "both" with no pending
        // ask.
        let sequences: &[&[SubscriptionChange]] = &[
            &[
                SubscriptionChange::AskSubscribe,
                SubscriptionChange::AddTo,
                SubscriptionChange::AskSubscribed,
                SubscriptionChange::AddFrom,
            ],
            &[
                SubscriptionChange::AskSubscribe,
                SubscriptionChange::AskSubscribed,
                SubscriptionChange::AddTo,
                SubscriptionChange::AddFrom,
            ],
            &[
                SubscriptionChange::AskSubscribe,
                SubscriptionChange::AskSubscribed,
                SubscriptionChange::AddFrom,
                SubscriptionChange::AddTo,
            ],
        ];

        for sequence in sequences {
            let mut it = item();
            for change in *sequence {
                apply(&mut it, *change);
            }
            assert_eq!(it.subscription, SubscriptionType::Both, "{:?}", sequence);
            assert_eq!(it.ask, PendingAsk::None, "{:?}", sequence);
        }
    }
}
