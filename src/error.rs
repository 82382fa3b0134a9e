//! Error types for stanza delivery and handler processing.

use thiserror::Error;

/// Failure of a single delivery attempt.
///
/// A relay run accumulates one of these per target that could not be
/// reached; targets are isolated, so one failing resource never aborts
/// delivery to the others.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The relay (or a component of it) is not in a state to deliver,
    /// or the target domain is not served here.
    #[error("service not available: {0}")]
    ServiceNotAvailable(String),

    /// The receiver's domain is local but no such account exists.
    #[error("no such local user")]
    NoSuchLocalUser,

    /// The receiver exists locally but has no available resource and
    /// the stanza could not be parked for later retrieval.
    #[error("local recipient offline")]
    LocalRecipientOffline,

    /// The stanza was handed to the offline store instead of a live
    /// session. A qualified success, not a failure.
    #[error("delivered to offline receiver")]
    DeliveredToOfflineReceiver,

    /// Any other failure while writing to a target.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl DeliveryError {
    /// Whether this entry describes a genuine failure, as opposed to a
    /// qualified success such as offline storage.
    pub fn is_failure(&self) -> bool {
        !matches!(self, DeliveryError::DeliveredToOfflineReceiver)
    }
}

/// Errors surfaced by the presence and subscription handlers and by
/// roster storage.
#[derive(Debug, Error)]
pub enum XmppError {
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("roster storage error: {0}")]
    RosterStorage(String),

    /// The peer sent something the protocol forbids, e.g. a client
    /// emitting a presence probe.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl XmppError {
    pub fn roster_storage(msg: impl Into<String>) -> Self {
        XmppError::RosterStorage(msg.into())
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        XmppError::ProtocolViolation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        XmppError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_storage_is_not_a_failure() {
        assert!(!DeliveryError::DeliveredToOfflineReceiver.is_failure());
        assert!(DeliveryError::NoSuchLocalUser.is_failure());
        assert!(DeliveryError::LocalRecipientOffline.is_failure());
        assert!(DeliveryError::ServiceNotAvailable("stopped".into()).is_failure());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = DeliveryError::ServiceNotAvailable("relay stopped".into());
        assert_eq!(err.to_string(), "service not available: relay stopped");

        let err = XmppError::protocol_violation("probe from client");
        assert_eq!(err.to_string(), "protocol violation: probe from client");
    }
}
