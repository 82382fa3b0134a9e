//! Waxwing: stanza delivery, presence and roster subscriptions for a
//! federated XMPP server.
//!
//! The crate centers on three pieces:
//!
//! - [`relay::StanzaRelay`], a non-blocking submission front over a
//!   routing core that resolves receivers to live sessions, sub-domain
//!   components or offline storage;
//! - [`presence::PresenceAvailabilityHandler`], which turns available
//!   and unavailable presence into registry updates, broadcasts and
//!   probes;
//! - [`presence::PresenceSubscriptionHandler`], which drives the RFC
//!   6121 subscription handshake over a pure roster mutator.
//!
//! Sessions register with the [`registry::ResourceRegistry`]; stanza
//! submitters choose a [`relay::DeliveryFailureStrategy`] deciding
//! what happens when delivery fails.

pub mod accounts;
pub mod components;
pub mod config;
pub mod error;
pub mod offline;
pub mod presence;
pub mod presence_cache;
pub mod registry;
pub mod relay;
pub mod roster;
pub mod session;
pub mod stanza;

pub use accounts::{AccountManagement, MemoryAccounts};
pub use components::{ComponentProcessor, ComponentRegistry};
pub use config::RelayConfig;
pub use error::{DeliveryError, XmppError};
pub use offline::{MemoryOfflineStore, OfflineStanzaStore};
pub use presence::{
    PresenceAvailabilityHandler, PresenceSubscriptionHandler, StanzaDirection,
};
pub use presence_cache::PresenceCache;
pub use registry::{ResourceRegistry, ResourceState};
pub use relay::{
    DeliveryFailureStrategy, IgnoreFailure, RelayResult, ReturnErrorToSender, StanzaRelay,
    StanzaRouter,
};
pub use roster::{MemoryRosterStore, RosterItem, RosterStore, SubscriptionType};
pub use session::{SendResult, SessionContext};
pub use stanza::Stanza;
