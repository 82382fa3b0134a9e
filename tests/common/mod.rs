//! Shared fixture wiring a complete in-memory server core.
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Once};
use std::time::Duration;

use jid::{BareJid, FullJid, Jid};
use tokio::sync::mpsc;
use xmpp_parsers::presence::{self, Presence};

use waxwing::accounts::{AccountManagement, MemoryAccounts};
use waxwing::components::ComponentRegistry;
use waxwing::config::RelayConfig;
use waxwing::offline::{MemoryOfflineStore, OfflineStanzaStore};
use waxwing::presence::{PresenceAvailabilityHandler, PresenceSubscriptionHandler};
use waxwing::presence_cache::PresenceCache;
use waxwing::registry::ResourceRegistry;
use waxwing::relay::{StanzaRelay, StanzaRouter};
use waxwing::roster::{MemoryRosterStore, RosterStore};
use waxwing::session::SessionContext;
use waxwing::stanza::Stanza;

pub const DOMAIN: &str = "example.org";

static INIT: Once = Once::new();

/// Capture debug-level logs in test output.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

pub struct TestServer {
    pub registry: Arc<ResourceRegistry>,
    pub accounts: Arc<MemoryAccounts>,
    pub offline: Arc<MemoryOfflineStore>,
    pub roster: Arc<MemoryRosterStore>,
    pub cache: Arc<PresenceCache>,
    pub relay: Arc<StanzaRelay>,
    pub availability: PresenceAvailabilityHandler,
    pub subscription: PresenceSubscriptionHandler,
}

impl TestServer {
    pub fn new() -> Self {
        init_tracing();
        let registry = Arc::new(ResourceRegistry::new());
        let accounts = Arc::new(MemoryAccounts::new());
        let offline = Arc::new(MemoryOfflineStore::new());
        let roster = Arc::new(MemoryRosterStore::new());
        let cache = Arc::new(PresenceCache::new());

        let router = StanzaRouter::new(
            RelayConfig::new(DOMAIN).with_worker_count(2),
            Arc::clone(&registry),
            Arc::new(ComponentRegistry::new()),
            Arc::clone(&accounts) as Arc<dyn AccountManagement>,
        )
        .with_offline_store(Arc::clone(&offline) as Arc<dyn OfflineStanzaStore>);
        let relay = StanzaRelay::new(Arc::new(router));

        let availability = PresenceAvailabilityHandler::new(
            Arc::clone(&registry),
            Arc::clone(&roster) as Arc<dyn RosterStore>,
            Arc::clone(&cache),
            Arc::clone(&relay),
        )
        .with_offline_store(Arc::clone(&offline) as Arc<dyn OfflineStanzaStore>);

        let subscription = PresenceSubscriptionHandler::new(
            Arc::clone(&registry),
            Arc::clone(&roster) as Arc<dyn RosterStore>,
            Arc::clone(&cache),
            Arc::clone(&relay),
        );

        Self {
            registry,
            accounts,
            offline,
            roster,
            cache,
            relay,
            availability,
            subscription,
        }
    }

    /// Bind an authenticated session for the given full JID.
    pub fn connect(&self, jid: &str) -> TestClient {
        let full = FullJid::from_str(jid).expect("valid full JID");
        self.accounts.add(full.to_bare());
        let (tx, rx) = mpsc::channel(64);
        let session = SessionContext::new(full, tx);
        session.set_authenticated(true);
        self.registry.bind(Arc::clone(&session));
        TestClient { session, rx }
    }
}

pub struct TestClient {
    pub session: Arc<SessionContext>,
    pub rx: mpsc::Receiver<Stanza>,
}

impl TestClient {
    pub fn jid(&self) -> Jid {
        Jid::from(self.session.jid().clone())
    }

    pub fn bare(&self) -> BareJid {
        self.session.bare()
    }

    /// Next stanza delivered to this client, or panic after a timeout.
    pub async fn recv(&mut self) -> Stanza {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a stanza")
            .expect("session channel closed")
    }

    pub async fn recv_presence(&mut self) -> Presence {
        match self.recv().await {
            Stanza::Presence(p) => p,
            other => panic!("expected presence, got {}", other.name()),
        }
    }

    /// Everything delivered once the relay workers go idle.
    pub async fn drain(&mut self) -> Vec<Stanza> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut stanzas = Vec::new();
        while let Ok(stanza) = self.rx.try_recv() {
            stanzas.push(stanza);
        }
        stanzas
    }

    pub async fn assert_nothing_delivered(&mut self) {
        let stanzas = self.drain().await;
        assert!(
            stanzas.is_empty(),
            "expected no stanzas, got {:?}",
            stanzas.iter().map(|s| s.name()).collect::<Vec<_>>()
        );
    }
}

/// Availability presence without a receiver, as a client would send it.
pub fn available() -> Presence {
    Presence::new(presence::Type::None)
}

pub fn unavailable() -> Presence {
    Presence::new(presence::Type::Unavailable)
}

/// Handshake presence addressed to the given entity.
pub fn handshake(type_: presence::Type, to: &str) -> Presence {
    let mut pres = Presence::new(type_);
    pres.to = Some(Jid::from_str(to).expect("valid JID"));
    pres
}
