//! Sub-domain components.
//!
//! Services like MUC or pubsub live under sub-domains of the server
//! domain. The router hands any stanza addressed to a registered
//! sub-domain to its processor instead of the session machinery.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::DeliveryError;
use crate::stanza::Stanza;

/// A service accepting stanzas for one sub-domain.
#[async_trait]
pub trait ComponentProcessor: Send + Sync {
    async fn process(&self, stanza: Stanza) -> Result<(), DeliveryError>;
}

/// Processors keyed by their fully qualified sub-domain.
#[derive(Default)]
pub struct ComponentRegistry {
    processors: DashMap<String, Arc<dyn ComponentProcessor>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, domain: impl Into<String>, processor: Arc<dyn ComponentProcessor>) {
        let domain = domain.into();
        debug!(%domain, "registered component processor");
        self.processors.insert(domain, processor);
    }

    pub fn unregister(&self, domain: &str) -> bool {
        self.processors.remove(domain).is_some()
    }

    pub fn processor_for(&self, domain: &str) -> Option<Arc<dyn ComponentProcessor>> {
        self.processors.get(domain).map(|p| Arc::clone(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use xmpp_parsers::message::Message;

    struct Recorder {
        seen: Mutex<Vec<Stanza>>,
    }

    #[async_trait]
    impl ComponentProcessor for Recorder {
        async fn process(&self, stanza: Stanza) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(stanza);
            Ok(())
        }
    }

    #[tokio::test]
    async fn lookup_is_exact_on_domain() {
        let registry = ComponentRegistry::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        registry.register("muc.example.org", recorder.clone());

        assert!(registry.processor_for("muc.example.org").is_some());
        assert!(registry.processor_for("example.org").is_none());
        assert!(registry.processor_for("pubsub.example.org").is_none());

        let processor = registry.processor_for("muc.example.org").unwrap();
        processor
            .process(Stanza::Message(Message::new(None)))
            .await
            .unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);

        assert!(registry.unregister("muc.example.org"));
        assert!(registry.processor_for("muc.example.org").is_none());
    }
}
