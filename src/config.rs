//! Relay configuration.

/// Static configuration for the relay and its router.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Domain this server is authoritative for, e.g. "example.org".
    pub domain: String,
    /// When true, messages to a bare JID go only to the highest
    /// priority resources instead of every eligible resource.
    pub deliver_to_highest_priority_only: bool,
    /// Number of relay worker tasks draining the submission queue.
    pub worker_count: usize,
}

impl RelayConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            deliver_to_highest_priority_only: false,
            worker_count: 10,
        }
    }

    pub fn with_highest_priority_only(mut self, enabled: bool) -> Self {
        self.deliver_to_highest_priority_only = enabled;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Whether the given domain is the one we serve directly.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.domain == domain
    }

    /// Whether the given domain is a sub-domain of ours, i.e. belongs
    /// to an attached component such as a MUC or pubsub service.
    pub fn is_component_domain(&self, domain: &str) -> bool {
        domain
            .strip_suffix(&self.domain)
            .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
    }
}
