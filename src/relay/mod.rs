//! Stanza relay.
//!
//! The relay is the submission front of the router: callers hand over
//! a receiver, a stanza and a failure strategy, and a pool of worker
//! tasks performs the actual routing. Submission never blocks and
//! never reports delivery problems to the caller; those go through the
//! chosen strategy instead.

pub mod failure;
pub mod router;

pub use failure::{DeliveryFailureStrategy, IgnoreFailure, ReturnErrorToSender};
pub use router::{RelayResult, StanzaRouter, PRIORITY_THRESHOLD};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jid::Jid;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::stanza::Stanza;

struct RelayTask {
    receiver: Jid,
    stanza: Stanza,
    strategy: Arc<dyn DeliveryFailureStrategy>,
}

/// Asynchronous stanza submission backed by a worker pool.
///
/// Workers pull from one shared queue, so two stanzas submitted in a
/// row may be routed concurrently and arrive in either order.
pub struct StanzaRelay {
    router: Arc<StanzaRouter>,
    queue: mpsc::UnboundedSender<RelayTask>,
    accepting: AtomicBool,
}

impl StanzaRelay {
    /// Spawn the worker pool and return the shared relay handle.
    pub fn new(router: Arc<StanzaRouter>) -> Arc<Self> {
        let worker_count = router.config().worker_count;
        let (tx, rx) = mpsc::unbounded_channel::<RelayTask>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..worker_count {
            let rx = Arc::clone(&rx);
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else { break };
                    Self::process(&router, task).await;
                }
                debug!(worker, "relay worker finished");
            });
        }

        Arc::new(Self {
            router,
            queue: tx,
            accepting: AtomicBool::new(true),
        })
    }

    pub fn router(&self) -> &Arc<StanzaRouter> {
        &self.router
    }

    pub fn is_relaying(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Queue a stanza for delivery. Returns as soon as the stanza is
    /// accepted; the outcome is handled by the given strategy.
    pub fn relay(
        &self,
        receiver: &Jid,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError> {
        if !self.is_relaying() {
            info!(receiver = %receiver, kind = stanza.name(), "relay stopped, rejecting stanza");
            return Err(DeliveryError::ServiceNotAvailable("relay is stopped".into()));
        }
        self.queue
            .send(RelayTask {
                receiver: receiver.clone(),
                stanza,
                strategy,
            })
            .map_err(|_| DeliveryError::ServiceNotAvailable("relay workers are gone".into()))
    }

    /// Stop accepting new stanzas. Tasks already queued still drain.
    pub fn stop(&self) {
        info!("stanza relay stopping");
        self.accepting.store(false, Ordering::Release);
    }

    async fn process(router: &StanzaRouter, task: RelayTask) {
        let result = router.route(&task.receiver, &task.stanza).await;
        if !result.has_failures() {
            return;
        }
        let failures = result.failures();
        debug!(
            receiver = %task.receiver,
            failures = failures.len(),
            "relay run failed, invoking failure strategy"
        );
        // A failing strategy is contained here; the submitter is long
        // gone.
        if let Err(e) = task.strategy.process(&task.stanza, &failures) {
            warn!(receiver = %task.receiver, error = %e, "delivery failure strategy failed");
        }
    }
}
