//! Callback dispatch
//!
//! Inbound business envelopes are handed to a dedicated task so a slow or
//! failing subscriber never stalls the transport read loop. Each callback
//! runs in isolation: an error result or a panic is logged and delivery
//! continues with the next subscriber.

use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::registry::{self, SharedRegistry};
use crate::protocol::Envelope;

/// A subscriber callback failed
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback returned an error: {0}")]
    Failed(anyhow::Error),

    #[error("Callback panicked: {0}")]
    Panicked(String),
}

/// Outcome of delivering one envelope
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Invoke every matching callback in registration order
pub fn deliver(registry: &SharedRegistry, envelope: &Envelope) -> DeliveryReport {
    // Snapshot under the lock, invoke outside it: callbacks may subscribe.
    let callbacks = registry::lock(registry).matching(envelope);
    let mut report = DeliveryReport::default();

    for callback in callbacks {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(envelope)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(CallbackError::Failed(e)),
            Err(payload) => Some(CallbackError::Panicked(panic_message(payload.as_ref()))),
        };

        match failure {
            None => report.delivered += 1,
            Some(error) => {
                report.failed += 1;
                tracing::warn!(
                    channel = ?envelope.channel,
                    error = %error,
                    "Subscriber callback failed"
                );
            }
        }
    }

    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn the dispatch task; it ends when every sender is dropped
pub fn spawn_dispatcher(
    registry: SharedRegistry,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let report = deliver(&registry, &envelope);
            tracing::trace!(
                channel = ?envelope.channel,
                delivered = report.delivered,
                failed = report.failed,
                "Dispatched envelope"
            );
        }
        tracing::debug!("Dispatcher stopped");
    })
}
