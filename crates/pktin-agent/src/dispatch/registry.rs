use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;

use pktin_core::error::{ErrorKind, PacketInError, Result};
use pktin_core::{PacketInEvent, ReasonCode};

/// Consumer of packet-in events for one or more reason codes.
///
/// Handlers run inline on their reason's worker and must bound their own
/// execution time; the registry applies no timeout.
#[async_trait]
pub trait PacketInHandler: Send + Sync {
    async fn handle_packet_in(&self, event: &PacketInEvent) -> Result<()>;

    /// Release resources at engine shutdown.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One handler that reported an error while processing an event.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub handler: String,
    pub kind: ErrorKind,
}

/// Result of running every handler registered under a reason.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
    pub timings: Vec<(String, Duration)>,
}

/// Registry of named handlers, keyed by reason code.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<ReasonCode, DashMap<String, Arc<dyn PacketInHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register `handler` under `reason`; an existing handler with the same name is replaced.
    pub fn register(&self, reason: ReasonCode, name: impl Into<String>, handler: Arc<dyn PacketInHandler>) {
        let name = name.into();
        let replaced = self
            .handlers
            .entry(reason)
            .or_default()
            .insert(name.clone(), handler)
            .is_some();
        if replaced {
            tracing::debug!(%reason, handler = %name, "packet-in handler replaced");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|e| e.value().is_empty())
    }

    pub fn registered_reasons(&self) -> Vec<ReasonCode> {
        let mut out: Vec<ReasonCode> = self
            .handlers
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect();
        out.sort();
        out
    }

    pub fn handler_names(&self, reason: ReasonCode) -> Vec<String> {
        let mut out: Vec<String> = self
            .handlers
            .get(&reason)
            .map(|m| m.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Snapshot so no map guard is held while handlers run.
    fn snapshot(&self, reason: ReasonCode) -> Vec<(String, Arc<dyn PacketInHandler>)> {
        self.handlers
            .get(&reason)
            .map(|m| {
                m.iter()
                    .map(|e| (e.key().clone(), Arc::clone(e.value())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run every handler registered under `reason`. A failing or panicking
    /// handler is logged and does not keep its siblings from seeing the event.
    pub async fn dispatch(&self, reason: ReasonCode, event: &PacketInEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for (name, handler) in self.snapshot(reason) {
            let started = Instant::now();
            let res = AssertUnwindSafe(handler.handle_packet_in(event))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(PacketInError::handler(format!(
                        "handler panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            outcome.invoked += 1;
            outcome.timings.push((name.clone(), started.elapsed()));

            if let Err(e) = res {
                tracing::error!(
                    %reason,
                    handler = %name,
                    kind = e.kind().as_str(),
                    error = %e,
                    "packet-in handler failed to process packet"
                );
                outcome.failures.push(HandlerFailure {
                    handler: name,
                    kind: e.kind(),
                });
            }
        }
        if outcome.invoked == 0 {
            tracing::debug!(%reason, "no packet-in handler registered, event dropped");
        }
        outcome
    }

    /// Close every registered handler once, even if it is registered under several reasons.
    pub fn close_all(&self) {
        let mut closed: Vec<Arc<dyn PacketInHandler>> = Vec::new();
        for reason in self.registered_reasons() {
            for (name, handler) in self.snapshot(reason) {
                if closed.iter().any(|c| Arc::ptr_eq(c, &handler)) {
                    continue;
                }
                if let Err(e) = handler.close() {
                    tracing::warn!(%reason, handler = %name, error = %e, "packet-in handler close failed");
                }
                closed.push(handler);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
