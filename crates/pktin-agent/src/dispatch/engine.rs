//! Reason-coded dispatch engine.
//!
//! Lifecycle per configured reason:
//! `Unsubscribed -> Subscribed & draining -> shutting down -> stopped`.
//!
//! - subscribe one channel per reason from the switch (failures skip that reason only),
//! - one queue per reason (trace: bounded FIFO, audit: rate-limited),
//! - one fan-in loop feeding the queues, never blocking on a consumer,
//! - one worker per reason draining its queue into the handler registry.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use pktin_core::error::{ErrorKind, PacketInError, Result};
use pktin_core::{PacketInEvent, ReasonCode};

use crate::config::{DispatchSection, ReasonConfig};
use crate::dispatch::fanin::{FanIn, FanInEvent, Subscription};
use crate::dispatch::queue::ReasonQueue;
use crate::dispatch::registry::HandlerRegistry;
use crate::obs::metrics::AgentMetrics;

/// Switch-side subscription interface.
pub trait PacketInSource: Send + Sync {
    /// Obtain the receive channel for `reason`. Called once per reason before dispatch starts.
    fn subscribe(&self, reason: ReasonCode) -> Result<tokio::sync::mpsc::Receiver<PacketInEvent>>;
}

struct Lane {
    reason: ReasonCode,
    name: String,
    queue: Arc<ReasonQueue>,
}

pub struct DispatchEngine {
    cfg: DispatchSection,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<AgentMetrics>,
}

impl DispatchEngine {
    pub fn new(cfg: DispatchSection, registry: Arc<HandlerRegistry>, metrics: Arc<AgentMetrics>) -> Self {
        Self {
            cfg,
            registry,
            metrics,
        }
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Subscribe, spawn workers, and run the fan-in loop until `stop` flips to
    /// `true` (or its sender is dropped). Returns after every worker has exited.
    ///
    /// Fails with the last subscription error when no configured reason could be
    /// subscribed. An empty registry is not an error: nothing is started.
    pub async fn run<S>(&self, source: &S, mut stop: watch::Receiver<bool>) -> Result<()>
    where
        S: PacketInSource + ?Sized,
    {
        if self.registry.is_empty() {
            tracing::warn!("no packet-in handler registered, dispatch not started");
            return Ok(());
        }

        let mut fanin = FanIn::new();
        let mut last_err = None;
        let mut lanes: Vec<Lane> = Vec::with_capacity(self.cfg.reasons.len());
        for rc in &self.cfg.reasons {
            match self.subscribe(source, rc) {
                Ok(sub) => {
                    let queue = Arc::new(ReasonQueue::for_class(
                        rc.class,
                        self.cfg.trace_queue_capacity,
                        &self.cfg.rate_limit,
                    ));
                    fanin.add(rc.class, sub);
                    lanes.push(Lane {
                        reason: rc.reason(),
                        name: rc.name.clone(),
                        queue,
                    });
                }
                Err(e) => {
                    tracing::error!(reason = %rc.reason(), name = %rc.name, error = %e, "subscribe packet-in failed, reason skipped");
                    self.metrics
                        .subscription_errors
                        .inc(&[("reason", rc.name.as_str())]);
                    last_err = Some(e);
                }
            }
        }

        if lanes.is_empty() {
            tracing::error!("no packet-in reason subscribed, dispatch not started");
            return last_err.map_or(Ok(()), Err);
        }

        let workers: Vec<JoinHandle<()>> = lanes
            .iter()
            .map(|lane| {
                tokio::spawn(drain_queue(
                    lane.reason,
                    lane.name.clone(),
                    Arc::clone(&lane.queue),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.metrics),
                ))
            })
            .collect();

        tracing::info!(reasons = lanes.len(), "packet-in dispatch started");

        loop {
            match fanin.next(&mut stop).await {
                FanInEvent::Packet(reason, event) => self.enqueue(&lanes, reason, event),
                FanInEvent::Closed(reason) => {
                    tracing::warn!(%reason, "packet-in subscription closed by switch");
                    if fanin.is_empty() {
                        // Nothing left to read; wait for the stop signal.
                        while !*stop.borrow_and_update() {
                            if stop.changed().await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }
                FanInEvent::Stop => break,
            }
        }

        for lane in &lanes {
            lane.queue.shut_down();
        }
        for res in join_all(workers).await {
            if let Err(e) = res {
                tracing::error!(error = %e, "packet-in worker terminated abnormally");
            }
        }
        self.registry.close_all();

        tracing::info!("packet-in dispatch stopped");
        Ok(())
    }

    fn subscribe<S>(&self, source: &S, rc: &ReasonConfig) -> Result<Subscription>
    where
        S: PacketInSource + ?Sized,
    {
        let rx = source.subscribe(rc.reason()).map_err(|e| match e {
            e @ PacketInError::Subscription { .. } => e,
            other => PacketInError::Subscription {
                reason: rc.code,
                msg: other.to_string(),
            },
        })?;
        Ok(Subscription::new(rc.reason(), rx))
    }

    fn enqueue(&self, lanes: &[Lane], reason: ReasonCode, event: PacketInEvent) {
        let Some(lane) = lanes.iter().find(|l| l.reason == reason) else {
            return;
        };
        let labels = [("reason", lane.name.as_str())];
        match lane.queue.add(event) {
            Ok(()) => self.metrics.events_received.inc(&labels),
            Err(e) => {
                if e.kind() == ErrorKind::QueueOverflow {
                    tracing::warn!(%reason, name = %lane.name, queued = lane.queue.len(), "max packet-in queue size exceeded, event dropped");
                } else {
                    tracing::warn!(%reason, name = %lane.name, error = %e, "packet-in queue not accepting events, event dropped");
                }
                self.metrics.events_dropped.inc(&[
                    ("reason", lane.name.as_str()),
                    ("cause", e.kind().as_str()),
                ]);
            }
        }
    }
}

async fn drain_queue(
    reason: ReasonCode,
    name: String,
    queue: Arc<ReasonQueue>,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<AgentMetrics>,
) {
    metrics.workers_active.inc(&[("reason", name.as_str())]);

    while let Some(event) = queue.get().await {
        let outcome = registry.dispatch(reason, &event).await;
        // Reset backoff whether the handlers succeeded or not.
        queue.forget(&event);

        for (handler, took) in &outcome.timings {
            metrics
                .dispatch_duration
                .observe(&[("reason", name.as_str()), ("handler", handler.as_str())], *took);
        }
        for f in &outcome.failures {
            metrics.handler_errors.inc(&[
                ("reason", name.as_str()),
                ("handler", f.handler.as_str()),
                ("kind", f.kind.as_str()),
            ]);
        }
    }

    metrics.workers_active.dec(&[("reason", name.as_str())]);
    tracing::debug!(%reason, name = %name, "packet-in worker stopped");
}
