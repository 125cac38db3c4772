//! Prioritized fan-in over reason-coded subscription channels.
//!
//! Trace-class channels are polled without blocking before every wait, and the
//! multi-way wait itself is `biased` towards stop, then trace, then audit. A
//! ready trace event therefore always wins over a ready audit event, while an
//! idle trace lane never starves audit. Channels of the same class are served
//! round-robin, so one flooded reason cannot starve its siblings.

use std::future::poll_fn;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};

use pktin_core::{PacketInEvent, ReasonCode};

use crate::config::ReasonClass;

/// One reason-coded receive channel obtained from the switch.
pub struct Subscription {
    pub reason: ReasonCode,
    rx: mpsc::Receiver<PacketInEvent>,
}

impl Subscription {
    pub fn new(reason: ReasonCode, rx: mpsc::Receiver<PacketInEvent>) -> Self {
        Self { reason, rx }
    }
}

/// What the fan-in loop observed next.
#[derive(Debug)]
pub enum FanInEvent {
    Packet(ReasonCode, PacketInEvent),
    /// The switch closed this reason's channel; it is no longer polled.
    Closed(ReasonCode),
    Stop,
}

/// Subscriptions of one class, served round-robin.
#[derive(Default)]
struct Lane {
    subs: Vec<Subscription>,
    /// Index polled first on the next call; moves past whichever channel was served.
    cursor: usize,
}

impl Lane {
    /// Channel indexes in polling order for this call.
    fn order(&self) -> Vec<usize> {
        let len = self.subs.len();
        let start = self.cursor.checked_rem(len).unwrap_or(0);
        (0..len).map(|i| (start + i) % len).collect()
    }

    fn served(&mut self, idx: usize, reason: ReasonCode, ev: PacketInEvent) -> FanInEvent {
        self.cursor = idx + 1;
        FanInEvent::Packet(reason, ev)
    }

    fn closed(&mut self, idx: usize) -> FanInEvent {
        let sub = self.subs.remove(idx);
        self.cursor = idx;
        FanInEvent::Closed(sub.reason)
    }

    fn try_recv(&mut self) -> Option<FanInEvent> {
        for idx in self.order() {
            match self.subs[idx].rx.try_recv() {
                Ok(ev) => {
                    let reason = self.subs[idx].reason;
                    return Some(self.served(idx, reason, ev));
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Some(self.closed(idx)),
            }
        }
        None
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<FanInEvent> {
        for idx in self.order() {
            match self.subs[idx].rx.poll_recv(cx) {
                Poll::Ready(Some(ev)) => {
                    let reason = self.subs[idx].reason;
                    return Poll::Ready(self.served(idx, reason, ev));
                }
                Poll::Ready(None) => return Poll::Ready(self.closed(idx)),
                Poll::Pending => {}
            }
        }
        Poll::Pending
    }
}

#[derive(Default)]
pub struct FanIn {
    trace: Lane,
    audit: Lane,
}

impl FanIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, class: ReasonClass, sub: Subscription) {
        match class {
            ReasonClass::Trace => self.trace.subs.push(sub),
            ReasonClass::Audit => self.audit.subs.push(sub),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trace.subs.is_empty() && self.audit.subs.is_empty()
    }

    /// Wait for the next event according to the priority policy.
    pub async fn next(&mut self, stop: &mut watch::Receiver<bool>) -> FanInEvent {
        if *stop.borrow() {
            return FanInEvent::Stop;
        }

        // Non-blocking pass over the high-priority lane first.
        if let Some(ev) = self.trace.try_recv() {
            return ev;
        }

        let Self { trace, audit } = self;
        tokio::select! {
            biased;
            _ = stopped(stop) => FanInEvent::Stop,
            ev = recv_lane(trace) => ev,
            ev = recv_lane(audit) => ev,
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        // Sender gone: nobody can stop us any more, treat it as a stop.
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Pending forever on an empty lane, so the other `select!` arms decide.
async fn recv_lane(lane: &mut Lane) -> FanInEvent {
    poll_fn(|cx| lane.poll_recv(cx)).await
}
