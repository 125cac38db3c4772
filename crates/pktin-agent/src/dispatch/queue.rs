//! Per-reason work queues between the fan-in loop and the reason's worker.
//!
//! - `FifoQueue`: bounded, drop-on-full, strict arrival order (trace class).
//! - `RateLimitedQueue`: delays items by `RateLimiter` policy (audit class).
//!
//! Both are single-consumer: exactly one worker calls `get`. `shut_down` is
//! idempotent and wakes a blocked `get`, which then returns `None` once no
//! ready item is left.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, Notify};

use pktin_core::error::{PacketInError, Result};
use pktin_core::PacketInEvent;

use crate::config::{RateLimitConfig, ReasonClass};
use crate::dispatch::limiter::RateLimiter;

/// Queue variant chosen per reason class.
pub enum ReasonQueue {
    Fifo(FifoQueue),
    RateLimited(RateLimitedQueue),
}

impl ReasonQueue {
    pub fn for_class(class: ReasonClass, trace_capacity: usize, rate_limit: &RateLimitConfig) -> Self {
        match class {
            ReasonClass::Trace => ReasonQueue::Fifo(FifoQueue::new(trace_capacity)),
            ReasonClass::Audit => ReasonQueue::RateLimited(RateLimitedQueue::new(rate_limit)),
        }
    }

    /// Non-blocking enqueue. Never waits on the consumer.
    pub fn add(&self, event: PacketInEvent) -> Result<()> {
        match self {
            ReasonQueue::Fifo(q) => q.add(event),
            ReasonQueue::RateLimited(q) => q.add(event),
        }
    }

    /// Wait for the next item; `None` means the queue was shut down.
    pub async fn get(&self) -> Option<PacketInEvent> {
        match self {
            ReasonQueue::Fifo(q) => q.get().await,
            ReasonQueue::RateLimited(q) => q.get().await,
        }
    }

    /// Drop any backoff bookkeeping for `event`'s flow.
    pub fn forget(&self, event: &PacketInEvent) {
        match self {
            ReasonQueue::Fifo(_) => {}
            ReasonQueue::RateLimited(q) => q.forget(event),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReasonQueue::Fifo(q) => q.len(),
            ReasonQueue::RateLimited(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        match self {
            ReasonQueue::Fifo(q) => q.shut_down(),
            ReasonQueue::RateLimited(q) => q.shut_down(),
        }
    }
}

/// Bounded FIFO backed by a tokio mpsc channel.
pub struct FifoQueue {
    tx: Mutex<Option<mpsc::Sender<PacketInEvent>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PacketInEvent>>,
    capacity: usize,
}

impl FifoQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            capacity,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<PacketInEvent>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, event: PacketInEvent) -> Result<()> {
        let guard = self.sender();
        let tx = guard.as_ref().ok_or(PacketInError::QueueClosed)?;
        tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PacketInError::QueueOverflow,
            mpsc::error::TrySendError::Closed(_) => PacketInError::QueueClosed,
        })
    }

    pub async fn get(&self) -> Option<PacketInEvent> {
        self.rx.lock().await.recv().await
    }

    /// Items waiting; 0 after shutdown.
    pub fn len(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dropping the sender lets the worker drain what is queued, then see `None`.
    pub fn shut_down(&self) {
        self.sender().take();
    }
}

struct Pending {
    ready_at: Instant,
    seq: u64,
    event: PacketInEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct RateLimitedInner {
    heap: BinaryHeap<Reverse<Pending>>,
    limiter: RateLimiter,
    seq: u64,
    shutting_down: bool,
}

/// Delaying queue: each item becomes visible to `get` once its delay expires.
/// Equal ready times keep arrival order.
pub struct RateLimitedQueue {
    inner: Mutex<RateLimitedInner>,
    notify: Notify,
    max_pending: usize,
}

impl RateLimitedQueue {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            inner: Mutex::new(RateLimitedInner {
                heap: BinaryHeap::new(),
                limiter: RateLimiter::new(cfg),
                seq: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
            max_pending: cfg.max_pending.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimitedInner> {
        // A panic while holding this lock cannot leave the heap half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, event: PacketInEvent) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.shutting_down {
                return Err(PacketInError::QueueClosed);
            }
            if inner.heap.len() >= self.max_pending {
                return Err(PacketInError::QueueOverflow);
            }

            let now = Instant::now();
            let delay = inner.limiter.when(event.flow_key(), now);
            let seq = inner.seq;
            inner.seq += 1;
            inner.heap.push(Reverse(Pending {
                ready_at: now + delay,
                seq,
                event,
            }));
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn get(&self) -> Option<PacketInEvent> {
        loop {
            let wait = {
                let mut inner = self.lock();
                let now = Instant::now();
                match inner.heap.peek().map(|Reverse(p)| p.ready_at) {
                    Some(ready_at) if ready_at <= now => {
                        return inner.heap.pop().map(|Reverse(p)| p.event);
                    }
                    // Delayed items are discarded on shutdown.
                    _ if inner.shutting_down => return None,
                    Some(ready_at) => Some(ready_at - now),
                    None => None,
                }
            };

            match wait {
                Some(d) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(d) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub fn forget(&self, event: &PacketInEvent) {
        self.lock().limiter.forget(event.flow_key());
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Flows with live backoff state.
    pub fn tracked_flows(&self) -> usize {
        self.lock().limiter.tracked()
    }

    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_one();
    }
}
