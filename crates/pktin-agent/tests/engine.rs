//! Dispatch engine lifecycle, end to end.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use pktin_agent::audit::{AuditSink, ConjunctionResolver, PolicyIdentity};
use pktin_agent::config::{AgentConfig, DispatchSection};
use pktin_agent::dispatch::{DispatchEngine, HandlerRegistry, PacketInHandler, PacketInSource};
use pktin_agent::obs::AgentMetrics;
use pktin_agent::{PacketInAgent, AUDIT_HANDLER_NAME};
use pktin_core::error::{PacketInError, Result};
use pktin_core::protocol::{EthernetFrame, Ipv4Header, MatchSet};
use pktin_core::{PacketInEvent, ReasonCode};

/// Hands out pre-built receivers; reasons listed in `failing` refuse to subscribe.
#[derive(Default)]
struct FakeSwitch {
    channels: Mutex<HashMap<ReasonCode, mpsc::Receiver<PacketInEvent>>>,
    failing: Vec<ReasonCode>,
}

impl FakeSwitch {
    fn channel(&self, reason: ReasonCode, cap: usize) -> mpsc::Sender<PacketInEvent> {
        let (tx, rx) = mpsc::channel(cap);
        self.channels.lock().unwrap().insert(reason, rx);
        tx
    }
}

impl PacketInSource for FakeSwitch {
    fn subscribe(&self, reason: ReasonCode) -> Result<mpsc::Receiver<PacketInEvent>> {
        if self.failing.contains(&reason) {
            return Err(PacketInError::Subscription {
                reason: reason.as_u8(),
                msg: "switch refused".into(),
            });
        }
        self.channels
            .lock()
            .unwrap()
            .remove(&reason)
            .ok_or_else(|| PacketInError::Subscription {
                reason: reason.as_u8(),
                msg: "already subscribed".into(),
            })
    }
}

/// Records `(reason, table_id)` in dispatch order.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(ReasonCode, u8)>>,
    closed: Mutex<bool>,
}

#[async_trait]
impl PacketInHandler for Recorder {
    async fn handle_packet_in(&self, event: &PacketInEvent) -> Result<()> {
        self.seen.lock().unwrap().push((event.reason, event.table_id));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

fn event(reason: ReasonCode, table_id: u8) -> PacketInEvent {
    PacketInEvent::new(reason, table_id, MatchSet::new(), None)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn engine_with(recorder: Arc<Recorder>) -> (DispatchEngine, Arc<AgentMetrics>) {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(ReasonCode::TRACEFLOW, "rec", recorder.clone());
    registry.register(ReasonCode::NETWORK_POLICY, "rec", recorder);
    let metrics = Arc::new(AgentMetrics::new());
    (
        DispatchEngine::new(DispatchSection::default(), registry, metrics.clone()),
        metrics,
    )
}

#[tokio::test]
async fn dispatches_both_reasons_and_stops() {
    let switch = Arc::new(FakeSwitch::default());
    let trace_tx = switch.channel(ReasonCode::TRACEFLOW, 8);
    let audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    let recorder = Arc::new(Recorder::default());
    let (engine, metrics) = engine_with(recorder.clone());
    let engine = Arc::new(engine);
    let (stop_tx, stop) = watch::channel(false);

    let run = {
        let engine = engine.clone();
        let switch = switch.clone();
        tokio::spawn(async move { engine.run(switch.as_ref(), stop).await })
    };

    trace_tx.send(event(ReasonCode::TRACEFLOW, 1)).await.unwrap();
    audit_tx.send(event(ReasonCode::NETWORK_POLICY, 2)).await.unwrap();
    wait_until(|| recorder.seen.lock().unwrap().len() == 2).await;

    stop_tx.send(true).unwrap();
    let res = tokio::time::timeout(Duration::from_secs(2), run).await.expect("engine must stop");
    res.unwrap().unwrap();

    assert!(*recorder.closed.lock().unwrap());
    assert_eq!(metrics.events_received.get(&[("reason", "traceflow")]), 1);
    assert_eq!(metrics.events_received.get(&[("reason", "networkpolicy")]), 1);
    assert_eq!(metrics.workers_active.get(&[("reason", "traceflow")]), 0);
}

#[tokio::test]
async fn failed_subscription_skips_only_that_reason() {
    let switch = Arc::new(FakeSwitch {
        failing: vec![ReasonCode::TRACEFLOW],
        ..Default::default()
    });
    let audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    let recorder = Arc::new(Recorder::default());
    let (engine, metrics) = engine_with(recorder.clone());
    let engine = Arc::new(engine);
    let (stop_tx, stop) = watch::channel(false);

    let run = {
        let engine = engine.clone();
        let switch = switch.clone();
        tokio::spawn(async move { engine.run(switch.as_ref(), stop).await })
    };

    audit_tx.send(event(ReasonCode::NETWORK_POLICY, 3)).await.unwrap();
    wait_until(|| !recorder.seen.lock().unwrap().is_empty()).await;
    assert_eq!(metrics.subscription_errors.get(&[("reason", "traceflow")]), 1);

    drop(stop_tx);
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("dropped stop sender must stop the engine")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn stop_with_pending_items_terminates() {
    let switch = Arc::new(FakeSwitch::default());
    let _trace_tx = switch.channel(ReasonCode::TRACEFLOW, 8);
    let audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 64);

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(ReasonCode::NETWORK_POLICY, "rec", Arc::new(Recorder::default()));
    let mut cfg = DispatchSection::default();
    // every repeat of the same flow waits seconds
    cfg.rate_limit.base_delay_ms = 5_000;
    cfg.rate_limit.max_delay_ms = 10_000;
    let engine = Arc::new(DispatchEngine::new(cfg, registry, Arc::new(AgentMetrics::new())));
    let (stop_tx, stop) = watch::channel(false);

    for _ in 0..10 {
        audit_tx.send(event(ReasonCode::NETWORK_POLICY, 4)).await.unwrap();
    }
    let run = {
        let engine = engine.clone();
        let switch = switch.clone();
        tokio::spawn(async move { engine.run(switch.as_ref(), stop).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("engine must stop with delayed items queued")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn stop_before_any_traffic_terminates() {
    let switch = Arc::new(FakeSwitch::default());
    let _trace_tx = switch.channel(ReasonCode::TRACEFLOW, 8);
    let _audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    let (engine, _) = engine_with(Arc::new(Recorder::default()));
    let (stop_tx, stop) = watch::channel(false);
    stop_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), engine.run(switch.as_ref(), stop))
        .await
        .expect("engine must stop")
        .unwrap();
}

#[tokio::test]
async fn empty_registry_returns_immediately() {
    let switch = FakeSwitch::default();
    let engine = DispatchEngine::new(
        DispatchSection::default(),
        Arc::new(HandlerRegistry::new()),
        Arc::new(AgentMetrics::new()),
    );
    let (_stop_tx, stop) = watch::channel(false);

    tokio::time::timeout(Duration::from_millis(200), engine.run(&switch, stop))
        .await
        .expect("nothing to run")
        .unwrap();
}

#[tokio::test]
async fn trace_overflow_is_counted_as_drop() {
    let switch = Arc::new(FakeSwitch::default());
    let trace_tx = switch.channel(ReasonCode::TRACEFLOW, 64);
    let _audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    /// Holds the trace worker until released.
    struct Gate(tokio::sync::Semaphore);

    #[async_trait]
    impl PacketInHandler for Gate {
        async fn handle_packet_in(&self, _event: &PacketInEvent) -> Result<()> {
            let _permit = self.0.acquire().await.map_err(|e| PacketInError::handler(e.to_string()))?;
            Ok(())
        }
    }

    let gate = Arc::new(Gate(tokio::sync::Semaphore::new(0)));
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(ReasonCode::TRACEFLOW, "gate", gate.clone());
    let mut cfg = DispatchSection::default();
    cfg.trace_queue_capacity = 2;
    let metrics = Arc::new(AgentMetrics::new());
    let engine = Arc::new(DispatchEngine::new(cfg, registry, metrics.clone()));
    let (stop_tx, stop) = watch::channel(false);

    let run = {
        let engine = engine.clone();
        let switch = switch.clone();
        tokio::spawn(async move { engine.run(switch.as_ref(), stop).await })
    };

    // one in the handler, two queued, the rest dropped
    for t in 0..10 {
        trace_tx.send(event(ReasonCode::TRACEFLOW, t)).await.unwrap();
    }
    let dropped = || {
        metrics
            .events_dropped
            .get(&[("reason", "traceflow"), ("cause", "QUEUE_OVERFLOW")])
    };
    wait_until(|| metrics.events_received.get(&[("reason", "traceflow")]) + dropped() == 10).await;
    assert!(dropped() >= 7);

    gate.0.add_permits(100);
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("engine must stop")
        .unwrap()
        .unwrap();
}

struct OneConj;

impl ConjunctionResolver for OneConj {
    fn resolve_conjunction(&self, conj_id: u32) -> Option<PolicyIdentity> {
        (conj_id == 7).then(|| PolicyIdentity {
            name: "deny-all".into(),
            namespace: "prod".into(),
            priority: "100".into(),
        })
    }
}

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl AuditSink for Lines {
    fn write_line(&self, line: &str) -> Result<()> {
        self.0.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn agent_audits_network_policy_packets() {
    let switch = Arc::new(FakeSwitch::default());
    let _trace_tx = switch.channel(ReasonCode::TRACEFLOW, 8);
    let audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    let sink = Arc::new(Lines::default());
    let agent = Arc::new(PacketInAgent::new(AgentConfig::default(), Arc::new(OneConj), sink.clone()).unwrap());
    assert_eq!(
        agent.registry().handler_names(ReasonCode::NETWORK_POLICY),
        vec![AUDIT_HANDLER_NAME.to_string()]
    );
    assert!(agent.registry().handler_names(ReasonCode::TRACEFLOW).is_empty());

    let (stop_tx, stop) = watch::channel(false);
    let run = {
        let agent = agent.clone();
        let switch = switch.clone();
        tokio::spawn(async move { agent.run(switch.as_ref(), stop).await })
    };

    let frame = EthernetFrame::ipv4(Ipv4Header {
        src: Ipv4Addr::new(10, 1, 0, 5),
        dst: Ipv4Addr::new(10, 1, 0, 9),
        total_length: 84,
        ttl: 64,
        protocol: 1,
    });
    let matches = MatchSet::new().with_register(6, 7).with_register(3, 1);
    audit_tx
        .send(PacketInEvent::new(ReasonCode::NETWORK_POLICY, 85, matches, Some(frame)))
        .await
        .unwrap();
    // undecodable: dropped with an error, no line
    audit_tx
        .send(PacketInEvent::new(ReasonCode::NETWORK_POLICY, 90, MatchSet::new(), None))
        .await
        .unwrap();

    let metrics = agent.metrics();
    wait_until(|| {
        metrics
            .handler_errors
            .get(&[("reason", "networkpolicy"), ("handler", AUDIT_HANDLER_NAME), ("kind", "DECODE")])
            == 1
    })
    .await;
    assert_eq!(
        sink.0.lock().unwrap().clone(),
        vec!["AntreaPolicyIngressRule prod/deny-all Drop 100 SRC: 10.1.0.5 DEST: 10.1.0.9 84 ICMP"]
    );

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("agent must stop")
        .unwrap()
        .unwrap();
}

#[test]
fn disabled_audit_registers_nothing() {
    let mut cfg = AgentConfig::default();
    cfg.audit.enabled = false;
    let agent = PacketInAgent::new(cfg, Arc::new(OneConj), Arc::new(Lines::default())).unwrap();
    assert!(agent.registry().is_empty());
}

#[tokio::test]
async fn panicking_handler_does_not_stop_its_worker() {
    let switch = Arc::new(FakeSwitch::default());
    let trace_tx = switch.channel(ReasonCode::TRACEFLOW, 8);
    let _audit_tx = switch.channel(ReasonCode::NETWORK_POLICY, 8);

    struct PanicsOnTable1;

    #[async_trait]
    impl PacketInHandler for PanicsOnTable1 {
        async fn handle_packet_in(&self, event: &PacketInEvent) -> Result<()> {
            assert_ne!(event.table_id, 1, "table 1 is poison");
            Ok(())
        }
    }

    let recorder = Arc::new(Recorder::default());
    let (engine, metrics) = engine_with(recorder.clone());
    engine.registry().register(ReasonCode::TRACEFLOW, "poison", Arc::new(PanicsOnTable1));
    let engine = Arc::new(engine);
    let (stop_tx, stop) = watch::channel(false);

    let run = {
        let engine = engine.clone();
        let switch = switch.clone();
        tokio::spawn(async move { engine.run(switch.as_ref(), stop).await })
    };

    for t in 0..5 {
        trace_tx.send(event(ReasonCode::TRACEFLOW, t)).await.unwrap();
    }
    wait_until(|| recorder.seen.lock().unwrap().len() == 5).await;
    assert_eq!(
        metrics
            .handler_errors
            .get(&[("reason", "traceflow"), ("handler", "poison"), ("kind", "HANDLER")]),
        1
    );
    assert_eq!(metrics.workers_active.get(&[("reason", "traceflow")]), 1);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("engine must stop")
        .unwrap()
        .unwrap();
    assert!(*recorder.closed.lock().unwrap());
}

#[tokio::test]
async fn every_subscription_failing_is_an_error() {
    let switch = FakeSwitch {
        failing: vec![ReasonCode::TRACEFLOW, ReasonCode::NETWORK_POLICY],
        ..Default::default()
    };
    let (engine, metrics) = engine_with(Arc::new(Recorder::default()));
    let (_stop_tx, stop) = watch::channel(false);

    let err = tokio::time::timeout(Duration::from_millis(200), engine.run(&switch, stop))
        .await
        .expect("nothing to run")
        .expect_err("no reason subscribed");
    assert_eq!(err.kind().as_str(), "SUBSCRIPTION");
    assert_eq!(metrics.subscription_errors.get(&[("reason", "traceflow")]), 1);
    assert_eq!(metrics.subscription_errors.get(&[("reason", "networkpolicy")]), 1);
}
