mod support;

use std::collections::{HashMap, HashSet};

use monitor::alerts::{
    AlertFilter, AlertId, AlertTransition, ResolveOutcome, ResolveReason, TransitionKind,
};
use monitor::error::EngineError;
use monitor::rules::{RuleKind, Severity};
use support::*;

#[tokio::test]
async fn depeg_opens_medium_only_past_five_percent() {
    let engine = start(test_config());
    let mut feed = engine.subscribe_transitions("test");

    engine.submit(tick("USDC", 1_000, 1.00)).unwrap();
    engine.submit(tick("USDC", 2_000, 0.97)).unwrap();
    engine.submit(tick("USDC", 3_000, 0.94)).unwrap();

    wait_until(|| !engine.active_alerts(&AlertFilter::default()).is_empty()).await;
    let open = engine.active_alerts(&AlertFilter::default());
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, RuleKind::Depeg);
    assert_eq!(open[0].severity, Severity::Medium);
    assert_eq!(open[0].opened_at_ms, 3_000);

    engine.shutdown().await;
    let transitions = drain(&mut feed);
    assert_eq!(transitions.len(), 1);
    assert!(matches!(transitions[0], AlertTransition::Opened { .. }));
}

#[tokio::test]
async fn volume_spike_of_five_and_a_half_is_high() {
    let mut cfg = test_config();
    cfg.state.volume_bucket_ms = 60_000;
    let engine = start(cfg);
    let mut feed = engine.subscribe_transitions("test");

    for bucket in 0..10u64 {
        engine
            .submit(swap("ETH/USDC", bucket * 60_000, 100.0, 200_000.0))
            .unwrap();
    }
    engine
        .submit(swap("ETH/USDC", 10 * 60_000, 550.0, 1_100_000.0))
        .unwrap();

    let report = engine.shutdown().await;
    assert_eq!(report.events_processed, 11);

    let transitions = drain(&mut feed);
    assert_eq!(transitions.len(), 1);
    let alert = transitions[0].alert();
    assert_eq!(alert.kind, RuleKind::VolumeSpike);
    assert_eq!(alert.severity, Severity::High);
    assert!((alert.details.observed - 5.5).abs() < 1e-9);
}

#[tokio::test]
async fn late_event_is_merged_but_not_evaluated() {
    let engine = start(test_config());
    let mut feed = engine.subscribe_transitions("test");

    engine.submit(tick("USDC", 10, 0.5)).unwrap();
    engine.submit(tick("USDC", 30, 0.5)).unwrap();
    engine.submit(tick("USDC", 20, 0.5)).unwrap();

    wait_until(|| engine.counters().events_stale == 1).await;
    assert_eq!(engine.price_history("USDC", 1_000).len(), 3);

    engine.shutdown().await;
    let kinds: Vec<_> = drain(&mut feed).iter().map(|t| t.kind()).collect();
    assert_eq!(kinds, vec![TransitionKind::Opened, TransitionKind::Refreshed]);
}

#[tokio::test]
async fn resolve_is_idempotent_and_unknown_ids_are_not_found() {
    let engine = start(test_config());
    let mut feed = engine.subscribe_transitions("test");

    engine.submit(tick("DAI", 1_000, 0.8)).unwrap();
    wait_until(|| engine.alert_stats().open == 1).await;
    let id = engine.active_alerts(&AlertFilter::default())[0].id;

    let first = engine.resolve_alert(id).unwrap();
    assert!(matches!(first, ResolveOutcome::Resolved(ref a) if a.resolved_at_ms == Some(1_000)));
    assert_eq!(engine.resolve_alert(id).unwrap(), ResolveOutcome::AlreadyResolved);

    let unknown = uuid::Uuid::new_v4();
    assert_eq!(engine.resolve_alert(unknown), Err(EngineError::NotFound(unknown)));
    assert_eq!(engine.alert(unknown), Err(EngineError::NotFound(unknown)));
    assert_eq!(engine.alert(id).unwrap().resolved_at_ms, Some(1_000));

    engine.shutdown().await;
    let transitions = drain(&mut feed);
    assert_eq!(transitions.len(), 2);
    assert!(matches!(
        transitions[1],
        AlertTransition::Resolved {
            reason: ResolveReason::Manual,
            ..
        }
    ));
}

#[tokio::test]
async fn sweep_resolves_at_the_watermark_after_grace() {
    let mut cfg = test_config();
    cfg.lifecycle.grace_ms = 1_000;
    let engine = start(cfg);
    let mut feed = engine.subscribe_transitions("test");

    engine.submit(tick("USDT", 1_000, 0.5)).unwrap();
    wait_until(|| engine.alert_stats().open == 1).await;
    let id = engine.active_alerts(&AlertFilter::default())[0].id;

    // Within grace: nothing happens.
    engine.submit(tick("ETH", 2_000, 2_000.0)).unwrap();
    wait_until(|| engine.watermark() == 2_000).await;
    assert_eq!(engine.sweep_now().await, 0);

    engine.submit(tick("ETH", 5_000, 2_000.0)).unwrap();
    wait_until(|| engine.watermark() == 5_000).await;
    assert_eq!(engine.sweep_now().await, 1);

    let alert = engine.alert(id).unwrap();
    assert_eq!(alert.resolved_at_ms, Some(5_000));
    assert!(engine.active_alerts(&AlertFilter::default()).is_empty());

    // A new finding after resolution opens a new occurrence.
    engine.submit(tick("USDT", 6_000, 0.5)).unwrap();
    wait_until(|| engine.alert_stats().open == 1).await;
    assert_ne!(engine.active_alerts(&AlertFilter::default())[0].id, id);

    engine.shutdown().await;
    let transitions = drain(&mut feed);
    assert!(matches!(
        transitions[1],
        AlertTransition::Resolved {
            reason: ResolveReason::Expired,
            ..
        }
    ));
    assert_eq!(transitions.len(), 3);
}

#[tokio::test]
async fn oracle_pool_swaps_feed_asset_prices() {
    let mut cfg = test_config();
    cfg.state
        .oracle_pools
        .insert("ETH/USDC".into(), vec!["USDC".into()]);
    let engine = start(cfg);

    // USDC is the output token, so its implied price is amount_in / amount_out.
    engine.submit(swap("ETH/USDC", 1_000, 94.0, 100.0)).unwrap();

    wait_until(|| engine.alert_stats().open == 1).await;
    let alert = &engine.active_alerts(&AlertFilter::default())[0];
    assert_eq!(alert.subject_key, "USDC");
    assert_eq!(alert.kind, RuleKind::Depeg);
    assert_eq!(alert.severity, Severity::Medium);

    let history = engine.price_history("USDC", 60_000);
    assert_eq!(history.len(), 1);
    assert!((history[0].price - 0.94).abs() < 1e-12);

    engine.shutdown().await;
}

#[tokio::test]
async fn queries_and_counters_reflect_processed_events() {
    let engine = start(test_config());

    for ts in 1..=5u64 {
        engine
            .submit(swap("ETH/USDC", ts * 1_000, ts as f64, 2_000.0 * ts as f64))
            .unwrap();
    }
    engine.submit(tick("ETH", 1_000, f64::NAN)).unwrap();

    wait_until(|| engine.recent_swaps("ETH/USDC", 10).len() == 5).await;
    wait_until(|| engine.counters().events_malformed == 1).await;

    let recent = engine.recent_swaps("ETH/USDC", 2);
    assert_eq!(recent[0].ts_ms, 5_000);
    assert_eq!(recent[1].ts_ms, 4_000);

    let counters = engine.counters();
    assert_eq!(counters.events_accepted, 6);
    assert_eq!(counters.events_rejected, 0);
    assert!(engine.price_history("ETH", 60_000).is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn liquidity_pull_raises_a_drain_alert() {
    let engine = start(test_config());

    for ts in 1..=3u64 {
        engine.submit(liquidity("DAI/USDC", ts, 1_000.0)).unwrap();
    }
    engine.submit(liquidity("DAI/USDC", 4, 300.0)).unwrap();

    wait_until(|| engine.alert_stats().open == 1).await;
    let alert = &engine.active_alerts(&AlertFilter::default())[0];
    assert_eq!(alert.kind, RuleKind::LiquidityDrain);
    assert_eq!(alert.severity, Severity::Critical);

    engine.shutdown().await;
}

#[tokio::test]
async fn later_swaps_do_not_reopen_a_resolved_drain() {
    let mut cfg = test_config();
    cfg.lifecycle.grace_ms = 1_000;
    let engine = start(cfg);
    let mut feed = engine.subscribe_transitions("test");

    for ts in 1..=3u64 {
        engine.submit(liquidity("DAI/USDC", ts, 1_000.0)).unwrap();
    }
    engine.submit(liquidity("DAI/USDC", 4, 300.0)).unwrap();
    wait_until(|| engine.alert_stats().open == 1).await;

    for ts in [5_000u64, 10_000, 15_000, 20_000] {
        engine.submit(swap("DAI/USDC", ts, 10.0, 10.0)).unwrap();
        wait_until(|| engine.watermark() == ts).await;
        engine.sweep_now().await;
    }

    engine.shutdown().await;
    let drains: Vec<_> = drain(&mut feed)
        .into_iter()
        .filter(|t| t.alert().kind == RuleKind::LiquidityDrain)
        .collect();
    let ids: HashSet<_> = drains.iter().map(|t| t.alert().id).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(drains.len(), 2);
    assert!(matches!(drains[0], AlertTransition::Opened { .. }));
    assert!(matches!(
        drains[1],
        AlertTransition::Resolved {
            reason: ResolveReason::Expired,
            ..
        }
    ));
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() {
    let engine = start(test_config());
    let bus = engine.bus();
    engine.shutdown().await;

    assert_eq!(
        bus.submit(tick("ETH", 1, 1.0)),
        Err(EngineError::ShuttingDown)
    );
}

#[tokio::test]
async fn invalid_configuration_refuses_to_start() {
    let mut cfg = test_config();
    cfg.runtime.partitions = 0;
    assert!(matches!(
        monitor::engine::Engine::start(cfg),
        Err(EngineError::ConfigInvalid(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_keep_one_open_alert_per_key() {
    let engine = start(test_config());
    let mut feed = engine.subscribe_transitions("test");
    let ctx = engine.context();
    let assets = ["USDC", "USDT", "DAI", "FRAX"];

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let bus = engine.bus();
            tokio::spawn(async move {
                for i in 0..50u64 {
                    let asset = assets[(i % 4) as usize];
                    let price = if i % 3 == 0 { 0.7 } else { 0.93 };
                    bus.submit(tick(asset, p * 1_000 + i, price)).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.await.unwrap();
    }

    let report = engine.shutdown().await;
    assert_eq!(report.events_processed, 200);
    assert!(!report.timed_out);

    let mut open: HashMap<(RuleKind, String), AlertId> = HashMap::new();
    for t in drain(&mut feed) {
        let alert = t.alert();
        let key = (alert.kind, alert.subject_key.clone());
        match &t {
            AlertTransition::Opened { .. } => {
                let previous = open.insert(key.clone(), alert.id);
                assert!(previous.is_none(), "second open alert for {key:?}");
            }
            AlertTransition::Refreshed { .. } => {
                assert_eq!(open.get(&key), Some(&alert.id));
            }
            AlertTransition::Resolved { .. } => {
                open.remove(&key);
            }
        }
    }
    assert_eq!(open.len(), 4);

    let stats = ctx.lifecycle.stats();
    assert_eq!(stats.open, 4);
    assert_eq!(stats.open_by_kind.get(&RuleKind::Depeg), Some(&4));
}

#[tokio::test]
async fn escalation_is_published_and_never_reverts() {
    let engine = start(test_config());
    let mut feed = engine.subscribe_transitions("test");

    engine.submit(tick("FRAX", 1, 0.94)).unwrap();
    engine.submit(tick("FRAX", 2, 0.70)).unwrap();
    engine.submit(tick("FRAX", 3, 0.94)).unwrap();

    engine.shutdown().await;
    let transitions = drain(&mut feed);
    assert_eq!(transitions.len(), 3);

    match &transitions[1] {
        AlertTransition::Refreshed {
            alert,
            previous_severity,
            severity_changed,
        } => {
            assert_eq!(*previous_severity, Severity::Medium);
            assert_eq!(alert.severity, Severity::Critical);
            assert!(*severity_changed);
        }
        other => panic!("expected escalation, got {other:?}"),
    }
    assert_eq!(transitions[2].alert().severity, Severity::Critical);
    assert!(matches!(
        transitions[2],
        AlertTransition::Refreshed {
            severity_changed: false,
            ..
        }
    ));
}
