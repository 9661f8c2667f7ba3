mod support;

use std::sync::Arc;
use std::time::Duration;

use monitor::alerts::{
    Alert, AlertDetails, AlertFilter, AlertTransition, ResolveReason, TransitionKind,
};
use monitor::config::LifecycleConfig;
use monitor::db::{Db, SqlxAlertRepository, spawn_retention};
use monitor::publisher::TransitionSink;
use monitor::rules::{RuleKind, Severity};
use support::*;
use uuid::Uuid;

/// Isolated in-memory SQLite database, unique per test.
async fn setup_repo() -> SqlxAlertRepository {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn_str = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let db = Db::connect(&conn_str).await.unwrap();
    db.migrate().await.unwrap();
    SqlxAlertRepository::new(db.pool)
}

fn alert(severity: Severity, revision: u32) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        kind: RuleKind::Depeg,
        subject_key: "USDC".into(),
        severity,
        opened_at_ms: 1_000,
        last_seen_ms: 1_000 + revision as u64,
        resolved_at_ms: None,
        revision,
        details: AlertDetails {
            metric: "peg_deviation".into(),
            threshold: 0.05,
            observed: 0.06,
            message: "USDC off peg".into(),
        },
    }
}

#[tokio::test]
async fn transitions_upsert_the_alert_row() {
    let repo = setup_repo().await;
    let opened = alert(Severity::Medium, 0);
    let id = opened.id;

    repo.deliver(&AlertTransition::Opened {
        alert: opened.clone(),
    })
    .await
    .unwrap();

    let stored = repo.fetch_alert(&id).await.unwrap().unwrap();
    assert_eq!(stored, opened);
    assert_eq!(repo.list_open().await.unwrap().len(), 1);

    let mut refreshed = opened.clone();
    refreshed.severity = Severity::High;
    refreshed.revision = 1;
    refreshed.last_seen_ms = 2_000;
    repo.deliver(&AlertTransition::Refreshed {
        alert: refreshed.clone(),
        previous_severity: Severity::Medium,
        severity_changed: true,
    })
    .await
    .unwrap();

    let mut resolved = refreshed.clone();
    resolved.revision = 2;
    resolved.resolved_at_ms = Some(3_000);
    repo.deliver(&AlertTransition::Resolved {
        alert: resolved.clone(),
        reason: ResolveReason::Expired,
    })
    .await
    .unwrap();

    assert_eq!(repo.fetch_alert(&id).await.unwrap().unwrap(), resolved);
    assert!(repo.list_open().await.unwrap().is_empty());
    assert_eq!(
        repo.transitions(&id).await.unwrap(),
        vec![
            (TransitionKind::Opened, 0),
            (TransitionKind::Refreshed, 1),
            (TransitionKind::Resolved, 2),
        ]
    );
}

#[tokio::test]
async fn redelivery_is_a_no_op() {
    let repo = setup_repo().await;
    let opened = alert(Severity::Medium, 0);
    let id = opened.id;
    let t = AlertTransition::Opened {
        alert: opened.clone(),
    };

    repo.deliver(&t).await.unwrap();

    let mut resolved = opened.clone();
    resolved.revision = 1;
    resolved.resolved_at_ms = Some(5_000);
    repo.deliver(&AlertTransition::Resolved {
        alert: resolved.clone(),
        reason: ResolveReason::Manual,
    })
    .await
    .unwrap();

    // A late duplicate of the opening must not reopen the row.
    repo.deliver(&t).await.unwrap();

    assert_eq!(repo.fetch_alert(&id).await.unwrap().unwrap(), resolved);
    assert_eq!(repo.transitions(&id).await.unwrap().len(), 2);
}

async fn store_resolved(repo: &SqlxAlertRepository, resolved_at_ms: u64) -> Alert {
    let opened = alert(Severity::Medium, 0);
    repo.deliver(&AlertTransition::Opened {
        alert: opened.clone(),
    })
    .await
    .unwrap();

    let mut resolved = opened;
    resolved.revision = 1;
    resolved.resolved_at_ms = Some(resolved_at_ms);
    repo.deliver(&AlertTransition::Resolved {
        alert: resolved.clone(),
        reason: ResolveReason::Expired,
    })
    .await
    .unwrap();
    resolved
}

#[tokio::test]
async fn purge_drops_only_alerts_resolved_before_the_cutoff() {
    let repo = setup_repo().await;
    let old = store_resolved(&repo, 2_000).await;
    let recent = store_resolved(&repo, 9_000).await;

    let open = alert(Severity::High, 0);
    repo.deliver(&AlertTransition::Opened {
        alert: open.clone(),
    })
    .await
    .unwrap();

    assert_eq!(repo.purge_resolved_before(5_000).await.unwrap(), 1);

    assert!(repo.fetch_alert(&old.id).await.unwrap().is_none());
    assert!(repo.transitions(&old.id).await.unwrap().is_empty());
    assert_eq!(repo.fetch_alert(&recent.id).await.unwrap().unwrap(), recent);
    assert_eq!(repo.transitions(&recent.id).await.unwrap().len(), 2);
    assert_eq!(repo.list_open().await.unwrap(), vec![open]);

    // Nothing left to purge at the same cutoff.
    assert_eq!(repo.purge_resolved_before(5_000).await.unwrap(), 0);
}

#[tokio::test]
async fn retention_task_purges_on_its_interval() {
    let repo = Arc::new(setup_repo().await);
    let resolved = store_resolved(&repo, 3_000).await;

    let config = LifecycleConfig {
        cleanup_interval_ms: 10,
        data_retention_ms: 1,
        ..LifecycleConfig::default()
    };
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = spawn_retention(repo.clone(), &config, rx);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    // A read can race the purge transaction on the shared cache; retry it.
    while !matches!(repo.fetch_alert(&resolved.id).await, Ok(None)) {
        assert!(tokio::time::Instant::now() < deadline, "alert was never purged");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn unknown_alert_reads_as_none() {
    let repo = setup_repo().await;
    assert!(repo.fetch_alert(&Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn engine_sink_persists_transitions_before_shutdown_completes() {
    let repo = Arc::new(setup_repo().await);
    let mut engine = start(test_config());
    engine.attach_sink(repo.clone());

    engine.submit(tick("USDC", 1_000, 0.85)).unwrap();
    wait_until(|| engine.alert_stats().open == 1).await;
    let id = engine.active_alerts(&AlertFilter::default())[0].id;
    engine.resolve_alert(id).unwrap();

    let report = engine.shutdown().await;
    assert_eq!(report.sink_deliveries, 2);

    let stored = repo.fetch_alert(&id).await.unwrap().unwrap();
    assert_eq!(stored.resolved_at_ms, Some(1_000));
    assert_eq!(stored.severity, Severity::High);
    assert_eq!(stored.revision, 1);
}
