use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::alerts::{Alert, AlertDetails, AlertId, AlertTransition, ResolveReason, TransitionKind};
use crate::publisher::TransitionSink;

/// SQLx-backed alert store, fed as a [`TransitionSink`].
///
/// Redelivered or out-of-order transitions are harmless: the transition log
/// ignores duplicate `(alert_id, transition, revision)` keys and the alert
/// row only moves forward in revision.
pub struct SqlxAlertRepository {
    pool: AnyPool,
}

impl SqlxAlertRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_alert(&self, id: &AlertId) -> anyhow::Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
SELECT
  alert_id, kind, subject_key, severity,
  opened_at_ms, last_seen_ms, resolved_at_ms, revision,
  metric, threshold, observed, message
FROM alerts
WHERE alert_id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_alert(&r)).transpose()
    }

    pub async fn list_open(&self) -> anyhow::Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
SELECT
  alert_id, kind, subject_key, severity,
  opened_at_ms, last_seen_ms, resolved_at_ms, revision,
  metric, threshold, observed, message
FROM alerts
WHERE resolved_at_ms IS NULL
ORDER BY last_seen_ms DESC;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_alert(&r) {
                Ok(a) => out.push(a),
                Err(e) => tracing::warn!(error = %e, "skipping malformed alert row"),
            }
        }
        Ok(out)
    }

    /// Logged transitions for an alert, in revision order.
    pub async fn transitions(&self, id: &AlertId) -> anyhow::Result<Vec<(TransitionKind, u32)>> {
        let rows = sqlx::query(
            r#"
SELECT transition, revision
FROM alert_transitions
WHERE alert_id = ?
ORDER BY revision ASC;
"#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let kind = parse_transition(&r.get::<String, _>("transition"))?;
                Ok((kind, i64_to_u32(r.get("revision"))?))
            })
            .collect()
    }

    /// Deletes alerts resolved before `cutoff_ms` together with their
    /// transition log. Open alerts are never purged. Returns the number of
    /// alerts removed.
    pub async fn purge_resolved_before(&self, cutoff_ms: u64) -> anyhow::Result<u64> {
        let cutoff = u64_to_i64(cutoff_ms)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
DELETE FROM alert_transitions
WHERE alert_id IN (
  SELECT alert_id FROM alerts
  WHERE resolved_at_ms IS NOT NULL AND resolved_at_ms < ?
);
"#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let removed = sqlx::query(
            r#"
DELETE FROM alerts
WHERE resolved_at_ms IS NOT NULL AND resolved_at_ms < ?;
"#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    async fn write(&self, transition: &AlertTransition) -> anyhow::Result<()> {
        let alert = transition.alert();
        let id = alert.id.to_string();
        let reason = match transition {
            AlertTransition::Resolved { reason, .. } => Some(reason_str(*reason)),
            _ => None,
        };
        let at_ms = match transition {
            AlertTransition::Opened { .. } => alert.opened_at_ms,
            AlertTransition::Refreshed { .. } => alert.last_seen_ms,
            AlertTransition::Resolved { .. } => alert.resolved_at_ms.unwrap_or(alert.last_seen_ms),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO alert_transitions (alert_id, transition, revision, severity, at_ms, reason)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT (alert_id, transition, revision) DO NOTHING;
"#,
        )
        .bind(id.clone())
        .bind(transition.kind().as_str())
        .bind(alert.revision as i64)
        .bind(alert.severity.as_str())
        .bind(u64_to_i64(at_ms)?)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
INSERT INTO alerts (
  alert_id, kind, subject_key, severity,
  opened_at_ms, last_seen_ms, resolved_at_ms, revision,
  metric, threshold, observed, message
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (alert_id) DO UPDATE SET
  severity = excluded.severity,
  last_seen_ms = excluded.last_seen_ms,
  resolved_at_ms = excluded.resolved_at_ms,
  revision = excluded.revision,
  metric = excluded.metric,
  threshold = excluded.threshold,
  observed = excluded.observed,
  message = excluded.message
WHERE excluded.revision >= alerts.revision;
"#,
        )
        .bind(id)
        .bind(alert.kind.as_str())
        .bind(alert.subject_key.clone())
        .bind(alert.severity.as_str())
        .bind(u64_to_i64(alert.opened_at_ms)?)
        .bind(u64_to_i64(alert.last_seen_ms)?)
        .bind(alert.resolved_at_ms.map(u64_to_i64).transpose()?)
        .bind(alert.revision as i64)
        .bind(alert.details.metric.clone())
        .bind(alert.details.threshold)
        .bind(alert.details.observed)
        .bind(alert.details.message.clone())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TransitionSink for SqlxAlertRepository {
    fn name(&self) -> &'static str {
        "sqlx_alerts"
    }

    async fn deliver(&self, transition: &AlertTransition) -> anyhow::Result<()> {
        self.write(transition)
            .await
            .with_context(|| format!("persisting {} transition", transition.kind().as_str()))
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_alert(r: &sqlx::any::AnyRow) -> anyhow::Result<Alert> {
    let id_str: String = r.get("alert_id");
    let id = Uuid::parse_str(&id_str).context("invalid alert_id")?;

    let kind: String = r.get("kind");
    let severity: String = r.get("severity");
    let resolved_at: Option<i64> = r.get("resolved_at_ms");

    Ok(Alert {
        id,
        kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        subject_key: r.get("subject_key"),
        severity: severity.parse().map_err(|e: String| anyhow!(e))?,
        opened_at_ms: i64_to_u64(r.get("opened_at_ms"))?,
        last_seen_ms: i64_to_u64(r.get("last_seen_ms"))?,
        resolved_at_ms: resolved_at.map(i64_to_u64).transpose()?,
        revision: i64_to_u32(r.get("revision"))?,
        details: AlertDetails {
            metric: r.get("metric"),
            threshold: r.get("threshold"),
            observed: r.get("observed"),
            message: r.get("message"),
        },
    })
}

fn parse_transition(s: &str) -> anyhow::Result<TransitionKind> {
    [
        TransitionKind::Opened,
        TransitionKind::Refreshed,
        TransitionKind::Resolved,
    ]
    .into_iter()
    .find(|k| k.as_str() == s)
    .ok_or_else(|| anyhow!("unknown transition: {s}"))
}

fn reason_str(reason: ResolveReason) -> &'static str {
    match reason {
        ResolveReason::Expired => "expired",
        ResolveReason::Manual => "manual",
    }
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn i64_to_u32(v: i64) -> anyhow::Result<u32> {
    if v < 0 || v > u32::MAX as i64 {
        return Err(anyhow!("out of range for u32: {v}"));
    }
    Ok(v as u32)
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}
