use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Latest known state per alert occurrence
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS alerts (
  alert_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  subject_key TEXT NOT NULL,
  severity TEXT NOT NULL,
  opened_at_ms BIGINT NOT NULL,
  last_seen_ms BIGINT NOT NULL,
  resolved_at_ms BIGINT,
  revision BIGINT NOT NULL,
  metric TEXT NOT NULL,
  threshold REAL NOT NULL,
  observed REAL NOT NULL,
  message TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Append-only transition log
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS alert_transitions (
  alert_id TEXT NOT NULL,
  transition TEXT NOT NULL,
  revision BIGINT NOT NULL,
  severity TEXT NOT NULL,
  at_ms BIGINT NOT NULL,
  reason TEXT,
  PRIMARY KEY (alert_id, transition, revision)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_alerts_subject ON alerts(kind, subject_key);"#)
        .execute(pool)
        .await?;

    Ok(())
}
