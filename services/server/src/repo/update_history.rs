use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Per-attempt states: `pending -> downloading -> {completed|failed|declined}`,
/// with `pending` also allowed to jump straight to a terminal state.
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Declined,
}

impl UpdateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Downloading => "downloading",
            UpdateStatus::Completed => "completed",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Declined => "declined",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UpdateStatus::Pending),
            "downloading" => Some(UpdateStatus::Downloading),
            "completed" => Some(UpdateStatus::Completed),
            "failed" => Some(UpdateStatus::Failed),
            "declined" => Some(UpdateStatus::Declined),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateStatus::Completed | UpdateStatus::Failed | UpdateStatus::Declined
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpdateHistoryRow {
    pub id: i64,
    pub rollout_id: Uuid,
    pub printer_id: Uuid,
    pub version: String,
    pub status: String,
    pub progress_percent: i32,
    pub progress_status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The latest attempt row for this rollout+printer pair, if any.
pub async fn find_latest(
    pool: &PgPool,
    rollout_id: Uuid,
    printer_id: Uuid,
) -> Result<Option<UpdateHistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, UpdateHistoryRow>(
        r#"SELECT * FROM update_history
           WHERE rollout_id = $1 AND printer_id = $2
           ORDER BY id DESC LIMIT 1"#,
    )
    .bind(rollout_id)
    .bind(printer_id)
    .fetch_optional(pool)
    .await
}

/// The printer's most recent attempt that has not reached a terminal state.
/// Response frames carry no rollout id, so this is how they find their row.
pub async fn latest_open_for_printer(
    pool: &PgPool,
    printer_id: Uuid,
) -> Result<Option<UpdateHistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, UpdateHistoryRow>(
        r#"SELECT * FROM update_history
           WHERE printer_id = $1 AND status IN ('pending', 'downloading')
           ORDER BY id DESC LIMIT 1"#,
    )
    .bind(printer_id)
    .fetch_optional(pool)
    .await
}

/// Create the pending attempt row for a rollout+printer pair.
///
/// Returns `None` when a concurrent evaluation already created it (the
/// table holds at most one row per pair), in which case the caller must
/// not bump the rollout counters again.
pub async fn insert_pending(
    pool: &PgPool,
    rollout_id: Uuid,
    printer_id: Uuid,
    version: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO update_history (rollout_id, printer_id, version)
           VALUES ($1, $2, $3)
           ON CONFLICT (rollout_id, printer_id) DO NOTHING
           RETURNING id"#,
    )
    .bind(rollout_id)
    .bind(printer_id)
    .bind(version)
    .fetch_optional(pool)
    .await
}

/// Record a progress report; the first one moves `pending` to `downloading`.
pub async fn set_progress(
    pool: &PgPool,
    history_id: i64,
    percent: i32,
    progress_status: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_history
           SET progress_percent = $2,
               progress_status = $3,
               status = CASE WHEN status = 'pending' THEN 'downloading' ELSE status END
           WHERE id = $1"#,
    )
    .bind(history_id)
    .bind(percent)
    .bind(progress_status)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, history_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_history
           SET status = 'completed', progress_percent = 100, completed_at = now()
           WHERE id = $1"#,
    )
    .bind(history_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, history_id: i64, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_history
           SET status = 'failed', error = $2, completed_at = now()
           WHERE id = $1"#,
    )
    .bind(history_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_declined(pool: &PgPool, history_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_history
           SET status = 'declined', completed_at = now()
           WHERE id = $1"#,
    )
    .bind(history_id)
    .execute(pool)
    .await?;
    Ok(())
}
