use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Rollout campaign states.  `paused` and `cancelled` block all pushes;
/// `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl RolloutStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RolloutStatus::Pending => "pending",
            RolloutStatus::Active => "active",
            RolloutStatus::Paused => "paused",
            RolloutStatus::Completed => "completed",
            RolloutStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RolloutStatus::Pending),
            "active" => Some(RolloutStatus::Active),
            "paused" => Some(RolloutStatus::Paused),
            "completed" => Some(RolloutStatus::Completed),
            "cancelled" => Some(RolloutStatus::Cancelled),
            _ => None,
        }
    }
}

/// Delivery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutType {
    Immediate,
    Gradual,
    Scheduled,
}

impl RolloutType {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(RolloutType::Immediate),
            "gradual" => Some(RolloutType::Gradual),
            "scheduled" => Some(RolloutType::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RolloutRow {
    pub rollout_id: Uuid,
    /// Version this campaign delivers.
    pub version: String,
    pub target_all: bool,
    pub target_user_ids: Vec<Uuid>,
    pub target_printer_ids: Vec<Uuid>,
    pub target_channels: Vec<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub rollout_type: String,
    pub rollout_percentage: Option<i32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: String,
    pub total_targets: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub declined_count: i32,
    pub pending_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Active rollouts whose schedule (if any) has come due.
pub async fn fetch_active(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<RolloutRow>, sqlx::Error> {
    sqlx::query_as::<_, RolloutRow>(
        r#"SELECT * FROM update_rollouts
           WHERE status = 'active' AND (scheduled_for IS NULL OR scheduled_for <= $1)
           ORDER BY created_at ASC"#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn fetch(pool: &PgPool, rollout_id: Uuid) -> Result<Option<RolloutRow>, sqlx::Error> {
    sqlx::query_as::<_, RolloutRow>("SELECT * FROM update_rollouts WHERE rollout_id = $1")
        .bind(rollout_id)
        .fetch_optional(pool)
        .await
}

/// Flip due scheduled rollouts from `pending` to `active`; returns how many
/// were activated.
pub async fn activate_due(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE update_rollouts SET status = 'active'
           WHERE status = 'pending' AND scheduled_for IS NOT NULL AND scheduled_for <= $1"#,
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Record that a printer was admitted to the campaign.  `total_targets`
/// moves with `pending_count` so the counters always sum to it.
pub async fn admit_target(pool: &PgPool, rollout_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_rollouts
           SET pending_count = pending_count + 1, total_targets = total_targets + 1
           WHERE rollout_id = $1"#,
    )
    .bind(rollout_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_completed(pool: &PgPool, rollout_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_rollouts
           SET completed_count = completed_count + 1, pending_count = pending_count - 1
           WHERE rollout_id = $1"#,
    )
    .bind(rollout_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_failed(pool: &PgPool, rollout_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_rollouts
           SET failed_count = failed_count + 1, pending_count = pending_count - 1
           WHERE rollout_id = $1"#,
    )
    .bind(rollout_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_declined(pool: &PgPool, rollout_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE update_rollouts
           SET declined_count = declined_count + 1, pending_count = pending_count - 1
           WHERE rollout_id = $1"#,
    )
    .bind(rollout_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition an active rollout to `completed` once its pending targets
/// have drained.  Returns whether the transition happened.
pub async fn complete_if_drained(pool: &PgPool, rollout_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE update_rollouts SET status = 'completed'
           WHERE rollout_id = $1 AND status = 'active' AND pending_count = 0
           RETURNING rollout_id"#,
    )
    .bind(rollout_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
