use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// A pending delivery slot for an offline printer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheRow {
    pub id: i64,
    pub printer_id: Uuid,
    pub sender_name: String,
    pub body: String,
    pub daily_number: i32,
    pub sent_at: DateTime<Utc>,
}

/// Append the immutable historical record for a routed message.
pub async fn insert_log(
    pool: &PgPool,
    sender_id: Option<Uuid>,
    printer_id: Uuid,
    sender_name: &str,
    body: &str,
    daily_number: i32,
    sent_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO message_log (sender_id, printer_id, sender_name, body, daily_number, sent_at)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(sender_id)
    .bind(printer_id)
    .bind(sender_name)
    .bind(body)
    .bind(daily_number)
    .bind(sent_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_cache(
    pool: &PgPool,
    printer_id: Uuid,
    sender_name: &str,
    body: &str,
    daily_number: i32,
    sent_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO message_cache (printer_id, sender_name, body, daily_number, sent_at)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(printer_id)
    .bind(sender_name)
    .bind(body)
    .bind(daily_number)
    .bind(sent_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Undelivered cache rows for a printer, in insertion order.
pub async fn fetch_undelivered(
    pool: &PgPool,
    printer_id: Uuid,
) -> Result<Vec<CacheRow>, sqlx::Error> {
    sqlx::query_as::<_, CacheRow>(
        r#"SELECT id, printer_id, sender_name, body, daily_number, sent_at
           FROM message_cache
           WHERE printer_id = $1 AND NOT is_delivered
           ORDER BY id ASC"#,
    )
    .bind(printer_id)
    .fetch_all(pool)
    .await
}

/// Marked only after the frame has been handed to the socket write path
/// without error.
pub async fn mark_delivered(pool: &PgPool, cache_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE message_cache SET is_delivered = true WHERE id = $1")
        .bind(cache_id)
        .execute(pool)
        .await?;
    Ok(())
}
