use chrono::{DateTime, NaiveDate, Utc};
use pm_protocol::Subscription;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrinterRow {
    pub printer_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    /// Canonical dashed lowercase form.
    pub platform: String,
    pub firmware_version: String,
    pub auto_update: bool,
    pub update_channel: String,
    pub online: bool,
    pub last_connected: Option<DateTime<Utc>>,
    pub daily_message_number: i32,
    pub daily_counter_date: NaiveDate,
}

pub async fn fetch(pool: &PgPool, printer_id: Uuid) -> Result<Option<PrinterRow>, sqlx::Error> {
    sqlx::query_as::<_, PrinterRow>("SELECT * FROM printers WHERE printer_id = $1")
        .bind(printer_id)
        .fetch_optional(pool)
        .await
}

/// Create or refresh a printer from its subscription handshake.
///
/// `platform` must already be canonicalized.  An empty announced name never
/// clobbers a previously stored one.
pub async fn upsert_from_subscription(
    pool: &PgPool,
    sub: &Subscription,
    platform: &str,
) -> Result<PrinterRow, sqlx::Error> {
    sqlx::query_as::<_, PrinterRow>(
        r#"INSERT INTO printers (printer_id, name, platform, firmware_version, auto_update, update_channel)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (printer_id) DO UPDATE
           SET name = CASE WHEN EXCLUDED.name = '' THEN printers.name ELSE EXCLUDED.name END,
               platform = EXCLUDED.platform,
               firmware_version = EXCLUDED.firmware_version,
               auto_update = EXCLUDED.auto_update,
               update_channel = EXCLUDED.update_channel
           RETURNING *"#,
    )
    .bind(sub.printer_id)
    .bind(&sub.printer_name)
    .bind(platform)
    .bind(&sub.firmware_version)
    .bind(sub.auto_update)
    .bind(sub.update_channel.as_str())
    .fetch_one(pool)
    .await
}

pub async fn set_online(pool: &PgPool, printer_id: Uuid, online: bool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE printers
           SET online = $2,
               last_connected = CASE WHEN $2 THEN now() ELSE last_connected END
           WHERE printer_id = $1"#,
    )
    .bind(printer_id)
    .bind(online)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear stale `online` flags left by an unclean shutdown.
pub async fn reset_online_flags(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE printers SET online = false WHERE online = true")
        .execute(pool)
        .await?;
    Ok(())
}

/// Assign the next daily message number for `today` (callers pass the
/// current UTC date).
///
/// A single statement so the row lock totally orders assignments per
/// printer: same-day assignments increment, the first assignment of a new
/// day restarts at 1.
pub async fn next_daily_number(
    pool: &PgPool,
    printer_id: Uuid,
    today: NaiveDate,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"UPDATE printers
           SET daily_message_number =
                   CASE WHEN daily_counter_date = $2 THEN daily_message_number + 1 ELSE 1 END,
               daily_counter_date = $2
           WHERE printer_id = $1
           RETURNING daily_message_number"#,
    )
    .bind(printer_id)
    .bind(today)
    .fetch_one(pool)
    .await
}

pub async fn set_auto_update(
    pool: &PgPool,
    printer_id: Uuid,
    auto_update: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE printers SET auto_update = $2 WHERE printer_id = $1")
        .bind(printer_id)
        .bind(auto_update)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_firmware_version(
    pool: &PgPool,
    printer_id: Uuid,
    version: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE printers SET firmware_version = $2 WHERE printer_id = $1")
        .bind(printer_id)
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}
