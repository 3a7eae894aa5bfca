use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::CoreError;

/// Firmware metadata; the binary blob stays in the database until the
/// download endpoint streams it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FirmwareRow {
    pub id: i64,
    pub version: String,
    pub platform: String,
    pub size: i64,
    pub md5: String,
    pub sha256: String,
    pub channel: String,
    pub mandatory: bool,
    pub min_upgrade_version: Option<String>,
}

/// Store a firmware binary.
///
/// Digests and size are computed here from the blob itself, so the stored
/// row can never disagree with its binary.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    version: &str,
    platform: &str,
    channel: &str,
    release_notes: &str,
    mandatory: bool,
    min_upgrade_version: Option<&str>,
    data: &[u8],
    max_size: usize,
) -> Result<FirmwareRow, CoreError> {
    if data.len() > max_size {
        return Err(CoreError::FirmwareTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    let md5_hex = hex::encode(md5::compute(data).0);
    let sha256_hex = hex::encode(Sha256::digest(data));
    let row = sqlx::query_as::<_, FirmwareRow>(
        r#"INSERT INTO firmware_versions
               (version, platform, data, size, md5, sha256, channel, release_notes, mandatory, min_upgrade_version)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           RETURNING id, version, platform, size, md5, sha256, channel, mandatory, min_upgrade_version"#,
    )
    .bind(version)
    .bind(platform)
    .bind(data)
    .bind(data.len() as i64)
    .bind(md5_hex)
    .bind(sha256_hex)
    .bind(channel)
    .bind(release_notes)
    .bind(mandatory)
    .bind(min_upgrade_version)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Look up a binary by version across all accepted platform spellings.
pub async fn find_by_version_platforms(
    pool: &PgPool,
    version: &str,
    platforms: &[String],
) -> Result<Option<FirmwareRow>, sqlx::Error> {
    sqlx::query_as::<_, FirmwareRow>(
        r#"SELECT id, version, platform, size, md5, sha256, channel, mandatory, min_upgrade_version
           FROM firmware_versions
           WHERE version = $1 AND platform = ANY($2) AND deprecated_at IS NULL
           LIMIT 1"#,
    )
    .bind(version)
    .bind(platforms)
    .fetch_optional(pool)
    .await
}

pub async fn record_success(
    pool: &PgPool,
    version: &str,
    platforms: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE firmware_versions SET success_count = success_count + 1 WHERE version = $1 AND platform = ANY($2)",
    )
    .bind(version)
    .bind(platforms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_failure(
    pool: &PgPool,
    version: &str,
    platforms: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE firmware_versions SET failure_count = failure_count + 1 WHERE version = $1 AND platform = ANY($2)",
    )
    .bind(version)
    .bind(platforms)
    .execute(pool)
    .await?;
    Ok(())
}
