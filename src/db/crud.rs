use chrono::Utc;
use sqlx::{Executor, Result, Sqlite};

use super::ImageRow;

/// 分配一个新的图片 ID
pub async fn next_image_id<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        UPDATE id_sequence SET value = value + 1
        WHERE name = 'image'
        RETURNING value
        "#,
    )
    .fetch_one(executor)
    .await
}

/// 最后一个分配的图片 ID，尚未分配时为 0
pub async fn last_image_id<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT value FROM id_sequence WHERE name = 'image'").fetch_one(executor).await
}

/// 添加图片记录，ID 已存在时返回 false
pub async fn add_image<'c, E>(executor: E, image: &ImageRow) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO image (id, filename, description, size, checksum, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(image.id)
    .bind(&image.filename)
    .bind(&image.description)
    .bind(image.size)
    .bind(&image.checksum)
    .bind(image.created_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_image<'c, E>(executor: E, id: i64) -> Result<Option<ImageRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, description, size, checksum, created_at
        FROM image WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 删除图片记录，返回记录是否存在
pub async fn delete_image<'c, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM image WHERE id = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected() == 1)
}

/// 标记一个 ID 不再使用，重复标记会被忽略
pub async fn add_tombstone<'c, E>(executor: E, id: i64, reason: &str) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO tombstone (id, reason, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(executor)
        .await?;
    Ok(())
}

/// 按 ID 升序列出 `(after, until]` 范围内的图片
pub async fn list_images<'c, E>(executor: E, after: i64, until: i64, limit: i64) -> Result<Vec<ImageRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, description, size, checksum, created_at
        FROM image WHERE id > ? AND id <= ?
        ORDER BY id ASC LIMIT ?
        "#,
    )
    .bind(after)
    .bind(until)
    .bind(limit)
    .fetch_all(executor)
    .await
}

pub async fn all_image_ids<'c, E>(executor: E) -> Result<Vec<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT id FROM image ORDER BY id ASC").fetch_all(executor).await
}

pub async fn count_images<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM image").fetch_one(executor).await
}

pub async fn count_tombstones<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM tombstone").fetch_one(executor).await
}
