use chrono::{DateTime, Utc};

/// 图片记录
#[derive(Debug, sqlx::FromRow)]
pub struct ImageRow {
    /// 图片 ID
    pub id: i64,
    /// 原始文件名
    pub filename: String,
    /// 图片描述
    pub description: Option<String>,
    /// 图片大小，单位为字节
    pub size: i64,
    /// 图片 blake3 哈希
    pub checksum: Vec<u8>,
    /// 添加时间
    pub created_at: DateTime<Utc>,
}
