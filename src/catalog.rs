//! 图片元数据目录
//!
//! 目录负责分配图片 ID，并保存每张图片的元数据。一张图片只有在目录提交之后才算添加成功。

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::ImageId;
use crate::db::{self, Database, ImageRow};
use crate::error::CatalogError;

/// 分页读取时每页的记录数
const PAGE_SIZE: usize = 256;

/// 已提交的图片元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub filename: String,
    /// 描述为空时为 None
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// 图片大小，单位为字节
    pub size: u64,
    /// 图片内容的 blake3 哈希，读取时用于校验
    #[serde(skip)]
    pub checksum: [u8; 32],
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id as ImageId,
            filename: row.filename,
            description: row.description,
            created_at: row.created_at,
            size: row.size as u64,
            checksum: <[u8; 32]>::try_from(row.checksum.as_slice()).unwrap_or_default(),
        }
    }
}

impl From<&ImageRecord> for ImageRow {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id as i64,
            filename: record.filename.clone(),
            description: record.description.clone(),
            size: record.size as i64,
            checksum: record.checksum.to_vec(),
            created_at: record.created_at,
        }
    }
}

/// 分页遍历的位置
///
/// `until` 是开始遍历时已分配的最大 ID，遍历期间新添加的图片不会出现在结果中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    /// 已经读取过的最大 ID
    pub after: ImageId,
    pub until: ImageId,
}

impl ListCursor {
    /// 从 `last_seen` 之后继续遍历
    pub fn resume(self, last_seen: ImageId) -> Self {
        Self { after: last_seen, ..self }
    }
}

pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = db::init_db(path).await?;
        Ok(Self { db })
    }

    /// 分配一个新的图片 ID，分配过的 ID 即使没有提交也不会再次使用
    pub async fn allocate_id(&self) -> Result<ImageId, CatalogError> {
        Ok(db::crud::next_image_id(&self.db).await? as ImageId)
    }

    /// 最后一个分配的 ID
    pub async fn last_allocated(&self) -> Result<ImageId, CatalogError> {
        Ok(db::crud::last_image_id(&self.db).await? as ImageId)
    }

    /// 提交图片记录
    pub async fn put(&self, record: &ImageRecord) -> Result<(), CatalogError> {
        match db::crud::add_image(&self.db, &ImageRow::from(record)).await? {
            true => Ok(()),
            false => Err(CatalogError::Duplicate(record.id)),
        }
    }

    pub async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, CatalogError> {
        Ok(db::crud::get_image(&self.db, id as i64).await?.map(ImageRecord::from))
    }

    /// 删除图片记录，并将 ID 标记为已删除
    pub async fn remove(&self, id: ImageId) -> Result<(), CatalogError> {
        let mut tx = self.db.begin().await?;
        if !db::crud::delete_image(&mut *tx, id as i64).await? {
            return Err(CatalogError::NotFound(id));
        }
        db::crud::add_tombstone(&mut *tx, id as i64, "removed").await?;
        tx.commit().await?;
        Ok(())
    }

    /// 放弃一个已分配但没有提交的 ID
    pub async fn tombstone(&self, id: ImageId, reason: &str) -> Result<(), CatalogError> {
        Ok(db::crud::add_tombstone(&self.db, id as i64, reason).await?)
    }

    /// 从当前状态开始的遍历位置
    pub async fn cursor(&self) -> Result<ListCursor, CatalogError> {
        Ok(ListCursor { after: 0, until: self.last_allocated().await? })
    }

    /// 读取 `cursor` 之后的一页记录
    pub async fn list_page(&self, cursor: ListCursor, limit: usize) -> Result<Vec<ImageRecord>, CatalogError> {
        let rows = db::crud::list_images(&self.db, cursor.after as i64, cursor.until as i64, limit as i64).await?;
        Ok(rows.into_iter().map(ImageRecord::from).collect())
    }

    /// 从 `cursor` 开始按 ID 升序遍历全部记录
    pub fn list_from(&self, cursor: ListCursor) -> impl Stream<Item = Result<ImageRecord, CatalogError>> + Send + '_ {
        stream::try_unfold(Some(cursor), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, CatalogError>(None);
            };
            let page = self.list_page(cursor, PAGE_SIZE).await?;
            let next = match page.last() {
                Some(last) if page.len() == PAGE_SIZE => Some(cursor.resume(last.id)),
                _ => None,
            };
            if page.is_empty() {
                return Ok(None);
            }
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, CatalogError>)))
        .try_flatten()
    }

    /// 按 ID 升序遍历开始时已提交的全部记录
    pub fn list(&self) -> impl Stream<Item = Result<ImageRecord, CatalogError>> + Send + '_ {
        stream::once(self.cursor()).map_ok(move |cursor| self.list_from(cursor)).try_flatten()
    }

    pub async fn ids(&self) -> Result<Vec<ImageId>, CatalogError> {
        let ids = db::crud::all_image_ids(&self.db).await?;
        Ok(ids.into_iter().map(|id| id as ImageId).collect())
    }

    pub async fn count(&self) -> Result<u64, CatalogError> {
        Ok(db::crud::count_images(&self.db).await? as u64)
    }

    /// 被放弃或删除的 ID 数量
    pub async fn tombstones(&self) -> Result<u64, CatalogError> {
        Ok(db::crud::count_tombstones(&self.db).await? as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    async fn open(dir: &TempDir) -> Catalog {
        Catalog::open(dir.path().join("catalog.db")).await.unwrap()
    }

    fn record(id: ImageId, filename: &str) -> ImageRecord {
        ImageRecord {
            id,
            filename: filename.to_string(),
            description: None,
            created_at: Utc::now(),
            size: 3,
            checksum: *blake3::hash(b"abc").as_bytes(),
        }
    }

    #[tokio::test]
    async fn put_get_remove() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir).await;
        let id = catalog.allocate_id().await.unwrap();
        let mut image = record(id, "cat.jpg");
        image.description = Some("a cat".to_string());
        catalog.put(&image).await.unwrap();

        let stored = catalog.get(id).await.unwrap().unwrap();
        assert_eq!(stored.filename, "cat.jpg");
        assert_eq!(stored.description.as_deref(), Some("a cat"));
        assert_eq!(stored.checksum, image.checksum);
        assert!(matches!(catalog.put(&image).await, Err(CatalogError::Duplicate(i)) if i == id));

        catalog.remove(id).await.unwrap();
        assert!(catalog.get(id).await.unwrap().is_none());
        assert!(matches!(catalog.remove(id).await, Err(CatalogError::NotFound(i)) if i == id));
        assert_eq!(catalog.tombstones().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let last = {
            let catalog = open(&dir).await;
            let a = catalog.allocate_id().await.unwrap();
            let b = catalog.allocate_id().await.unwrap();
            assert!(b > a);
            catalog.tombstone(b, "abandoned").await.unwrap();
            b
        };
        let catalog = open(&dir).await;
        assert_eq!(catalog.last_allocated().await.unwrap(), last);
        assert!(catalog.allocate_id().await.unwrap() > last);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocation_is_unique() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(open(&dir).await);
        let tasks = (0..32)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.allocate_id().await.unwrap() })
            })
            .collect::<Vec<_>>();
        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids, (1..=32).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn list_is_ordered_and_bounded_by_snapshot() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir).await;
        let ids = [
            catalog.allocate_id().await.unwrap(),
            catalog.allocate_id().await.unwrap(),
            catalog.allocate_id().await.unwrap(),
        ];
        for &id in ids.iter().rev() {
            catalog.put(&record(id, &format!("{id}.png"))).await.unwrap();
        }

        let cursor = catalog.cursor().await.unwrap();
        let late = catalog.allocate_id().await.unwrap();
        catalog.put(&record(late, "late.png")).await.unwrap();

        let listed = catalog.list_from(cursor).map_ok(|r| r.id).try_collect::<Vec<_>>().await.unwrap();
        assert_eq!(listed, ids.to_vec());

        let page = catalog.list_page(cursor, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = catalog.list_page(cursor.resume(page[1].id), 10).await.unwrap();
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2]]);

        let all = catalog.list().map_ok(|r| r.id).try_collect::<Vec<_>>().await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(catalog.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn list_spans_multiple_pages() {
        let dir = TempDir::new().unwrap();
        let catalog = open(&dir).await;
        for _ in 0..PAGE_SIZE + 10 {
            let id = catalog.allocate_id().await.unwrap();
            catalog.put(&record(id, "x.png")).await.unwrap();
        }
        let all = catalog.list().map_ok(|r| r.id).try_collect::<Vec<_>>().await.unwrap();
        assert_eq!(all, (1..=(PAGE_SIZE + 10) as ImageId).collect::<Vec<_>>());
        assert_eq!(catalog.ids().await.unwrap(), all);
    }
}
