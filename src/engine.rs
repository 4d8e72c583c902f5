//! 搜索引擎
//!
//! 添加一张图片需要依次写入索引、图片存储和目录，目录是可见性的唯一标准：
//! 只有目录中存在的图片才会出现在列表、搜索和下载的结果中。
//! 任何一步失败都会撤销之前的步骤，并将已分配的 ID 标记为放弃。

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::Utc;
use futures::{Stream, TryStreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ImageId;
use crate::blob::{BlobStore, FsBlobStore};
use crate::catalog::{Catalog, ImageRecord};
use crate::config::{ConfDir, IndexKind};
use crate::embed::Embedder;
use crate::error::*;
use crate::index::{DurableIndex, FlatIndex, HnswIndex, HnswParams, VectorIndex};
use crate::lock::DirLock;
use crate::metrics;
use crate::utils::normalize_description;

/// 待添加的图片
#[derive(Debug, Clone)]
pub struct NewImage {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub description: Option<String>,
}

/// 搜索结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub similarity: f32,
}

/// 一致性检查的结果
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// 目录中不存在的向量，已删除
    pub orphan_vectors: Vec<ImageId>,
    /// 目录中不存在的图片数据，已删除
    pub orphan_blobs: Vec<ImageId>,
    /// 缺少向量或图片数据的目录记录，已删除
    pub dangling_records: Vec<ImageId>,
    /// 崩溃时写了一半的图片数据，已删除
    pub partial_blobs: Vec<ImageId>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_vectors.is_empty()
            && self.orphan_blobs.is_empty()
            && self.dangling_records.is_empty()
            && self.partial_blobs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// 目录中的图片数量
    pub images: u64,
    /// 索引中的向量数量
    pub vectors: usize,
    pub dimension: Option<usize>,
    /// 被放弃或删除的 ID 数量
    pub tombstones: u64,
}

pub struct EngineBuilder {
    conf_dir: ConfDir,
    index: IndexKind,
    hnsw: HnswParams,
    shards: usize,
    embed_timeout: Option<Duration>,
    recover: bool,
}

impl EngineBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self {
            conf_dir,
            index: IndexKind::Flat,
            hnsw: HnswParams::default(),
            shards: num_cpus::get(),
            embed_timeout: None,
            recover: true,
        }
    }

    pub fn index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    pub fn hnsw(mut self, params: HnswParams) -> Self {
        self.hnsw = params;
        self
    }

    /// 精确索引的分片数量
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// 单次嵌入计算的超时时间
    pub fn embed_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// 打开时是否进行一致性检查，其他进程正在使用数据目录时会跳过
    pub fn recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    /// 使用默认的文件图片存储打开搜索引擎
    pub async fn open<E: Embedder>(self, embedder: E) -> Result<SearchEngine<E>> {
        let blobs = FsBlobStore::open(self.conf_dir.blobs())?;
        self.open_with(embedder, blobs).await
    }

    pub async fn open_with<E: Embedder, B: BlobStore>(self, embedder: E, blobs: B) -> Result<SearchEngine<E, B>> {
        std::fs::create_dir_all(self.conf_dir.path())?;
        info!("打开数据目录: {}", self.conf_dir.path().display());
        let lock_path = self.conf_dir.lock();
        let dir_lock = tokio::task::spawn_blocking(move || DirLock::open(lock_path)).await??;

        let catalog = Catalog::open(self.conf_dir.database()).await?;
        let dimension = embedder.dimension();
        let index: Arc<dyn VectorIndex> = match self.index {
            IndexKind::Flat => {
                let shards = self.shards;
                Arc::new(DurableIndex::open(self.conf_dir.vectors(), dimension, |d| FlatIndex::new(d, shards))?)
            }
            IndexKind::Hnsw => {
                let params = self.hnsw;
                Arc::new(DurableIndex::open(self.conf_dir.vectors(), dimension, |d| HnswIndex::new(d, params))?)
            }
        };

        let engine = SearchEngine {
            embedder,
            catalog,
            index,
            blobs,
            embed_timeout: self.embed_timeout,
            pending: Mutex::new(HashSet::new()),
            admission: RwLock::new(()),
            dir_lock,
        };

        if self.recover {
            match engine.try_reconcile().await? {
                Some(report) if !report.is_clean() => warn!("一致性检查修复了以下问题: {:?}", report),
                Some(_) => {}
                None => info!("数据目录正被其他进程使用，跳过一致性检查"),
            }
        }

        Ok(engine)
    }
}

pub struct SearchEngine<E, B = FsBlobStore> {
    embedder: E,
    catalog: Catalog,
    index: Arc<dyn VectorIndex>,
    blobs: B,
    embed_timeout: Option<Duration>,
    /// 正在添加、尚未提交到目录的图片
    pending: Mutex<HashSet<ImageId>>,
    /// 分配 ID 时持有读锁，一致性检查时持有写锁
    admission: RwLock<()>,
    dir_lock: DirLock,
}

/// 在作用域结束时将图片移出添加中的集合
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<ImageId>>,
    id: ImageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

impl<E: Embedder, B: BlobStore> SearchEngine<E, B> {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<ImageId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_pending(&self, id: ImageId) -> PendingGuard<'_> {
        self.pending().insert(id);
        PendingGuard { pending: &self.pending, id }
    }

    /// 在阻塞线程池中操作索引，写操作包含一次落盘
    async fn with_index<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn VectorIndex) -> Result<T, IndexError> + Send + 'static,
    {
        let index = self.index.clone();
        tokio::task::spawn_blocking(move || f(index.as_ref())).await?
    }

    /// 调用嵌入模型，超时只作用于这一步
    async fn embed<F>(&self, fut: F) -> Result<Vec<f32>, EmbedError>
    where
        F: Future<Output = Result<Vec<f32>>>,
    {
        let start = Instant::now();
        let result = match self.embed_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| EmbedError::Timeout(limit))?,
            None => fut.await,
        };
        metrics::observe_embed_duration(start.elapsed());

        let vector = result.map_err(EmbedError::Failed)?;
        if vector.is_empty() {
            return Err(EmbedError::Failed(anyhow!("嵌入模型返回了空向量")));
        }
        Ok(vector)
    }

    /// 添加一张图片，返回时图片已经可以被列出、搜索和下载
    pub async fn add(&self, image: NewImage) -> Result<ImageRecord, AddError> {
        let result = self.add_inner(image).await;
        metrics::inc_add(match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        });
        result
    }

    async fn add_inner(&self, image: NewImage) -> Result<ImageRecord, AddError> {
        let NewImage { filename, bytes, description } = image;
        if bytes.is_empty() {
            return Err(AddError::EmptyImage);
        }
        let description = normalize_description(description);
        let vector = self.embed(self.embedder.embed_image(&bytes)).await?;

        let (id, _pending) = {
            let _admission = self.admission.read().await;
            let id = self.catalog.allocate_id().await?;
            (id, self.mark_pending(id))
        };

        if let Err(e) = self.with_index(move |index| index.insert(id, &vector)).await {
            warn!("图片 {} 写入索引失败: {}", id, e);
            self.release_id(id, "index insert failed").await;
            return Err(e.into());
        }

        if let Err(e) = self.blobs.put(id, &bytes).await {
            warn!("图片 {} 保存失败: {}", id, e);
            self.rollback(id, "blob persist failed").await;
            return Err(AddError::BlobPersistFailed(e));
        }

        let record = ImageRecord {
            id,
            filename,
            description,
            created_at: Utc::now(),
            size: bytes.len() as u64,
            checksum: *blake3::hash(&bytes).as_bytes(),
        };
        if let Err(e) = self.catalog.put(&record).await {
            warn!("图片 {} 提交目录失败: {}", id, e);
            self.rollback(id, "catalog commit failed").await;
            return Err(e.into());
        }

        debug!("添加图片 {}: {}", id, record.filename);
        Ok(record)
    }

    /// 撤销一次未完成的添加，可以重复执行
    async fn rollback(&self, id: ImageId, reason: &str) {
        if let Err(e) = self.discard_vector(id).await {
            error!("回滚图片 {} 的向量失败: {}", id, e);
        }
        if let Err(e) = self.discard_blob(id).await {
            error!("回滚图片 {} 的数据失败: {}", id, e);
        }
        self.release_id(id, reason).await;
    }

    async fn release_id(&self, id: ImageId, reason: &str) {
        if let Err(e) = self.catalog.tombstone(id, reason).await {
            error!("标记 ID {} 失败: {}", id, e);
        }
    }

    /// 删除向量，返回它是否存在
    async fn discard_vector(&self, id: ImageId) -> Result<bool, IndexError> {
        match self.with_index(move |index| index.remove(id)).await {
            Ok(()) => Ok(true),
            Err(IndexError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 删除图片数据，返回它是否存在
    async fn discard_blob(&self, id: ImageId) -> Result<bool, BlobError> {
        match self.blobs.remove(id).await {
            Ok(()) => Ok(true),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 按 ID 升序列出所有图片
    pub async fn list(&self) -> Result<Vec<ImageRecord>, CatalogError> {
        self.catalog.list().try_collect().await
    }

    pub fn list_stream(&self) -> impl Stream<Item = Result<ImageRecord, CatalogError>> + Send + '_ {
        self.catalog.list()
    }

    /// 用文本搜索最相似的 k 张图片
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let vector = self.embed(self.embedder.embed_text(query)).await?;
        self.search_by_vector(vector, k).await
    }

    /// 用向量搜索最相似的 k 张图片
    pub async fn search_by_vector(&self, vector: Vec<f32>, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        if k == 0 {
            return Ok(vec![]);
        }
        let start = Instant::now();

        // 添加中的图片已经写入索引但还不可见，多取一些结果弥补被过滤掉的部分
        let fetch = k.saturating_add(self.pending().len());
        let neighbors = self.with_index(move |index| index.search(&vector, fetch)).await?;

        let mut hits = Vec::with_capacity(k.min(neighbors.len()));
        for neighbor in neighbors {
            if hits.len() == k {
                break;
            }
            match self.catalog.get(neighbor.id).await? {
                Some(record) => hits.push(SearchHit { record, similarity: neighbor.similarity }),
                None if self.pending().contains(&neighbor.id) => {
                    debug!("跳过尚未提交的图片 {}", neighbor.id);
                }
                None => {
                    warn!("一致性错误：索引中的向量 {} 在目录中不存在", neighbor.id);
                    metrics::inc_consistency_fault("missing_record");
                }
            }
        }

        metrics::observe_search_duration(start.elapsed());
        Ok(hits)
    }

    pub async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, CatalogError> {
        self.catalog.get(id).await
    }

    /// 读取原始图片数据
    pub async fn get_blob(&self, id: ImageId) -> Result<Vec<u8>, GetError> {
        let record = self.catalog.get(id).await?.ok_or(GetError::NotFound(id))?;
        let bytes = match self.blobs.get(id).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(_)) => {
                warn!("一致性错误：图片 {} 的数据不存在", id);
                metrics::inc_consistency_fault("missing_blob");
                return Err(GetError::NotFound(id));
            }
            Err(e) => return Err(GetError::Blob(e)),
        };
        if blake3::hash(&bytes).as_bytes() != &record.checksum {
            warn!("一致性错误：图片 {} 的数据校验失败", id);
            metrics::inc_consistency_fault("checksum");
            return Err(GetError::Corrupted(id));
        }
        Ok(bytes)
    }

    /// 删除一张图片，返回时图片已经不可见，向量和数据也已删除
    pub async fn remove(&self, id: ImageId) -> Result<(), RemoveError> {
        self.catalog.remove(id).await.map_err(|e| match e {
            CatalogError::NotFound(id) => RemoveError::NotFound(id),
            e => RemoveError::Catalog(e),
        })?;
        if !self.discard_vector(id).await? {
            warn!("一致性错误：图片 {} 没有对应的向量", id);
            metrics::inc_consistency_fault("missing_vector");
        }
        if !self.discard_blob(id).await? {
            warn!("一致性错误：图片 {} 的数据不存在", id);
            metrics::inc_consistency_fault("missing_blob");
        }
        info!("删除图片 {}", id);
        Ok(())
    }

    /// 检查目录、索引与图片存储之间的一致性，并修复发现的问题
    ///
    /// 不在目录中的向量和图片数据会被删除，缺少向量或数据的目录记录也会被删除。
    /// 检查期间新的添加会等待，已经在添加中的图片不受影响。
    /// 需要独占数据目录，其他进程正在使用时返回错误。
    pub async fn reconcile(&self) -> Result<RecoveryReport> {
        self.try_reconcile().await?.ok_or_else(|| anyhow!("数据目录正被其他进程使用，无法进行一致性检查"))
    }

    async fn try_reconcile(&self) -> Result<Option<RecoveryReport>> {
        let _admission = self.admission.write().await;
        let Some(_exclusive) = self.dir_lock.try_exclusive()? else {
            return Ok(None);
        };

        info!("检查目录、索引与图片存储的一致性");
        // 必须先于其他快照：此后提交的添加都在这个集合中
        let pending = self.pending().clone();
        let records = self.catalog.ids().await?.into_iter().collect::<HashSet<_>>();
        let vectors = self.with_index(|index| Ok(index.ids())).await?.into_iter().collect::<HashSet<_>>();
        let blobs = self.blobs.ids().await?.into_iter().collect::<HashSet<_>>();

        let mut report = RecoveryReport::default();

        for &id in &records {
            if vectors.contains(&id) && blobs.contains(&id) {
                continue;
            }
            // 可能正在被删除
            if self.catalog.get(id).await?.is_none() {
                continue;
            }
            warn!("一致性错误：图片 {} 缺少向量或数据，删除该记录", id);
            metrics::inc_consistency_fault("dangling_record");
            match self.catalog.remove(id).await {
                Ok(()) | Err(CatalogError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.discard_vector(id).await?;
            self.discard_blob(id).await?;
            report.dangling_records.push(id);
        }

        for &id in vectors.difference(&records).filter(|id| !pending.contains(id)) {
            warn!("一致性错误：向量 {} 在目录中不存在，删除该向量", id);
            metrics::inc_consistency_fault("orphan_vector");
            self.discard_vector(id).await?;
            self.release_id(id, "orphan vector").await;
            report.orphan_vectors.push(id);
        }

        for &id in blobs.difference(&records).filter(|id| !pending.contains(id)) {
            warn!("一致性错误：图片数据 {} 在目录中不存在，删除该数据", id);
            metrics::inc_consistency_fault("orphan_blob");
            self.discard_blob(id).await?;
            self.release_id(id, "orphan blob").await;
            report.orphan_blobs.push(id);
        }

        report.partial_blobs = self.blobs.sweep(&pending).await?;
        if !report.partial_blobs.is_empty() {
            warn!("删除了 {} 个未完成的图片数据", report.partial_blobs.len());
        }

        report.dangling_records.sort_unstable();
        report.orphan_vectors.sort_unstable();
        report.orphan_blobs.sort_unstable();
        Ok(Some(report))
    }

    pub async fn stats(&self) -> Result<EngineStats, CatalogError> {
        Ok(EngineStats {
            images: self.catalog.count().await?,
            vectors: self.index.size(),
            dimension: self.index.dimension(),
            tombstones: self.catalog.tombstones().await?,
        })
    }
}
