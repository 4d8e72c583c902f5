//! 原始图片数据的存储

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::ImageId;
use crate::error::BlobError;

/// 按图片 ID 存取原始图片数据
pub trait BlobStore: Send + Sync {
    /// 保存图片数据，返回时数据已经写入磁盘
    fn put(&self, id: ImageId, bytes: &[u8]) -> impl Future<Output = Result<(), BlobError>> + Send;

    fn get(&self, id: ImageId) -> impl Future<Output = Result<Vec<u8>, BlobError>> + Send;

    fn remove(&self, id: ImageId) -> impl Future<Output = Result<(), BlobError>> + Send;

    /// 所有已保存的图片 ID，用于启动时的一致性检查
    fn ids(&self) -> impl Future<Output = Result<Vec<ImageId>, BlobError>> + Send;

    /// 清理崩溃时写了一半的数据，`keep` 中的 ID 正在写入，不做处理
    fn sweep(&self, keep: &HashSet<ImageId>) -> impl Future<Output = Result<Vec<ImageId>, BlobError>> + Send;
}

/// 以文件形式保存图片，路径为 `<root>/<id % 256>/<id>`
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, id: ImageId) -> PathBuf {
        self.root.join(format!("{:02x}", id % 256)).join(id.to_string())
    }
}

fn not_found(id: ImageId, err: io::Error) -> BlobError {
    match err.kind() {
        io::ErrorKind::NotFound => BlobError::NotFound(id),
        _ => BlobError::Io(err),
    }
}

impl BlobStore for FsBlobStore {
    async fn put(&self, id: ImageId, bytes: &[u8]) -> Result<(), BlobError> {
        if bytes.is_empty() {
            return Err(BlobError::Empty);
        }
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 先写入临时文件再重命名，避免留下写了一半的图片
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        debug!("保存图片 {} 到 {}", id, path.display());
        Ok(())
    }

    async fn get(&self, id: ImageId) -> Result<Vec<u8>, BlobError> {
        fs::read(self.path(id)).await.map_err(|e| not_found(id, e))
    }

    async fn remove(&self, id: ImageId) -> Result<(), BlobError> {
        fs::remove_file(self.path(id)).await.map_err(|e| not_found(id, e))
    }

    async fn ids(&self) -> Result<Vec<ImageId>, BlobError> {
        let root = self.root.clone();
        let ids = tokio::task::spawn_blocking(move || {
            WalkDir::new(root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.file_name().to_str()?.parse::<ImageId>().ok())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(io::Error::other)?;
        Ok(ids)
    }

    async fn sweep(&self, keep: &HashSet<ImageId>) -> Result<Vec<ImageId>, BlobError> {
        let root = self.root.clone();
        let partial = tokio::task::spawn_blocking(move || {
            WalkDir::new(root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let id = entry.file_name().to_str()?.strip_suffix(".tmp")?.parse::<ImageId>().ok()?;
                    Some((id, entry.into_path()))
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(io::Error::other)?;

        let mut removed = vec![];
        for (id, path) in partial.into_iter().filter(|(id, _)| !keep.contains(id)) {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            debug!("删除未完成的图片数据 {}", path.display());
            removed.push(id);
        }
        removed.sort_unstable();
        Ok(removed)
    }
}
