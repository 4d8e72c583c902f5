use std::time::Duration;

use thiserror::Error;

use crate::ImageId;

/// 向量索引错误
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("向量维度不匹配：期望 {expected}，实际为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("向量 {0} 已存在")]
    DuplicateId(ImageId),
    #[error("向量 {0} 不存在")]
    NotFound(ImageId),
    #[error("向量为空或包含非有限值")]
    InvalidVector,
    #[error("向量日志读写失败: {0}")]
    Storage(#[from] heed::Error),
    #[error("索引任务异常退出: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 目录错误
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("图片 {0} 不存在")]
    NotFound(ImageId),
    #[error("图片 {0} 已存在")]
    Duplicate(ImageId),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
}

/// 图片存储错误
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("图片 {0} 的数据不存在")]
    NotFound(ImageId),
    #[error("图片数据为空")]
    Empty,
    #[error("图片数据读写失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 调用嵌入模型时的错误
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("嵌入计算失败: {0:#}")]
    Failed(anyhow::Error),
    #[error("嵌入计算超时 ({0:?})")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AddError {
    #[error("图片数据为空")]
    EmptyImage,
    #[error("嵌入计算失败: {0:#}")]
    EmbeddingFailed(anyhow::Error),
    #[error("嵌入计算超时 ({0:?})")]
    EmbeddingTimeout(Duration),
    #[error("向量维度不匹配：期望 {expected}，实际为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("图片数据保存失败: {0}")]
    BlobPersistFailed(#[source] BlobError),
    #[error("索引写入失败: {0}")]
    Index(#[source] IndexError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl AddError {
    /// 用于指标统计的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyImage => "empty_image",
            Self::EmbeddingFailed(_) => "embedding_failed",
            Self::EmbeddingTimeout(_) => "embedding_timeout",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::BlobPersistFailed(_) => "blob_persist_failed",
            Self::Index(_) => "index",
            Self::Catalog(_) => "catalog",
        }
    }
}

impl From<IndexError> for AddError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            err => Self::Index(err),
        }
    }
}

impl From<EmbedError> for AddError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Failed(err) => Self::EmbeddingFailed(err),
            EmbedError::Timeout(limit) => Self::EmbeddingTimeout(limit),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("查询内容不能为空")]
    EmptyQuery,
    #[error("嵌入计算失败: {0:#}")]
    EmbeddingFailed(anyhow::Error),
    #[error("嵌入计算超时 ({0:?})")]
    EmbeddingTimeout(Duration),
    #[error("向量维度不匹配：期望 {expected}，实际为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("索引查询失败: {0}")]
    Index(#[source] IndexError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            err => Self::Index(err),
        }
    }
}

impl From<EmbedError> for SearchError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Failed(err) => Self::EmbeddingFailed(err),
            EmbedError::Timeout(limit) => Self::EmbeddingTimeout(limit),
        }
    }
}

#[derive(Debug, Error)]
pub enum GetError {
    #[error("图片 {0} 不存在")]
    NotFound(ImageId),
    #[error("图片 {0} 的数据校验失败")]
    Corrupted(ImageId),
    #[error("图片数据读取失败: {0}")]
    Blob(#[source] BlobError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error("图片 {0} 不存在")]
    NotFound(ImageId),
    #[error("索引删除失败: {0}")]
    Index(#[from] IndexError),
    #[error("图片数据删除失败: {0}")]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
