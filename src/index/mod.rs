//! 余弦相似度向量索引
//!
//! 所有实现都以 `&self` 提供读写，内部自行处理并发，可以直接放进 `Arc` 在线程间共享。

use std::cmp::Ordering;
use std::sync::OnceLock;

use serde::Serialize;

use crate::ImageId;
use crate::error::IndexError;

pub mod durable;
pub mod flat;
pub mod hnsw;
pub mod vector_log;
mod utils;

pub use durable::DurableIndex;
pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};
pub use vector_log::VectorLog;

pub trait VectorIndex: Send + Sync {
    /// 插入一个向量，第一次插入时确定索引维度
    fn insert(&self, id: ImageId, vector: &[f32]) -> Result<(), IndexError>;

    /// 删除一个向量
    fn remove(&self, id: ImageId) -> Result<(), IndexError>;

    /// 返回与查询向量最相似的 `min(k, size)` 个结果，按相似度降序排列，相似度相同时 ID 小的在前
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;

    fn size(&self) -> usize;

    /// 索引维度，尚未插入任何向量且没有预先指定时为 None
    fn dimension(&self) -> Option<usize>;

    fn contains(&self, id: ImageId) -> bool;

    fn ids(&self) -> Vec<ImageId>;
}

/// 搜索结果
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Neighbor {
    pub id: ImageId,
    /// 余弦相似度，范围为 [-1, 1]
    pub similarity: f32,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    /// 越相似的结果越小，排序后即为最终的返回顺序
    fn cmp(&self, other: &Self) -> Ordering {
        other.similarity.total_cmp(&self.similarity).then(self.id.cmp(&other.id))
    }
}

/// 索引中保存的向量，同时缓存了它的模长
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    vector: Box<[f32]>,
    norm: f32,
}

impl Entry {
    pub fn new(vector: &[f32]) -> Self {
        Self { vector: vector.into(), norm: l2_norm(vector) }
    }

    pub fn similarity(&self, query: &[f32], query_norm: f32) -> f32 {
        similarity_from_parts(dot(query, &self.vector), query_norm, self.norm)
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// 余弦相似度，任意一侧为零向量时返回 0
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    similarity_from_parts(dot(a, b), l2_norm(a), l2_norm(b))
}

fn similarity_from_parts(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 向量不能为空，也不能包含 NaN 或无穷大
pub(crate) fn validate_vector(vector: &[f32]) -> Result<(), IndexError> {
    if vector.is_empty() || vector.iter().any(|x| !x.is_finite()) {
        return Err(IndexError::InvalidVector);
    }
    Ok(())
}

/// 检查待插入向量，索引维度尚未确定时以该向量为准
pub(crate) fn check_insert(dimension: &OnceLock<usize>, vector: &[f32]) -> Result<(), IndexError> {
    validate_vector(vector)?;
    let expected = *dimension.get_or_init(|| vector.len());
    if expected != vector.len() {
        return Err(IndexError::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(())
}

/// 检查查询向量，查询不会确定索引维度
pub(crate) fn check_query(dimension: &OnceLock<usize>, query: &[f32]) -> Result<(), IndexError> {
    validate_vector(query)?;
    match dimension.get() {
        Some(&expected) if expected != query.len() => {
            Err(IndexError::DimensionMismatch { expected, actual: query.len() })
        }
        _ => Ok(()),
    }
}
