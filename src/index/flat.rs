use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::{OnceLock, RwLock};

use rayon::prelude::*;

use super::utils::{TopKNeighbors, read, write};
use super::{Entry, Neighbor, VectorIndex, check_insert, check_query, l2_norm};
use crate::ImageId;
use crate::error::IndexError;

type Shard = RwLock<HashMap<ImageId, Entry>>;

/// 精确的暴力搜索索引
///
/// 向量按 ID 分散到多个分片，写操作只锁住一个分片，搜索时并行扫描全部分片后合并结果。
pub struct FlatIndex {
    shards: Box<[Shard]>,
    dimension: OnceLock<usize>,
}

impl FlatIndex {
    pub fn new(dimension: Option<usize>, shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards, dimension: dimension.map(OnceLock::from).unwrap_or_default() }
    }

    fn shard(&self, id: ImageId) -> &Shard {
        &self.shards[(id % self.shards.len() as u64) as usize]
    }
}

impl VectorIndex for FlatIndex {
    fn insert(&self, id: ImageId, vector: &[f32]) -> Result<(), IndexError> {
        check_insert(&self.dimension, vector)?;
        match write(self.shard(id)).entry(id) {
            MapEntry::Occupied(_) => Err(IndexError::DuplicateId(id)),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(vector));
                Ok(())
            }
        }
    }

    fn remove(&self, id: ImageId) -> Result<(), IndexError> {
        write(self.shard(id)).remove(&id).map(|_| ()).ok_or(IndexError::NotFound(id))
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_query(&self.dimension, query)?;
        if k == 0 {
            return Ok(vec![]);
        }
        let query_norm = l2_norm(query);
        let top = self
            .shards
            .par_iter()
            .map(|shard| {
                let mut top = TopKNeighbors::new(k);
                for (&id, entry) in read(shard).iter() {
                    top.push(Neighbor { id, similarity: entry.similarity(query, query_norm) });
                }
                top
            })
            .reduce(|| TopKNeighbors::new(k), TopKNeighbors::merge);
        Ok(top.into_sorted_vec())
    }

    fn size(&self) -> usize {
        self.shards.iter().map(|shard| read(shard).len()).sum()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    fn contains(&self, id: ImageId) -> bool {
        read(self.shard(id)).contains_key(&id)
    }

    fn ids(&self) -> Vec<ImageId> {
        let mut ids = self
            .shards
            .iter()
            .flat_map(|shard| read(shard).keys().copied().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }
}
