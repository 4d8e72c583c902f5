use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry as MapEntry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

use hnsw_rs::prelude::*;
use log::debug;

use super::utils::{TopKNeighbors, read, write};
use super::{Entry, Neighbor, VectorIndex, check_insert, check_query, cosine, l2_norm};
use crate::ImageId;
use crate::error::IndexError;

/// 余弦距离，即 1 - 余弦相似度
struct DistCosine;

impl Distance<f32> for DistCosine {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        1.0 - cosine(va, vb)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// 每个节点的最大连接数
    pub max_connections: usize,
    /// 构建时的候选集大小
    pub ef_construction: usize,
    /// 搜索时的候选集大小
    pub ef_search: usize,
    /// 预计的向量数量，仅用于计算层数
    pub capacity: usize,
    /// 向量数量不超过该值时直接精确搜索
    pub exact_threshold: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { max_connections: 16, ef_construction: 200, ef_search: 64, capacity: 100_000, exact_threshold: 256 }
    }
}

/// 基于 HNSW 图的近似索引
///
/// HNSW 图不支持删除，删除的向量只从 `live` 中移除，图中的节点在搜索时被过滤掉。
/// 图搜索的候选数量会加上已删除的节点数，并用精确的余弦相似度重新排序。
/// 过滤后结果不足 `min(k, size)` 个时退回到精确搜索，保证结果数量。
pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    live: RwLock<HashMap<ImageId, Entry>>,
    /// 图中已经删除的节点数量
    dead: AtomicUsize,
    dimension: OnceLock<usize>,
    params: HnswParams,
}

impl HnswIndex {
    pub fn new(dimension: Option<usize>, params: HnswParams) -> Self {
        let hnsw = Hnsw::<f32, _>::new(params.max_connections, params.capacity, 16, params.ef_construction, DistCosine);
        Self {
            hnsw,
            live: RwLock::new(HashMap::new()),
            dead: AtomicUsize::new(0),
            dimension: dimension.map(OnceLock::from).unwrap_or_default(),
            params,
        }
    }

    /// 图中已删除、等待重建时清理的节点数量
    pub fn tombstones(&self) -> usize {
        self.dead.load(Ordering::Relaxed)
    }

    fn exact(live: &HashMap<ImageId, Entry>, query: &[f32], k: usize) -> Vec<Neighbor> {
        let query_norm = l2_norm(query);
        let mut top = TopKNeighbors::new(k);
        for (&id, entry) in live.iter() {
            top.push(Neighbor { id, similarity: entry.similarity(query, query_norm) });
        }
        top.into_sorted_vec()
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&self, id: ImageId, vector: &[f32]) -> Result<(), IndexError> {
        check_insert(&self.dimension, vector)?;
        match write(&self.live).entry(id) {
            MapEntry::Occupied(_) => return Err(IndexError::DuplicateId(id)),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(vector));
            }
        }
        self.hnsw.insert((vector, id as usize));
        Ok(())
    }

    fn remove(&self, id: ImageId) -> Result<(), IndexError> {
        write(&self.live).remove(&id).ok_or(IndexError::NotFound(id))?;
        self.dead.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_query(&self.dimension, query)?;
        if k == 0 {
            return Ok(vec![]);
        }

        let size = read(&self.live).len();
        if size <= self.params.exact_threshold {
            return Ok(Self::exact(&read(&self.live), query, k));
        }

        // 图中的节点数量是候选数量的上限
        let knbn = k.min(size).saturating_add(self.tombstones());
        let ef = self.params.ef_search.max(knbn);
        let candidates = self.hnsw.search(query, knbn, ef);

        let live = read(&self.live);
        let query_norm = l2_norm(query);
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut top = TopKNeighbors::new(k);
        for candidate in candidates {
            let id = candidate.d_id as ImageId;
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = live.get(&id) {
                top.push(Neighbor { id, similarity: entry.similarity(query, query_norm) });
            }
        }

        if top.len() < k.min(live.len()) {
            debug!("HNSW 结果不足 {} 个，回退到精确搜索", k.min(live.len()));
            return Ok(Self::exact(&live, query, k));
        }
        Ok(top.into_sorted_vec())
    }

    fn size(&self) -> usize {
        read(&self.live).len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    fn contains(&self, id: ImageId) -> bool {
        read(&self.live).contains_key(&id)
    }

    fn ids(&self) -> Vec<ImageId> {
        let mut ids = read(&self.live).keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rayon::prelude::*;
    use rstest::*;

    use super::*;
    use crate::index::FlatIndex;

    const DIM: usize = 32;

    fn graph_only() -> HnswParams {
        HnswParams { ef_search: 100, capacity: 2_000, exact_threshold: 0, ..Default::default() }
    }

    fn random_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect()).collect()
    }

    #[fixture]
    #[once]
    fn dataset() -> Vec<Vec<f32>> {
        random_vectors(2_000, 42)
    }

    #[rstest]
    fn small_index_matches_scenario() {
        let index = HnswIndex::new(None, HnswParams::default());
        index.insert(1, &[1.0, 0.0]).unwrap();
        index.insert(2, &[0.0, 1.0]).unwrap();
        index.insert(3, &[0.7, 0.7]).unwrap();
        let result = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(result.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 3]);
        assert!((result[0].similarity - 1.0).abs() < 1e-6);
    }

    #[rstest]
    fn recall_against_exact_search(dataset: &Vec<Vec<f32>>) {
        let hnsw = HnswIndex::new(None, graph_only());
        let flat = FlatIndex::new(None, 4);
        dataset.par_iter().enumerate().for_each(|(i, v)| {
            hnsw.insert(i as u64 + 1, v).unwrap();
            flat.insert(i as u64 + 1, v).unwrap();
        });

        let queries = random_vectors(20, 7);
        let mut hits = 0;
        for query in &queries {
            let expected = flat.search(query, 10).unwrap().iter().map(|n| n.id).collect::<HashSet<_>>();
            let actual = hnsw.search(query, 10).unwrap();
            assert_eq!(actual.len(), 10);
            hits += actual.iter().filter(|n| expected.contains(&n.id)).count();
        }
        let recall = hits as f32 / (queries.len() * 10) as f32;
        assert!(recall >= 0.9, "recall too low: {recall}");
    }

    #[rstest]
    fn stored_vector_finds_itself(dataset: &Vec<Vec<f32>>) {
        let index = HnswIndex::new(None, graph_only());
        for (i, v) in dataset.iter().take(500).enumerate() {
            index.insert(i as u64 + 1, v).unwrap();
        }
        let top = index.search(&dataset[123], 1).unwrap();
        assert_eq!(top[0].id, 124);
        assert!((top[0].similarity - 1.0).abs() < 1e-5);
    }

    #[rstest]
    fn removed_vectors_are_filtered(dataset: &Vec<Vec<f32>>) {
        let index = HnswIndex::new(None, graph_only());
        for (i, v) in dataset.iter().take(50).enumerate() {
            index.insert(i as u64 + 1, v).unwrap();
        }
        for id in 1..=45 {
            index.remove(id).unwrap();
        }
        assert_eq!(index.tombstones(), 45);
        let result = index.search(&dataset[0], 10).unwrap();
        assert_eq!(result.len(), 5);
        assert!(result.iter().all(|n| n.id > 45));
        assert!(matches!(index.remove(1), Err(IndexError::NotFound(1))));
    }

    #[rstest]
    #[case(HnswParams::default())]
    #[case(graph_only())]
    fn huge_k_returns_every_live_vector(dataset: &Vec<Vec<f32>>, #[case] params: HnswParams) {
        let index = HnswIndex::new(None, params);
        for (i, v) in dataset.iter().take(300).enumerate() {
            index.insert(i as u64 + 1, v).unwrap();
        }
        index.remove(7).unwrap();
        let result = index.search(&dataset[0], usize::MAX).unwrap();
        assert_eq!(result.len(), 299);
        assert_eq!(result[0].id, 1);
        assert!(result.windows(2).all(|w| w[0] < w[1]));
    }

    #[rstest]
    fn rejects_duplicates_and_wrong_dimension() {
        let index = HnswIndex::new(Some(2), HnswParams::default());
        index.insert(1, &[1.0, 0.0]).unwrap();
        assert!(matches!(index.insert(1, &[0.0, 1.0]), Err(IndexError::DuplicateId(1))));
        assert!(matches!(
            index.insert(2, &[0.0, 1.0, 0.0]),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(index.size(), 1);
    }
}
