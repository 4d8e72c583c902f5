use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use log::{error, info};
use rayon::prelude::*;

use super::{Neighbor, VectorIndex, VectorLog, validate_vector};
use crate::ImageId;
use crate::error::IndexError;

const STRIPES: usize = 64;

/// 为内存索引加上持久化
///
/// 每次写入先落盘到向量日志，成功后再修改内存索引，重启时从日志重放。
/// 同一个 ID 的写操作通过条带锁串行化，保证日志与内存索引一致。
pub struct DurableIndex<I> {
    inner: I,
    log: VectorLog,
    stripes: Box<[Mutex<()>]>,
}

impl<I: VectorIndex> DurableIndex<I> {
    /// 打开向量日志，并用 `build` 创建的内存索引重放其中的全部向量
    pub fn open<P, F>(path: P, dimension: Option<usize>, build: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(Option<usize>) -> I,
    {
        let log = VectorLog::open(path, dimension)?;
        let inner = build(log.dimension()?);

        let entries = log.entries()?;
        info!("从向量日志恢复 {} 个向量", entries.len());
        entries.par_iter().try_for_each(|(id, vector)| inner.insert(*id, vector))?;

        let stripes = (0..STRIPES).map(|_| Mutex::new(())).collect();
        Ok(Self { inner, log, stripes })
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    fn lock(&self, id: ImageId) -> MutexGuard<'_, ()> {
        self.stripes[(id % STRIPES as u64) as usize].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I: VectorIndex> VectorIndex for DurableIndex<I> {
    fn insert(&self, id: ImageId, vector: &[f32]) -> Result<(), IndexError> {
        validate_vector(vector)?;
        let _guard = self.lock(id);
        match self.inner.dimension() {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch { expected, actual: vector.len() });
            }
            _ => {}
        }
        if self.inner.contains(id) {
            return Err(IndexError::DuplicateId(id));
        }

        self.log.put(id, vector)?;
        if let Err(err) = self.inner.insert(id, vector) {
            if let Err(e) = self.log.delete(id) {
                error!("撤销向量 {} 的日志失败: {}", id, e);
            }
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, id: ImageId) -> Result<(), IndexError> {
        let _guard = self.lock(id);
        let logged = self.log.delete(id)?;
        match self.inner.remove(id) {
            Err(IndexError::NotFound(_)) if logged => Ok(()),
            result => result,
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.inner.search(query, k)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    fn contains(&self, id: ImageId) -> bool {
        self.inner.contains(id)
    }

    fn ids(&self) -> Vec<ImageId> {
        self.inner.ids()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::index::{FlatIndex, HnswIndex, HnswParams};

    fn open_flat(dir: &TempDir) -> DurableIndex<FlatIndex> {
        DurableIndex::open(dir.path(), None, |d| FlatIndex::new(d, 4)).unwrap()
    }

    #[test]
    fn reopen_restores_vectors() {
        let dir = TempDir::new().unwrap();
        {
            let index = open_flat(&dir);
            index.insert(1, &[1.0, 0.0]).unwrap();
            index.insert(2, &[0.0, 1.0]).unwrap();
            index.insert(3, &[0.7, 0.7]).unwrap();
            index.remove(2).unwrap();
        }
        let index = open_flat(&dir);
        assert_eq!(index.ids(), vec![1, 3]);
        assert_eq!(index.dimension(), Some(2));
        assert_eq!(index.search(&[1.0, 0.0], 1).unwrap()[0].id, 1);
        assert!(matches!(index.insert(1, &[1.0, 1.0]), Err(IndexError::DuplicateId(1))));
    }

    #[test]
    fn hnsw_rebuilds_from_the_same_log() {
        let dir = TempDir::new().unwrap();
        {
            let index = open_flat(&dir);
            index.insert(1, &[1.0, 0.0]).unwrap();
            index.insert(2, &[0.0, 1.0]).unwrap();
        }
        let index = DurableIndex::open(dir.path(), None, |d| HnswIndex::new(d, HnswParams::default())).unwrap();
        assert_eq!(index.size(), 2);
        assert_eq!(index.search(&[0.0, 1.0], 1).unwrap()[0].id, 2);
    }

    #[test]
    fn failed_insert_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        {
            let index = open_flat(&dir);
            index.insert(1, &[1.0, 0.0]).unwrap();
            assert!(matches!(index.insert(2, &[1.0]), Err(IndexError::DimensionMismatch { .. })));
            assert!(matches!(index.insert(3, &[f32::NAN, 0.0]), Err(IndexError::InvalidVector)));
        }
        let index = open_flat(&dir);
        assert_eq!(index.ids(), vec![1]);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let index = open_flat(&dir);
        assert!(matches!(index.remove(7), Err(IndexError::NotFound(7))));
    }
}
