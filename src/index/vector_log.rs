use std::path::Path;

use anyhow::{Result, bail};
use byteorder::BigEndian;
use heed::types::{DecodeIgnore, SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions, WithTls};
use log::info;
use serde::{Deserialize, Serialize};

use crate::ImageId;
use crate::error::IndexError;

const META_KEY: &str = "meta";

/// 存储在 lmdb 中的元数据
#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    /// 向量维度，写入第一个向量时确定
    dimension: u32,
}

/// 持久化的向量日志，内存索引在启动时从这里重建
///
/// 由于 lmdb 不保证读取到的数据是对齐的，向量直接使用 serde 编码存储。
/// key 使用大端序，保证按 ID 顺序遍历。
pub struct VectorLog {
    env: Env<WithTls>,
    db_meta: Database<Str, SerdeBincode<Meta>>,
    db_vectors: Database<U64<BigEndian>, SerdeBincode<Vec<f32>>>,
}

impl VectorLog {
    /// 打开向量日志，如果指定了维度则与已存储的维度进行校验
    pub fn open<P: AsRef<Path>>(path: P, dimension: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        info!("打开向量日志: {}", path.display());
        std::fs::create_dir_all(path)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 36) // 64GiB 的虚拟地址空间，足够存放千万级的 512 维向量
                .max_dbs(2)
                .open(path)?
        };

        let mut txn = env.write_txn()?;
        let db_meta = env.create_database::<Str, SerdeBincode<Meta>>(&mut txn, Some("meta"))?;
        let db_vectors = env.create_database::<U64<BigEndian>, SerdeBincode<Vec<f32>>>(&mut txn, Some("vectors"))?;
        match (db_meta.get(&txn, META_KEY)?, dimension) {
            (Some(meta), Some(dimension)) if meta.dimension as usize != dimension => {
                bail!("向量维度不匹配：日志中为 {}，配置为 {}", meta.dimension, dimension)
            }
            (None, Some(dimension)) => {
                db_meta.put(&mut txn, META_KEY, &Meta { dimension: dimension as u32 })?;
            }
            _ => {}
        }
        txn.commit()?;

        Ok(Self { env, db_meta, db_vectors })
    }

    /// 已确定的向量维度
    pub fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let txn = self.env.read_txn()?;
        Ok(self.db_meta.get(&txn, META_KEY)?.map(|meta| meta.dimension as usize))
    }

    /// 写入一个向量，ID 已存在或维度不一致时不做任何修改
    pub fn put(&self, id: ImageId, vector: &[f32]) -> Result<(), IndexError> {
        let mut txn = self.env.write_txn()?;
        match self.db_meta.get(&txn, META_KEY)? {
            Some(meta) if meta.dimension as usize != vector.len() => {
                return Err(IndexError::DimensionMismatch { expected: meta.dimension as usize, actual: vector.len() });
            }
            Some(_) => {}
            None => self.db_meta.put(&mut txn, META_KEY, &Meta { dimension: vector.len() as u32 })?,
        }
        if self.db_vectors.remap_data_type::<DecodeIgnore>().get(&txn, &id)?.is_some() {
            return Err(IndexError::DuplicateId(id));
        }
        self.db_vectors.put(&mut txn, &id, &vector.to_vec())?;
        txn.commit()?;
        Ok(())
    }

    /// 删除一个向量，返回它是否存在
    pub fn delete(&self, id: ImageId) -> Result<bool, IndexError> {
        let mut txn = self.env.write_txn()?;
        let deleted = self.db_vectors.delete(&mut txn, &id)?;
        txn.commit()?;
        Ok(deleted)
    }

    /// 按 ID 顺序读取全部向量
    pub fn entries(&self) -> Result<Vec<(ImageId, Vec<f32>)>, IndexError> {
        let txn = self.env.read_txn()?;
        let entries = self.db_vectors.iter(&txn)?.collect::<heed::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn len(&self) -> Result<u64, IndexError> {
        let txn = self.env.read_txn()?;
        Ok(self.db_vectors.len(&txn)?)
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn put_delete_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let log = VectorLog::open(dir.path(), None).unwrap();
            assert!(log.is_empty().unwrap());
            log.put(2, &[0.0, 1.0]).unwrap();
            log.put(1, &[1.0, 0.0]).unwrap();
            log.put(3, &[1.0, 1.0]).unwrap();
            assert!(log.delete(3).unwrap());
            assert!(!log.delete(3).unwrap());
        }
        let log = VectorLog::open(dir.path(), Some(2)).unwrap();
        assert_eq!(log.dimension().unwrap(), Some(2));
        assert_eq!(log.entries().unwrap(), vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);
    }

    #[test]
    fn rejects_duplicates_and_mismatched_dimensions() {
        let dir = TempDir::new().unwrap();
        let log = VectorLog::open(dir.path(), None).unwrap();
        log.put(1, &[1.0, 0.0]).unwrap();
        assert!(matches!(log.put(1, &[0.0, 1.0]), Err(IndexError::DuplicateId(1))));
        assert!(matches!(log.put(2, &[1.0]), Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })));
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn configured_dimension_must_match_stored_one() {
        let dir = TempDir::new().unwrap();
        drop(VectorLog::open(dir.path(), Some(4)).unwrap());
        assert!(VectorLog::open(dir.path(), Some(8)).is_err());
        let log = VectorLog::open(dir.path(), None).unwrap();
        assert_eq!(log.dimension().unwrap(), Some(4));
    }
}
