//! 数据目录的进程间锁
//!
//! 每个打开的引擎在整个生命周期内持有共享锁，一致性检查需要独占锁，
//! 因此只有在没有其他进程使用数据目录时才会删除孤立的向量和图片数据。

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;
use log::error;

pub struct DirLock {
    file: File,
}

impl DirLock {
    /// 打开锁文件并获取共享锁，其他进程正在做一致性检查时会等待
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    /// 尝试将共享锁换成独占锁，其他进程持有锁时返回 `None`
    pub fn try_exclusive(&self) -> io::Result<Option<ExclusiveGuard<'_>>> {
        self.file.unlock()?;
        loop {
            match self.file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(ExclusiveGuard { file: &self.file })),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.file.lock_shared()?;
                    if err.kind() == fs2::lock_contended_error().kind() {
                        return Ok(None);
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// 离开作用域时换回共享锁
pub struct ExclusiveGuard<'a> {
    file: &'a File,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock().and_then(|_| self.file.lock_shared()) {
            error!("恢复数据目录的共享锁失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn exclusive_only_when_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("imembed.lock");

        let a = DirLock::open(&path).unwrap();
        assert!(a.try_exclusive().unwrap().is_some());

        let b = DirLock::open(&path).unwrap();
        assert!(a.try_exclusive().unwrap().is_none());
        assert!(b.try_exclusive().unwrap().is_none());

        drop(a);
        let guard = b.try_exclusive().unwrap();
        assert!(guard.is_some());
        drop(guard);

        // 独占锁释放后仍然持有共享锁
        let c = DirLock::open(&path).unwrap();
        assert!(c.try_exclusive().unwrap().is_none());
    }
}
