use std::collections::BinaryHeap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Neighbor;

// 预分配的上限，k 由调用方传入，可能远大于实际的向量数量
const PREALLOC: usize = 1024;

/// 保留最相似的 k 个结果，堆顶为当前最差的结果
pub struct TopKNeighbors {
    heap: BinaryHeap<Neighbor>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k.min(PREALLOC) + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
            return;
        }
        match self.heap.peek() {
            Some(worst) if neighbor < *worst => {
                self.heap.pop();
                self.heap.push(neighbor);
            }
            _ => {}
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        for neighbor in other.heap {
            self.push(neighbor);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// 按最终顺序返回
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

// 持锁线程 panic 后数据仍然是完整的，因为所有写操作都是单次 HashMap 调用
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
