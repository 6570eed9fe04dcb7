//! 有界历史缓冲区
//!
//! 校准记录、路由结果、修复结果都存放在固定容量的环形缓冲区里：只追加，满了按插入顺序淘汰最旧的一条。
//! 内部加锁，调用方可以从多个任务并发追加而无需自己同步。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// 默认容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct BoundedHistory<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedHistory<T> {
    /// capacity 为 0 时按 1 处理
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条记录，超出容量时淘汰最旧的记录；返回被淘汰的记录
    pub fn push(&self, entry: T) -> Option<T> {
        let mut entries = self.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 按插入顺序（旧 -> 新）拷贝出当前内容
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// 按插入顺序拷贝出满足条件的记录
    pub fn filter<F>(&self, mut predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.lock().iter().filter(|e| predicate(e)).cloned().collect()
    }

    // 锁中毒时仍然可以读写：缓冲区本身不会因为 panic 处于不一致状态
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
