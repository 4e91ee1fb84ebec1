//! 运行统计
//!
//! 每次顶层同步调用只有一个 [`RunStats`]，worker、扫描器和删除阶段只能通过
//! 递增方法修改它；同一组计数在一把锁内完成更新。

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub files_checked: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_copied: u64,
    pub bytes_deleted: u64,
    pub dirs_created: u64,
    pub dirs_deleted: u64,
    // 预览（dry-run）计数
    pub files_to_copy: u64,
    pub files_to_delete: u64,
    pub bytes_to_copy: u64,
    pub bytes_to_delete: u64,
    pub dirs_to_create: u64,
    pub dirs_to_delete: u64,
    pub errors: Vec<String>,
}

impl StatsSnapshot {
    /// 预览中计划执行的操作总数
    pub fn planned_operations(&self) -> u64 {
        self.files_to_copy + self.files_to_delete + self.dirs_to_create + self.dirs_to_delete
    }

    /// 实际执行的操作总数
    pub fn performed_operations(&self) -> u64 {
        self.files_copied + self.files_deleted + self.dirs_created + self.dirs_deleted
    }
}

/// 线程安全的统计累加器
#[derive(Debug, Default)]
pub struct RunStats {
    inner: Mutex<StatsSnapshot>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_checked(&self) {
        self.lock().files_checked += 1;
    }

    pub fn record_copied(&self, bytes: u64) {
        let mut s = self.lock();
        s.files_copied += 1;
        s.bytes_copied += bytes;
    }

    pub fn record_deleted(&self, bytes: u64) {
        let mut s = self.lock();
        s.files_deleted += 1;
        s.bytes_deleted += bytes;
    }

    pub fn record_dir_created(&self) {
        self.lock().dirs_created += 1;
    }

    pub fn record_dir_deleted(&self) {
        self.lock().dirs_deleted += 1;
    }

    pub fn record_to_copy(&self, bytes: u64) {
        let mut s = self.lock();
        s.files_to_copy += 1;
        s.bytes_to_copy += bytes;
    }

    pub fn record_to_delete(&self, bytes: u64) {
        let mut s = self.lock();
        s.files_to_delete += 1;
        s.bytes_to_delete += bytes;
    }

    pub fn record_dir_to_create(&self) {
        self.lock().dirs_to_create += 1;
    }

    pub fn record_dir_to_delete(&self) {
        self.lock().dirs_to_delete += 1;
    }

    /// 记录一条非致命错误，同时输出到日志
    pub fn add_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.lock().errors.push(message);
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }
}
