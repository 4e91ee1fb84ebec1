//! 并行执行复制 / 创建目录
//!
//! 生产者按比较结果把条目放入有界队列，N 个阻塞 worker 线程共享队列消费；
//! 队列关闭且取空后 worker 退出，全部退出才算完成。单个条目失败只记录，不中止。

use crate::core::comparator::{FileComparator, FileRelation};
use crate::core::stats::RunStats;
use crate::error::SyncError;
use crate::storage::local::{mode_of, set_mode, set_times};
use crate::storage::{FileEntry, LocalTree, PathMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 每个 worker 对应的队列深度
const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// 固定大小的 worker 池
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    threads: usize,
    dry_run: bool,
}

impl WorkerPool {
    pub fn new(threads: usize, dry_run: bool) -> Self {
        Self {
            threads: threads.max(1),
            dry_run,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// 执行所有需要同步的条目
    pub async fn run(
        &self,
        source_root: &Path,
        dest_root: &Path,
        source: Arc<PathMap>,
        dest: Arc<PathMap>,
        comparator: FileComparator,
        stats: Arc<RunStats>,
    ) -> Result<(), SyncError> {
        let (work_tx, work_rx) = mpsc::channel::<FileEntry>(self.threads * QUEUE_DEPTH_PER_WORKER);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<String>();

        // 生产者：比较并入队，结束时关闭队列
        let producer = {
            let stats = stats.clone();
            tokio::spawn(async move {
                let mut queued = 0usize;
                for entry in source.values() {
                    let relation = comparator.compare(entry, &dest);
                    if let FileRelation::ChecksumFallback { .. } = relation {
                        stats.add_error(format!(
                            "{} 缺少校验和，已回退为 mtime 比较",
                            entry.path
                        ));
                    }
                    if !relation.needs_sync() {
                        continue;
                    }
                    if work_tx.send(entry.clone()).await.is_err() {
                        break;
                    }
                    queued += 1;
                }
                queued
            })
        };

        let mut workers = Vec::with_capacity(self.threads);
        for id in 0..self.threads {
            let rx = work_rx.clone();
            let err_tx = err_tx.clone();
            let stats = stats.clone();
            let source_tree = LocalTree::new(source_root);
            let dest_tree = LocalTree::new(dest_root);
            let dry_run = self.dry_run;

            workers.push(tokio::task::spawn_blocking(move || {
                let mut processed = 0usize;
                loop {
                    let next = {
                        let mut guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.blocking_recv()
                    };
                    let Some(entry) = next else { break };

                    let outcome = if dry_run {
                        plan_entry(&entry, &stats);
                        Ok(())
                    } else {
                        sync_entry(&source_tree, &dest_tree, &entry, &stats)
                    };
                    if let Err(message) = outcome {
                        let _ = err_tx.send(message);
                    }
                    processed += 1;
                }
                debug!("worker {} 退出，处理 {} 个条目", id, processed);
            }));
        }
        drop(err_tx);

        // 错误收集：所有 worker 退出后通道关闭
        let collector = {
            let stats = stats.clone();
            tokio::spawn(async move {
                while let Some(message) = err_rx.recv().await {
                    stats.add_error(message);
                }
            })
        };

        let queued = producer.await?;
        for worker in workers {
            worker.await?;
        }
        collector.await?;

        info!("执行完成: {} 个条目, {} 个 worker", queued, self.threads);
        Ok(())
    }
}

/// dry-run：只累计计划中的操作
fn plan_entry(entry: &FileEntry, stats: &RunStats) {
    if entry.is_dir {
        debug!("将创建目录: {}", entry.path);
        stats.record_dir_to_create();
    } else {
        debug!("将复制: {} ({} 字节)", entry.path, entry.size);
        stats.record_to_copy(entry.size);
    }
}

/// 执行单个条目；返回的错误由调用方送入错误通道
///
/// 时间戳或权限设置失败不会撤销已完成的复制。
fn sync_entry(
    source: &LocalTree,
    dest: &LocalTree,
    entry: &FileEntry,
    stats: &RunStats,
) -> Result<(), String> {
    if entry.is_dir {
        dest.create_dir(&entry.path)
            .map_err(|e| format!("创建目录 {} 失败: {}", entry.path, e))?;
        debug!("已创建目录: {}", entry.path);
        stats.record_dir_created();
        return Ok(());
    }

    let source_path = source.resolve_path(&entry.path);
    let metadata = fs::metadata(&source_path)
        .map_err(|e| format!("读取源文件 {} 信息失败: {}", source_path.display(), e))?;

    let bytes = dest
        .write_from(&entry.path, &source_path)
        .map_err(|e| format!("复制文件 {} 失败: {}", source_path.display(), e))?;
    stats.record_copied(bytes);
    debug!("已复制: {} ({} 字节)", entry.path, bytes);

    let dest_path = dest.resolve_path(&entry.path);
    let mut problems = Vec::new();
    if let Some(mode) = mode_of(&metadata) {
        if let Err(e) = set_mode(&dest_path, mode) {
            problems.push(format!("保留 {} 的权限失败: {}", dest_path.display(), e));
        }
    }
    match metadata.modified() {
        Ok(mtime) => {
            if let Err(e) = set_times(&dest_path, mtime) {
                problems.push(format!("保留 {} 的时间戳失败: {}", dest_path.display(), e));
            }
        }
        Err(e) => problems.push(format!("读取 {} 的修改时间失败: {}", source_path.display(), e)),
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
