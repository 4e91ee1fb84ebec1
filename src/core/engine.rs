use crate::core::comparator::{CompareMethod, FileComparator};
use crate::core::executor::WorkerPool;
use crate::core::reconciler::DeletionReconciler;
use crate::core::report::SyncReport;
use crate::core::scanner::{BrokenLinkPolicy, FileScanner, ScanConfig};
use crate::core::stats::RunStats;
use crate::error::{Result, SyncError};
use crate::storage::{ArchiveCodec, ArchiveSettings, CryptoService, Endpoint, PathMap, TarCodec};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// 同步策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// 比较方法
    pub method: CompareMethod,
    /// 强制按内容摘要比较（覆盖 `method`）
    pub checksum: bool,
    pub recursive: bool,
    /// 删除目标中多余的条目
    pub delete: bool,
    /// 只统计计划操作，不修改任何文件
    pub dry_run: bool,
    /// worker 数量
    pub threads: usize,
    pub broken_links: BrokenLinkPolicy,
    pub verbose: bool,
    pub archive: ArchiveSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            method: CompareMethod::Mtime,
            checksum: false,
            recursive: true,
            delete: false,
            dry_run: false,
            threads: 4,
            broken_links: BrokenLinkPolicy::Warn,
            verbose: false,
            archive: ArchiveSettings::default(),
        }
    }
}

impl SyncConfig {
    /// 实际生效的比较方法
    pub fn compare_method(&self) -> CompareMethod {
        if self.checksum {
            CompareMethod::Checksum
        } else {
            self.method
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            recursive: self.recursive,
            compute_checksums: self.compare_method() == CompareMethod::Checksum,
            broken_links: self.broken_links,
        }
    }
}

/// 同步引擎
///
/// 每次 [`sync`](SyncEngine::sync) 调用都会重新扫描两端并新建统计，调用之间不共享状态。
pub struct SyncEngine {
    pub(crate) config: SyncConfig,
    pub(crate) codec: Arc<dyn ArchiveCodec>,
    pub(crate) crypto: Option<Arc<dyn CryptoService>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            codec: Arc::new(TarCodec::new()),
            crypto: None,
        }
    }

    /// 使用指定的加密服务（默认按需创建 `gpg` 命令行实现）
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoService>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ArchiveCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 运行一次同步
    ///
    /// 只有整棵树不可达时返回错误；单个条目的问题记录在报告的 `errors` 中。
    pub async fn sync(&self, source: &Path, dest: &Path) -> Result<SyncReport> {
        let started_at = chrono::Local::now();
        let start = Instant::now();
        let stats = Arc::new(RunStats::new());

        info!(
            "开始同步: {} -> {} (方法: {}, 线程: {}, dry-run: {})",
            source.display(),
            dest.display(),
            self.config.compare_method(),
            self.config.threads,
            self.config.dry_run
        );

        let source_endpoint = Endpoint::detect(source);
        let dest_endpoint = Endpoint::detect(dest);
        self.dispatch(&source_endpoint, &dest_endpoint, &stats).await?;

        let snapshot = stats.snapshot();
        info!(
            "同步结束: 复制 {} 个文件, 删除 {} 个文件, {} 个错误",
            snapshot.files_copied,
            snapshot.files_deleted,
            snapshot.errors.len()
        );

        Ok(SyncReport {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            dry_run: self.config.dry_run,
            started_at,
            elapsed: start.elapsed(),
            stats: snapshot,
        })
    }

    /// 目录到目录：扫描、比较、执行、清理
    pub(crate) async fn sync_directories(
        &self,
        source: &Path,
        dest: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        let dry_run = self.config.dry_run;

        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| SyncError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?;
        if !meta.is_dir() {
            return Err(SyncError::SourceNotDirectory(source.to_path_buf()));
        }

        let dest_exists = match tokio::fs::metadata(dest).await {
            Ok(m) if m.is_dir() => true,
            Ok(_) => return Err(SyncError::DestinationNotDirectory(dest.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if dry_run {
                    debug!("目标目录不存在，按空目录预览: {}", dest.display());
                } else {
                    tokio::fs::create_dir_all(dest).await.map_err(|e| {
                        SyncError::DestinationUncreatable {
                            path: dest.to_path_buf(),
                            source: e,
                        }
                    })?;
                    info!("已创建目标目录: {}", dest.display());
                }
                false
            }
            Err(e) => {
                return Err(SyncError::DestinationUnreadable {
                    path: dest.to_path_buf(),
                    source: e,
                })
            }
        };

        // 两端并行扫描
        let scanner = FileScanner::new(self.config.scan_config());
        let source_scan = spawn_scan(scanner.clone(), source.to_path_buf(), stats.clone());
        let dest_scan = dest_exists.then(|| spawn_scan(scanner, dest.to_path_buf(), stats.clone()));

        let source_map = source_scan
            .await?
            .map_err(|e| SyncError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?;
        let dest_map = match dest_scan {
            Some(task) => task.await?.map_err(|e| SyncError::DestinationUnreadable {
                path: dest.to_path_buf(),
                source: e,
            })?,
            None => PathMap::new(),
        };

        self.execute_plan(source, dest, source_map, dest_map, self.config.compare_method(), stats)
            .await
    }

    /// 对已经得到的两份快照执行比较、复制和清理
    pub(crate) async fn execute_plan(
        &self,
        source: &Path,
        dest: &Path,
        source_map: PathMap,
        dest_map: PathMap,
        method: CompareMethod,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        let dry_run = self.config.dry_run;
        let source_map = Arc::new(source_map);
        let dest_map = Arc::new(dest_map);

        WorkerPool::new(self.config.threads, dry_run)
            .run(
                source,
                dest,
                source_map.clone(),
                dest_map.clone(),
                FileComparator::new(method),
                stats.clone(),
            )
            .await?;

        if self.config.delete {
            let reconciler = DeletionReconciler::new(dry_run);
            let dest = dest.to_path_buf();
            let stats = stats.clone();
            tokio::task::spawn_blocking(move || {
                reconciler.reconcile(&dest, &source_map, &dest_map, &stats)
            })
            .await?;
        }

        Ok(())
    }
}

fn spawn_scan(
    scanner: FileScanner,
    root: PathBuf,
    stats: Arc<RunStats>,
) -> tokio::task::JoinHandle<io::Result<PathMap>> {
    tokio::task::spawn_blocking(move || scanner.scan(&root, &stats))
}
