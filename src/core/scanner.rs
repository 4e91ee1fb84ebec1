use crate::core::stats::RunStats;
use crate::storage::local::{calculate_hash, mode_of};
use crate::storage::{normalize_path, ArchiveEntryInfo, FileEntry, PathMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

/// 失效符号链接的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokenLinkPolicy {
    /// 静默跳过
    Skip,
    /// 记录警告并包含（不计算摘要）
    #[default]
    Warn,
}

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub recursive: bool,
    /// 是否计算内容摘要
    pub compute_checksums: bool,
    pub broken_links: BrokenLinkPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            compute_checksums: false,
            broken_links: BrokenLinkPolicy::Warn,
        }
    }
}

/// 文件扫描器
///
/// 扫描本身不共享可变状态（统计除外），源和目标可以并行扫描。
#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    config: ScanConfig,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 扫描目录树，根目录本身不包含在结果中
    ///
    /// 只有根目录不可读才返回错误；单个条目的问题记入统计后继续。
    pub fn scan(&self, root: &Path, stats: &RunStats) -> io::Result<PathMap> {
        let meta = fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} 不是目录", root.display()),
            ));
        }
        fs::read_dir(root)?;

        info!("开始扫描: {}", root.display());

        let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
        if !self.config.recursive {
            walker = walker.max_depth(1);
        }

        let mut tree = PathMap::new();
        let mut dir_count = 0usize;

        for item in walker {
            let entry = match item {
                Ok(e) => e,
                Err(e) => {
                    let at = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    stats.add_error(format!("访问 {} 出错: {}", at, e));
                    continue;
                }
            };

            let path = entry.path();
            let relative = match path.strip_prefix(root) {
                Ok(rel) => normalize_path(&rel.to_string_lossy()),
                Err(_) => continue,
            };

            let metadata = if entry.path_is_symlink() {
                match fs::metadata(path) {
                    Ok(m) => m,
                    Err(e) => {
                        match self.config.broken_links {
                            BrokenLinkPolicy::Skip => {
                                debug!("跳过失效的符号链接: {}", path.display());
                            }
                            BrokenLinkPolicy::Warn => {
                                stats.add_error(format!(
                                    "警告: 符号链接 {} 的目标不存在 ({})",
                                    path.display(),
                                    e
                                ));
                                if let Ok(link_meta) = entry.metadata() {
                                    tree.insert(
                                        relative.clone(),
                                        FileEntry {
                                            path: relative,
                                            size: link_meta.len(),
                                            mod_time: link_meta.modified().unwrap_or(UNIX_EPOCH),
                                            is_dir: false,
                                            checksum: None,
                                            mode: None,
                                        },
                                    );
                                    stats.record_checked();
                                }
                            }
                        }
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        stats.add_error(format!("读取 {} 元数据失败: {}", path.display(), e));
                        continue;
                    }
                }
            };

            let is_dir = metadata.is_dir();
            let mut file = FileEntry {
                path: relative.clone(),
                size: if is_dir { 0 } else { metadata.len() },
                mod_time: metadata.modified().unwrap_or(UNIX_EPOCH),
                is_dir,
                checksum: None,
                mode: mode_of(&metadata),
            };

            if is_dir {
                dir_count += 1;
            } else if self.config.compute_checksums {
                // 读取失败时保留条目但不带摘要，比较阶段会回退并记录
                match calculate_hash(path) {
                    Ok(hash) => file.checksum = Some(hash),
                    Err(e) => {
                        stats.add_error(format!("计算 {} 的校验和失败: {}", path.display(), e))
                    }
                }
            }

            tree.insert(relative, file);
            stats.record_checked();
        }

        info!(
            "扫描完成: {} 个条目 ({} 个目录) - {}",
            tree.len(),
            dir_count,
            root.display()
        );

        Ok(tree)
    }

    /// 由归档条目列表构建快照
    pub fn from_archive_entries(&self, entries: Vec<ArchiveEntryInfo>, stats: &RunStats) -> PathMap {
        let mut tree = PathMap::new();
        for info in entries {
            if info.path.is_empty() {
                continue;
            }
            if !self.config.recursive && info.path.contains('/') {
                continue;
            }
            stats.record_checked();
            tree.insert(
                info.path.clone(),
                FileEntry {
                    path: info.path,
                    size: info.size,
                    mod_time: info.mod_time,
                    is_dir: info.is_dir,
                    checksum: None,
                    mode: info.mode,
                },
            );
        }
        tree
    }
}
