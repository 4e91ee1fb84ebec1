use crate::core::stats::RunStats;
use crate::storage::{LocalTree, PathMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 删除目标中存在、源中不存在的条目
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionReconciler {
    dry_run: bool,
}

impl DeletionReconciler {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// 单遍清理
    ///
    /// 按路径倒序遍历，子条目总在父目录之前处理，因此删除目录时
    /// 其下的每个文件都已经单独计数。失败只记录，不中止。
    pub fn reconcile(&self, dest_root: &Path, source: &PathMap, dest: &PathMap, stats: &RunStats) {
        let tree = LocalTree::new(dest_root);
        let mut removed = 0usize;

        for (path, entry) in dest.iter().rev() {
            if source.contains_key(path) {
                continue;
            }

            if self.dry_run {
                if entry.is_dir {
                    debug!("将删除目录: {}", path);
                    stats.record_dir_to_delete();
                } else {
                    debug!("将删除: {} ({} 字节)", path, entry.size);
                    stats.record_to_delete(entry.size);
                }
                removed += 1;
                continue;
            }

            let full_path = tree.resolve_path(path);
            // 源中对应位置已变成其他类型时，执行阶段可能已经替换掉它
            let Ok(current) = fs::symlink_metadata(&full_path) else {
                continue;
            };
            let size = if current.is_dir() { 0 } else { current.len() };

            match tree.delete(path) {
                Ok(()) => {
                    if entry.is_dir {
                        debug!("已删除目录: {}", path);
                        stats.record_dir_deleted();
                    } else {
                        debug!("已删除: {}", path);
                        stats.record_deleted(size);
                    }
                    removed += 1;
                }
                Err(e) => stats.add_error(format!("删除 {} 失败: {}", full_path.display(), e)),
            }
        }

        if removed > 0 {
            info!("清理完成: {} 个多余条目", removed);
        }
    }
}
