use crate::storage::{FileEntry, PathMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 比较方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompareMethod {
    /// 修改时间（较新或大小不同即同步）
    #[default]
    Mtime,
    /// 内容摘要
    Checksum,
    /// 仅比较大小
    Size,
}

impl fmt::Display for CompareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMethod::Mtime => write!(f, "mtime"),
            CompareMethod::Checksum => write!(f, "checksum"),
            CompareMethod::Size => write!(f, "size"),
        }
    }
}

impl FromStr for CompareMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mtime" => Ok(CompareMethod::Mtime),
            "checksum" => Ok(CompareMethod::Checksum),
            "size" => Ok(CompareMethod::Size),
            other => Err(format!("未知的比较方法: {}", other)),
        }
    }
}

/// 源条目相对于目标的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// 目标中不存在
    Missing,
    /// 同一路径一边是文件、一边是目录
    TypeMismatch,
    /// 两边都是目录
    BothDirs,
    Equal,
    Different,
    /// checksum 模式下任一侧缺少摘要，按 mtime 规则判断
    ChecksumFallback { differs: bool },
}

impl FileRelation {
    pub fn needs_sync(self) -> bool {
        match self {
            FileRelation::Missing | FileRelation::TypeMismatch | FileRelation::Different => true,
            FileRelation::BothDirs | FileRelation::Equal => false,
            FileRelation::ChecksumFallback { differs } => differs,
        }
    }
}

/// 文件比较器（纯函数，无副作用）
#[derive(Debug, Clone, Copy, Default)]
pub struct FileComparator {
    method: CompareMethod,
}

impl FileComparator {
    pub fn new(method: CompareMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> CompareMethod {
        self.method
    }

    /// 判断源条目与目标快照的关系
    pub fn compare(&self, source: &FileEntry, dest: &PathMap) -> FileRelation {
        let Some(dest) = dest.get(&source.path) else {
            return FileRelation::Missing;
        };

        if source.is_dir != dest.is_dir {
            return FileRelation::TypeMismatch;
        }

        if source.is_dir {
            return FileRelation::BothDirs;
        }

        match self.method {
            CompareMethod::Size => Self::relation(source.size != dest.size),
            CompareMethod::Checksum => match (&source.checksum, &dest.checksum) {
                (Some(src_sum), Some(dst_sum)) => Self::relation(src_sum != dst_sum),
                _ => FileRelation::ChecksumFallback {
                    differs: Self::differs_by_mtime(source, dest),
                },
            },
            CompareMethod::Mtime => Self::relation(Self::differs_by_mtime(source, dest)),
        }
    }

    pub fn needs_sync(&self, source: &FileEntry, dest: &PathMap) -> bool {
        self.compare(source, dest).needs_sync()
    }

    /// 源文件更新，或大小不同（时钟漂移、截断的副本）
    fn differs_by_mtime(source: &FileEntry, dest: &FileEntry) -> bool {
        source.mod_time > dest.mod_time || source.size != dest.size
    }

    fn relation(differs: bool) -> FileRelation {
        if differs {
            FileRelation::Different
        } else {
            FileRelation::Equal
        }
    }
}
