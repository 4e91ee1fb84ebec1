pub mod gpg;
pub mod local;
pub mod tar;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use gpg::{signature_path, CryptoError, CryptoService, GpgCli};
pub use local::LocalTree;
pub use self::tar::{
    is_archive_path, ArchiveCodec, ArchiveEntryInfo, ArchiveError, ArchiveOptions, ArchiveSettings,
    CodecSummary, TarCodec,
};

/// 文件信息（同步根目录下的一个文件或目录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// 相对于同步根目录的路径，统一使用 `/` 分隔
    pub path: String,
    /// 字节长度，目录为 0
    pub size: u64,
    pub mod_time: SystemTime,
    pub is_dir: bool,
    /// 内容摘要，仅在需要校验时计算；目录永远没有
    pub checksum: Option<String>,
    /// POSIX 权限位（不可用时为 None）
    #[serde(default)]
    pub mode: Option<u32>,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, size: u64, mod_time: SystemTime) -> Self {
        Self {
            path: path.into(),
            size,
            mod_time,
            is_dir: false,
            checksum: None,
            mode: None,
        }
    }

    pub fn dir(path: impl Into<String>, mod_time: SystemTime) -> Self {
        Self {
            path: path.into(),
            size: 0,
            mod_time,
            is_dir: true,
            checksum: None,
            mode: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// 一次扫描得到的快照：相对路径 -> 文件信息
///
/// 扫描完成后不再修改，下一次运行重新构建。
pub type PathMap = BTreeMap<String, FileEntry>;

/// 同步端点：普通目录或打包归档，在调用入口处解析一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl Endpoint {
    pub fn detect(path: &Path) -> Self {
        if is_archive_path(path) {
            Endpoint::Archive(path.to_path_buf())
        } else {
            Endpoint::Directory(path.to_path_buf())
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Endpoint::Directory(p) | Endpoint::Archive(p) => p,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Endpoint::Archive(_))
    }
}

/// 规范化路径分隔符（统一使用 /）
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// 把规范化的相对路径拼接到根目录上
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_detect() {
        assert!(Endpoint::detect(Path::new("/backup/site.tar.gz")).is_archive());
        assert!(Endpoint::detect(Path::new("/backup/site.TGZ.gpg")).is_archive());
        assert!(!Endpoint::detect(Path::new("/backup/site")).is_archive());
        assert!(!Endpoint::detect(Path::new("/backup/notes.gz")).is_archive());
    }

    #[test]
    fn test_join_relative() {
        let root = Path::new("/data");
        assert_eq!(join_relative(root, "a/b/c.txt"), Path::new("/data/a/b/c.txt"));
        assert_eq!(join_relative(root, ""), Path::new("/data"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a\\b\\c"), "a/b/c");
    }
}
