//! 归档编解码（tar 容器）
//!
//! 只负责"目录 -> tar 字节流"与"tar 字节流 -> 目录"，压缩和加密由调度层包装。

use super::local::{mode_of, set_mode, set_times};
use super::{join_relative, normalize_path};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tar::{Archive, Builder, EntryType, Header};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 支持的归档后缀（小写比较）
const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar",
    ".tar.gz",
    ".tgz",
    ".tar.gpg",
    ".tar.gz.gpg",
    ".tgz.gpg",
];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("读取归档目录 {path} 失败: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ArchiveError::Io {
            context: context.into(),
            source,
        }
    }
}

/// 用户显式给出的归档配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSettings {
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub sign: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<PathBuf>,
}

/// 某个归档路径最终生效的选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub compression: bool,
    pub encrypt: bool,
    pub sign: bool,
    pub key_id: Option<String>,
    pub keyring: Option<PathBuf>,
}

impl ArchiveOptions {
    /// 仅根据文件后缀推断压缩和加密
    pub fn from_extension(path: &Path) -> Self {
        let name = lowercase_file_name(path);
        let stem = name.strip_suffix(".gpg").unwrap_or(&name);
        Self {
            compression: stem.ends_with(".tar.gz") || stem.ends_with(".tgz"),
            encrypt: name.ends_with(".gpg"),
            ..Default::default()
        }
    }

    /// 合并后缀推断与显式配置：显式配置只能增加压缩/加密，不能去掉
    pub fn resolve(path: &Path, settings: &ArchiveSettings) -> Self {
        let implied = Self::from_extension(path);
        Self {
            compression: implied.compression || settings.compress,
            encrypt: implied.encrypt || settings.encrypt,
            sign: settings.sign,
            key_id: settings.key_id.clone(),
            keyring: settings.keyring.clone(),
        }
    }

    /// 与当前选项对应的规范后缀
    pub fn file_extension(&self) -> String {
        let mut ext = String::from(".tar");
        if self.compression {
            ext.push_str(".gz");
        }
        if self.encrypt {
            ext.push_str(".gpg");
        }
        ext
    }
}

/// 根据文件名判断路径是否为归档
pub fn is_archive_path(path: &Path) -> bool {
    let name = lowercase_file_name(path);
    ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn lowercase_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// 归档中的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntryInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: SystemTime,
    pub is_dir: bool,
    pub mode: Option<u32>,
}

/// 一次打包/解包处理的条目统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecSummary {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    /// 实际写入 / 解出的条目
    pub entries: Vec<ArchiveEntryInfo>,
}

impl CodecSummary {
    fn push(&mut self, info: ArchiveEntryInfo) {
        if info.is_dir {
            self.dirs += 1;
        } else {
            self.files += 1;
            self.bytes += info.size;
        }
        self.entries.push(info);
    }
}

/// 归档容器编解码接口
pub trait ArchiveCodec: Send + Sync {
    /// 把目录树写成归档字节流
    fn create_from_directory(
        &self,
        dir: &Path,
        output: &mut dyn Write,
    ) -> Result<CodecSummary, ArchiveError>;

    /// 把归档字节流解包到目录
    fn extract_to(&self, input: &mut dyn Read, dir: &Path) -> Result<CodecSummary, ArchiveError>;

    /// 列出归档中的条目
    fn list_entries(&self, input: &mut dyn Read) -> Result<Vec<ArchiveEntryInfo>, ArchiveError>;
}

/// 标准 tar 格式实现
#[derive(Debug, Clone, Copy, Default)]
pub struct TarCodec;

impl TarCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveCodec for TarCodec {
    fn create_from_directory(
        &self,
        dir: &Path,
        output: &mut dyn Write,
    ) -> Result<CodecSummary, ArchiveError> {
        let mut builder = Builder::new(output);
        let mut summary = CodecSummary::default();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| ArchiveError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let relative = match path.strip_prefix(dir) {
                Ok(rel) => normalize_path(&rel.to_string_lossy()),
                Err(_) => continue,
            };

            // 符号链接按目标内容打包
            let metadata = if entry.path_is_symlink() {
                match fs::metadata(path) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("跳过无法访问的符号链接 {}: {}", path.display(), e);
                        continue;
                    }
                }
            } else {
                entry
                    .metadata()
                    .map_err(|source| ArchiveError::Walk {
                        path: path.to_path_buf(),
                        source,
                    })?
            };

            // tar 头只保存整秒
            let mtime = from_unix_seconds(unix_seconds(metadata.modified().unwrap_or(UNIX_EPOCH)));
            let mode = mode_of(&metadata).unwrap_or(if metadata.is_dir() { 0o755 } else { 0o644 });
            let mut header = Header::new_gnu();
            header.set_mtime(unix_seconds(mtime));
            header.set_mode(mode);

            if metadata.is_dir() {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder
                    .append_data(&mut header, &relative, io::empty())
                    .map_err(|e| ArchiveError::io(format!("写入目录条目 {}", relative), e))?;
                summary.push(ArchiveEntryInfo {
                    path: relative.clone(),
                    size: 0,
                    mod_time: mtime,
                    is_dir: true,
                    mode: Some(mode),
                });
            } else if metadata.is_file() {
                let file = File::open(path)
                    .map_err(|e| ArchiveError::io(format!("打开文件 {}", path.display()), e))?;
                header.set_entry_type(EntryType::Regular);
                header.set_size(metadata.len());
                builder
                    .append_data(&mut header, &relative, file)
                    .map_err(|e| ArchiveError::io(format!("写入文件条目 {}", relative), e))?;
                summary.push(ArchiveEntryInfo {
                    path: relative.clone(),
                    size: metadata.len(),
                    mod_time: mtime,
                    is_dir: false,
                    mode: Some(mode),
                });
            } else {
                warn!("跳过不支持的文件类型: {}", path.display());
                continue;
            }

            debug!("打包: {}", relative);
        }

        builder
            .finish()
            .map_err(|e| ArchiveError::io("完成归档写入", e))?;
        Ok(summary)
    }

    fn extract_to(&self, input: &mut dyn Read, dir: &Path) -> Result<CodecSummary, ArchiveError> {
        let mut archive = Archive::new(input);
        let mut summary = CodecSummary::default();

        fs::create_dir_all(dir)
            .map_err(|e| ArchiveError::io(format!("创建解包目录 {}", dir.display()), e))?;

        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::io("读取归档条目", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| ArchiveError::io("读取归档条目", e))?;
            let name = entry
                .path()
                .map_err(|e| ArchiveError::io("解析条目路径", e))?
                .into_owned();

            let Some(relative) = entry_path(&name) else {
                warn!("跳过不安全的条目路径: {}", name.display());
                continue;
            };
            let target = join_relative(dir, &relative);

            let header = entry.header();
            let entry_type = header.entry_type();
            let mode = header.mode().ok();
            let mtime = header.mtime().ok().map(from_unix_seconds);

            match entry_type {
                EntryType::Directory => {
                    fs::create_dir_all(&target).map_err(|e| {
                        ArchiveError::io(format!("创建目录 {}", target.display()), e)
                    })?;
                    summary.push(ArchiveEntryInfo {
                        path: relative,
                        size: 0,
                        mod_time: mtime.unwrap_or(UNIX_EPOCH),
                        is_dir: true,
                        mode,
                    });
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(|e| {
                            ArchiveError::io(format!("创建父目录 {}", parent.display()), e)
                        })?;
                    }
                    let mut out = File::create(&target).map_err(|e| {
                        ArchiveError::io(format!("创建文件 {}", target.display()), e)
                    })?;
                    let bytes = io::copy(&mut entry, &mut out).map_err(|e| {
                        ArchiveError::io(format!("解包文件 {}", target.display()), e)
                    })?;
                    drop(out);

                    if let Some(mode) = mode {
                        if let Err(e) = set_mode(&target, mode) {
                            warn!("恢复权限失败 {}: {}", target.display(), e);
                        }
                    }
                    if let Some(mtime) = mtime {
                        if let Err(e) = set_times(&target, mtime) {
                            warn!("恢复时间戳失败 {}: {}", target.display(), e);
                        }
                    }
                    summary.push(ArchiveEntryInfo {
                        path: relative,
                        size: bytes,
                        mod_time: mtime.unwrap_or(UNIX_EPOCH),
                        is_dir: false,
                        mode,
                    });
                }
                other => {
                    warn!("跳过不支持的条目类型 {:?}: {}", other, name.display());
                    continue;
                }
            }

            debug!("解包: {}", name.display());
        }

        Ok(summary)
    }

    fn list_entries(&self, input: &mut dyn Read) -> Result<Vec<ArchiveEntryInfo>, ArchiveError> {
        let mut archive = Archive::new(input);
        let mut files = Vec::new();

        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::io("读取归档条目", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::io("读取归档条目", e))?;
            let header = entry.header();
            let is_dir = match header.entry_type() {
                EntryType::Directory => true,
                EntryType::Regular | EntryType::Continuous => false,
                _ => continue,
            };
            let name = entry
                .path()
                .map_err(|e| ArchiveError::io("解析条目路径", e))?;
            // 与解包时跳过的条目保持一致
            let Some(path) = entry_path(&name) else {
                debug!("列表中忽略条目: {}", name.display());
                continue;
            };

            files.push(ArchiveEntryInfo {
                path,
                size: if is_dir { 0 } else { header.size().unwrap_or(0) },
                mod_time: header.mtime().map(from_unix_seconds).unwrap_or(UNIX_EPOCH),
                is_dir,
                mode: header.mode().ok(),
            });
        }

        Ok(files)
    }
}

/// 归档条目名对应的相对路径（`/` 分隔，去掉 `./`）
///
/// 绝对路径、含 `..` 的路径以及归档根目录本身返回 None。
fn entry_path(name: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

fn from_unix_seconds(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_archive_path() {
        for name in [
            "a.tar",
            "a.tar.gz",
            "a.tgz",
            "a.tar.gpg",
            "a.tar.gz.gpg",
            "a.tgz.gpg",
            "A.TAR.GZ",
        ] {
            assert!(is_archive_path(Path::new(name)), "{}", name);
        }
        for name in ["a.gz", "a.zip", "tar", "a.gpg", "dir"] {
            assert!(!is_archive_path(Path::new(name)), "{}", name);
        }
    }

    #[test]
    fn test_options_from_extension() {
        let o = ArchiveOptions::from_extension(Path::new("x.tar"));
        assert!(!o.compression && !o.encrypt);
        let o = ArchiveOptions::from_extension(Path::new("x.tgz"));
        assert!(o.compression && !o.encrypt);
        let o = ArchiveOptions::from_extension(Path::new("x.tar.gz.gpg"));
        assert!(o.compression && o.encrypt);
        // 目录名里的 .gz 不影响判断
        let o = ArchiveOptions::from_extension(Path::new("/old.gz/x.tar"));
        assert!(!o.compression);
    }

    #[test]
    fn test_resolve_only_adds() {
        let settings = ArchiveSettings {
            compress: true,
            ..Default::default()
        };
        let o = ArchiveOptions::resolve(Path::new("x.tar"), &settings);
        assert!(o.compression);
        assert_eq!(o.file_extension(), ".tar.gz");

        // 显式配置为 false 时不会去掉后缀推断出的加密
        let o = ArchiveOptions::resolve(Path::new("x.tar.gpg"), &ArchiveSettings::default());
        assert!(o.encrypt);
    }

    #[test]
    fn test_entry_path() {
        assert_eq!(entry_path(Path::new("a/b")).as_deref(), Some("a/b"));
        assert_eq!(entry_path(Path::new("./a/")).as_deref(), Some("a"));
        assert!(entry_path(Path::new("../etc/passwd")).is_none());
        assert!(entry_path(Path::new("a/../../b")).is_none());
        assert!(entry_path(Path::new("/etc/passwd")).is_none());
        assert!(entry_path(Path::new(".")).is_none());
        assert!(entry_path(Path::new("./")).is_none());
    }

    /// 与 `tar -C dir -cf x.tar .` 相同的布局：带归档根目录条目
    fn dot_rooted_tar() -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let mtime = 1_600_000_000;

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(mtime);
        builder.append_data(&mut header, "./", io::empty()).unwrap();

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(5);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        builder.append_data(&mut header, "./a.txt", &b"alpha"[..]).unwrap();

        builder.into_inner().unwrap()
    }

    #[test]
    fn test_dot_rooted_archive_lists_like_it_extracts() {
        let bytes = dot_rooted_tar();
        let codec = TarCodec::new();

        let listed = codec.list_entries(&mut bytes.as_slice()).unwrap();
        let paths: Vec<_> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);

        let out = tempfile::tempdir().unwrap();
        let extracted = codec.extract_to(&mut bytes.as_slice(), out.path()).unwrap();
        assert_eq!(extracted.entries, listed);
    }

    #[test]
    fn test_create_list_extract() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("docs/empty")).unwrap();
        fs::write(src.path().join("docs/readme.txt"), b"hello tar").unwrap();
        fs::write(src.path().join("top.bin"), vec![7u8; 4096]).unwrap();
        let when = from_unix_seconds(1_500_000_000);
        set_times(&src.path().join("top.bin"), when).unwrap();

        let codec = TarCodec::new();
        let mut bytes = Vec::new();
        let summary = codec.create_from_directory(src.path(), &mut bytes).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.dirs, 2);
        assert_eq!(summary.bytes, 4096 + 9);

        let listed = codec.list_entries(&mut bytes.as_slice()).unwrap();
        let paths: Vec<_> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs", "docs/empty", "docs/readme.txt", "top.bin"]);
        let top = listed.iter().find(|e| e.path == "top.bin").unwrap();
        assert_eq!(top.size, 4096);
        assert_eq!(top.mod_time, when);

        let out = tempfile::tempdir().unwrap();
        let extracted = codec.extract_to(&mut bytes.as_slice(), out.path()).unwrap();
        assert_eq!(extracted.entries, summary.entries);
        assert!(out.path().join("docs/empty").is_dir());
        assert_eq!(
            fs::read(out.path().join("docs/readme.txt")).unwrap(),
            b"hello tar"
        );
        assert_eq!(
            fs::metadata(out.path().join("top.bin")).unwrap().modified().unwrap(),
            when
        );
    }
}
