use super::join_relative;
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// 本地目录树，所有路径相对于 `base_path`
#[derive(Debug, Clone)]
pub struct LocalTree {
    base_path: PathBuf,
}

impl LocalTree {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.base_path
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            join_relative(&self.base_path, path)
        }
    }

    /// 创建目录（幂等，可被多个 worker 重复调用）
    ///
    /// 目标位置若是普通文件，先删除再创建。
    pub fn create_dir(&self, path: &str) -> io::Result<()> {
        self.clear_file_ancestors(path)?;
        let full_path = self.resolve_path(path);
        if let Ok(meta) = fs::symlink_metadata(&full_path) {
            if !meta.is_dir() {
                remove_file_if_present(&full_path)?;
            }
        }
        fs::create_dir_all(&full_path)
    }

    /// 用源文件整体替换目标文件，返回写入的字节数
    ///
    /// 先写入同目录下的临时文件，再原子重命名。
    pub fn write_from(&self, path: &str, source: &Path) -> io::Result<u64> {
        let full_path = self.resolve_path(path);

        self.clear_file_ancestors(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // 目标位置是目录时，文件覆盖目录
        if let Ok(meta) = fs::symlink_metadata(&full_path) {
            if meta.is_dir() {
                fs::remove_dir_all(&full_path)?;
            }
        }

        let temp_path = temp_sibling(&full_path);
        let guard = scopeguard::guard(temp_path.clone(), |p| {
            let _ = fs::remove_file(p);
        });

        let mut reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let bytes = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, &full_path)?;
        scopeguard::ScopeGuard::into_inner(guard);

        Ok(bytes)
    }

    /// 祖先路径上残留的普通文件会挡住目录创建，先删掉
    fn clear_file_ancestors(&self, path: &str) -> io::Result<()> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = self.base_path.clone();
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            current.push(part);
            if let Ok(meta) = fs::symlink_metadata(&current) {
                if !meta.is_dir() {
                    remove_file_if_present(&current)?;
                }
            }
        }
        Ok(())
    }

    /// 删除文件或目录（目录递归删除）
    pub fn delete(&self, path: &str) -> io::Result<()> {
        let full_path = self.resolve_path(path);
        let meta = fs::symlink_metadata(&full_path)?;
        if meta.is_dir() {
            fs::remove_dir_all(&full_path)
        } else {
            fs::remove_file(&full_path)
        }
    }
}

/// 将访问时间和修改时间都设置为 `mtime`
pub fn set_times(path: &Path, mtime: SystemTime) -> io::Result<()> {
    let time = FileTime::from_system_time(mtime);
    filetime::set_file_times(path, time, time)
}

/// 恢复 POSIX 权限位
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn mode_of(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode_of(_meta: &fs::Metadata) -> Option<u32> {
    None
}

/// 流式计算文件内容的 BLAKE3 摘要
pub fn calculate_hash(path: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// 多个 worker 可能同时清理同一个文件：已被删除或已被替换成目录都视为成功
fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            let now_dir = fs::symlink_metadata(path)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if now_dir {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}
