#![allow(dead_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use treesync_lib::storage::{signature_path, CryptoError, CryptoService};

/// 不依赖 gpg 的加密服务：按位异或 + blake3 签名
#[derive(Debug, Default)]
pub struct FakeCrypto {
    pub encrypted: AtomicUsize,
    pub decrypted: AtomicUsize,
    pub verified: AtomicUsize,
}

const MASK: u8 = 0x5a;
const HEADER: &[u8] = b"FAKEGPG:";

impl FakeCrypto {
    fn signature_for(file: &Path, key_id: &str) -> io::Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key_id.as_bytes());
        hasher.update(&fs::read(file)?);
        Ok(hasher.finalize().to_hex().to_string())
    }
}

impl CryptoService for FakeCrypto {
    fn encrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
        recipient: &str,
    ) -> Result<(), CryptoError> {
        if recipient.is_empty() {
            return Err(CryptoError::MissingKeyId("加密"));
        }
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        output.write_all(HEADER)?;
        output.write_all(&data.iter().map(|b| b ^ MASK).collect::<Vec<_>>())?;
        self.encrypted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
    ) -> Result<(), CryptoError> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        let Some(body) = data.strip_prefix(HEADER) else {
            return Err(CryptoError::Failed {
                operation: "解密",
                message: "不是加密数据".into(),
            });
        };
        output.write_all(&body.iter().map(|b| b ^ MASK).collect::<Vec<_>>())?;
        self.decrypted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detached_sign(&self, file: &Path, key_id: &str) -> Result<PathBuf, CryptoError> {
        let sig = signature_path(file);
        fs::write(&sig, format!("{}\n{}", key_id, Self::signature_for(file, key_id)?))?;
        Ok(sig)
    }

    fn verify(&self, file: &Path, signature: &Path) -> Result<(), CryptoError> {
        let content = fs::read_to_string(signature)?;
        let (key_id, digest) = content
            .split_once('\n')
            .ok_or_else(|| CryptoError::BadSignature("格式错误".into()))?;
        if Self::signature_for(file, key_id)? != digest {
            return Err(CryptoError::BadSignature("摘要不匹配".into()));
        }
        self.verified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

pub fn set_mtime(path: &Path, secs_ago: u64) {
    let when = SystemTime::now() - Duration::from_secs(secs_ago);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(when)).unwrap();
}

/// 相对路径 -> 内容（目录为 None），用于比较两棵树
pub fn tree_contents(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            out.push((rel, None));
        } else {
            out.push((rel, Some(fs::read(entry.path()).unwrap())));
        }
    }
    out
}
