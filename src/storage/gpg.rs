//! 加密 / 签名服务
//!
//! 核心只依赖 [`CryptoService`] 的四个操作；默认实现 [`GpgCli`] 通过子进程调用 `gpg`。
//! 任何满足该接口的实现（本地库、远程服务等）都可以替换，归档调度无需改动。

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("GPG 不可用: {0}")]
    Unavailable(String),
    #[error("未找到密钥 {0}")]
    KeyNotFound(String),
    #[error("{0} 需要指定密钥 ID")]
    MissingKeyId(&'static str),
    #[error("GPG {operation} 失败: {message}")]
    Failed {
        operation: &'static str,
        message: String,
    },
    #[error("签名验证失败: {0}")]
    BadSignature(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 外部加密 / 签名能力
pub trait CryptoService: Send + Sync {
    /// 为 `recipient` 加密字节流
    fn encrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
        recipient: &str,
    ) -> Result<(), CryptoError>;

    /// 解密字节流
    fn decrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
    ) -> Result<(), CryptoError>;

    /// 生成分离签名，返回签名文件路径
    fn detached_sign(&self, file: &Path, key_id: &str) -> Result<PathBuf, CryptoError>;

    /// 校验分离签名
    fn verify(&self, file: &Path, signature: &Path) -> Result<(), CryptoError>;
}

/// 归档对应的分离签名路径：`<archive>.sig`
pub fn signature_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

/// 基于 `gpg` 命令行的实现
#[derive(Debug, Clone, Default)]
pub struct GpgCli {
    key_id: Option<String>,
    keyring: Option<PathBuf>,
}

impl GpgCli {
    /// 创建并确认 gpg 可用；指定了密钥时确认密钥存在
    pub fn new(keyring: Option<PathBuf>, key_id: Option<String>) -> Result<Self, CryptoError> {
        let handler = Self { key_id, keyring };

        let status = Command::new("gpg")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| CryptoError::Unavailable(e.to_string()))?;
        if !status.success() {
            return Err(CryptoError::Unavailable(format!("gpg --version 退出码 {}", status)));
        }

        if let Some(key) = &handler.key_id {
            let status = handler
                .command()
                .args(["--list-keys", key])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            if !status.success() {
                return Err(CryptoError::KeyNotFound(key.clone()));
            }
        }

        Ok(handler)
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("gpg");
        if let Some(keyring) = &self.keyring {
            cmd.arg("--keyring").arg(keyring);
        }
        cmd
    }

    /// 让字节流穿过一个 gpg 子进程
    fn pipe_through(
        &self,
        operation: &'static str,
        args: &[&str],
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
    ) -> Result<(), CryptoError> {
        let mut cmd = self.command();
        cmd.args(args);
        run_piped(cmd, operation, input, output)?;
        debug!("gpg {} 完成", operation);
        Ok(())
    }
}

/// 运行子进程：`input` 写入 stdin，stdout 写入 `output`
///
/// stdin、stdout、stderr 三条管道同时处理，任何一条写满都不会卡住子进程。
fn run_piped(
    mut cmd: Command,
    operation: &'static str,
    input: &mut (dyn Read + Send),
    output: &mut (dyn Write + Send),
) -> Result<(), CryptoError> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CryptoError::Unavailable(e.to_string()))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("子进程 stdin 不可用"))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("子进程 stdout 不可用"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("子进程 stderr 不可用"))?;

    let (fed, drained, errors) = std::thread::scope(|s| {
        let feeder = s.spawn(move || {
            let result = io::copy(input, &mut stdin);
            drop(stdin);
            result
        });
        let collector = s.spawn(move || {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).map(|_| buf)
        });
        let drained = io::copy(&mut stdout, output);
        let fed = feeder
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("输入线程异常退出")));
        let errors = collector
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stderr 线程异常退出")));
        (fed, drained, errors)
    });

    let status = child.wait()?;
    if !status.success() {
        let stderr = errors.unwrap_or_default();
        return Err(CryptoError::Failed {
            operation,
            message: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    fed?;
    drained?;
    Ok(())
}

impl CryptoService for GpgCli {
    fn encrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
        recipient: &str,
    ) -> Result<(), CryptoError> {
        if recipient.is_empty() {
            return Err(CryptoError::MissingKeyId("加密"));
        }
        self.pipe_through(
            "加密",
            &[
                "--cipher-algo",
                "AES256",
                "--compress-algo",
                "2",
                "--digest-algo",
                "SHA256",
                "--encrypt",
                "--armor",
                "--recipient",
                recipient,
            ],
            input,
            output,
        )
    }

    fn decrypt(
        &self,
        input: &mut (dyn Read + Send),
        output: &mut (dyn Write + Send),
    ) -> Result<(), CryptoError> {
        self.pipe_through("解密", &["--decrypt", "--quiet"], input, output)
    }

    fn detached_sign(&self, file: &Path, key_id: &str) -> Result<PathBuf, CryptoError> {
        if key_id.is_empty() {
            return Err(CryptoError::MissingKeyId("签名"));
        }
        let sig = signature_path(file);
        let result = self
            .command()
            .args(["--batch", "--yes", "--detach-sign", "--armor", "--output"])
            .arg(&sig)
            .args(["--local-user", key_id])
            .arg(file)
            .output()?;
        if !result.status.success() {
            return Err(CryptoError::Failed {
                operation: "签名",
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(sig)
    }

    fn verify(&self, file: &Path, signature: &Path) -> Result<(), CryptoError> {
        let result = self
            .command()
            .arg("--verify")
            .arg(signature)
            .arg(file)
            .output()?;
        if !result.status.success() {
            return Err(CryptoError::BadSignature(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
