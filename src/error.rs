use crate::storage::{ArchiveError, CryptoError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 使整次同步失去意义的致命错误
///
/// 单个文件的问题不走这里，而是记入 [`RunStats`](crate::core::RunStats)。
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("无法读取源目录 {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("源路径不是目录: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("无法读取目标目录 {path}: {source}")]
    DestinationUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("无法创建目标目录 {path}: {source}")]
    DestinationUncreatable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("目标路径不是目录: {0}")]
    DestinationNotDirectory(PathBuf),

    #[error("目标路径不是归档文件: {0}")]
    DestinationNotArchive(PathBuf),

    #[error("归档操作失败: {0}")]
    Archive(#[from] ArchiveError),

    #[error("归档签名无效 {path}: {source}")]
    SignatureInvalid {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("后台任务异常退出: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
