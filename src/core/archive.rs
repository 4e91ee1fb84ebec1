//! 归档端点调度
//!
//! 任一端是归档时，先把归档还原成临时目录，再复用目录同步流程；
//! 压缩、加密和签名只是包在 [`ArchiveCodec`] 字节流外面的几层。

use crate::core::comparator::CompareMethod;
use crate::core::engine::SyncEngine;
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::core::stats::RunStats;
use crate::error::{Result, SyncError};
use crate::storage::{
    signature_path, ArchiveCodec, ArchiveEntryInfo, ArchiveError, ArchiveOptions, ArchiveSettings,
    CodecSummary, CryptoError, CryptoService, Endpoint, GpgCli, PathMap,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

/// 归档的打包 / 解包流水线（阻塞操作）
#[derive(Clone)]
pub struct ArchiveDispatcher {
    codec: Arc<dyn ArchiveCodec>,
    crypto: Option<Arc<dyn CryptoService>>,
    settings: ArchiveSettings,
}

impl ArchiveDispatcher {
    pub fn new(
        codec: Arc<dyn ArchiveCodec>,
        crypto: Option<Arc<dyn CryptoService>>,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            codec,
            crypto,
            settings,
        }
    }

    pub fn options_for(&self, archive: &Path) -> ArchiveOptions {
        ArchiveOptions::resolve(archive, &self.settings)
    }

    fn crypto_for(
        &self,
        options: &ArchiveOptions,
    ) -> std::result::Result<Arc<dyn CryptoService>, CryptoError> {
        match &self.crypto {
            Some(crypto) => Ok(crypto.clone()),
            None => Ok(Arc::new(GpgCli::new(
                options.keyring.clone(),
                options.key_id.clone(),
            )?)),
        }
    }

    /// 把目录打包成归档，按选项压缩、加密并签名
    ///
    /// 内容先写入同目录的临时文件，全部成功后才替换目标路径。
    pub fn create_archive(&self, dir: &Path, archive: &Path) -> Result<CodecSummary> {
        let options = self.options_for(archive);
        let crypto = if options.encrypt || options.sign {
            if options.key_id.is_none() {
                let operation = if options.encrypt { "加密" } else { "签名" };
                return Err(CryptoError::MissingKeyId(operation).into());
            }
            Some(self.crypto_for(&options)?)
        } else {
            None
        };

        let parent = match archive.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| ArchiveError::io(format!("创建归档目录 {}", parent.display()), e))?;

        let mut staged = NamedTempFile::new_in(&parent)
            .map_err(|e| ArchiveError::io("创建临时归档", e))?;
        let summary = {
            let mut writer = BufWriter::new(staged.as_file_mut());
            let summary = if options.compression {
                let mut encoder = GzEncoder::new(&mut writer, Compression::default());
                let summary = self.codec.create_from_directory(dir, &mut encoder)?;
                encoder
                    .finish()
                    .map_err(|e| ArchiveError::io("完成 gzip 压缩", e))?;
                summary
            } else {
                self.codec.create_from_directory(dir, &mut writer)?
            };
            writer
                .flush()
                .map_err(|e| ArchiveError::io("写入临时归档", e))?;
            summary
        };

        let finished = match (&crypto, options.encrypt) {
            (Some(crypto), true) => {
                let recipient = options.key_id.as_deref().unwrap_or_default();
                let plain = staged.as_file_mut();
                plain
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| ArchiveError::io("回读临时归档", e))?;

                let mut sealed = NamedTempFile::new_in(&parent)
                    .map_err(|e| ArchiveError::io("创建临时加密文件", e))?;
                {
                    let mut input = BufReader::new(plain);
                    let mut output = BufWriter::new(sealed.as_file_mut());
                    crypto.encrypt(&mut input, &mut output, recipient)?;
                    output.flush().map_err(|e| ArchiveError::io("写入加密归档", e))?;
                }
                debug!("已加密归档内容: {}", archive.display());
                sealed
            }
            _ => staged,
        };

        finished
            .persist(archive)
            .map_err(|e| ArchiveError::io(format!("写入归档 {}", archive.display()), e.error))?;
        info!(
            "已创建归档 {}: {} 个文件, {} 个目录",
            archive.display(),
            summary.files,
            summary.dirs
        );

        let signature = signature_path(archive);
        match (&crypto, options.sign) {
            (Some(crypto), true) => {
                let key_id = options.key_id.as_deref().unwrap_or_default();
                let sig = crypto.detached_sign(archive, key_id)?;
                info!("已生成签名: {}", sig.display());
            }
            _ => {
                // 未签名的归档不保留旧签名
                if signature.exists() {
                    warn!("移除过期的签名文件: {}", signature.display());
                    fs::remove_file(&signature).map_err(|e| {
                        ArchiveError::io(format!("删除签名 {}", signature.display()), e)
                    })?;
                }
            }
        }

        Ok(summary)
    }

    /// 打开归档并返回解压、解密后的 tar 字节流
    ///
    /// 存在 `<archive>.sig` 时先校验签名，失败即终止。
    fn open_archive(&self, archive: &Path) -> Result<Box<dyn Read + Send>> {
        let options = self.options_for(archive);
        let file = File::open(archive)
            .map_err(|e| ArchiveError::io(format!("打开归档 {}", archive.display()), e))?;

        let signature = signature_path(archive);
        let needs_crypto = options.encrypt || signature.exists();
        let crypto = if needs_crypto {
            Some(self.crypto_for(&options)?)
        } else {
            None
        };

        if let Some(crypto) = crypto.as_ref().filter(|_| signature.exists()) {
            crypto
                .verify(archive, &signature)
                .map_err(|source| SyncError::SignatureInvalid {
                    path: archive.to_path_buf(),
                    source,
                })?;
            info!("签名校验通过: {}", archive.display());
        }

        let plain: Box<dyn Read + Send> = match crypto.as_ref().filter(|_| options.encrypt) {
            Some(crypto) => {
                let mut decrypted =
                    tempfile::tempfile().map_err(|e| ArchiveError::io("创建临时解密文件", e))?;
                {
                    let mut input = BufReader::new(file);
                    let mut output = BufWriter::new(&mut decrypted);
                    crypto.decrypt(&mut input, &mut output)?;
                    output.flush().map_err(|e| ArchiveError::io("写入解密内容", e))?;
                }
                decrypted
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| ArchiveError::io("回读解密内容", e))?;
                debug!("已解密归档: {}", archive.display());
                Box::new(BufReader::new(decrypted))
            }
            None => Box::new(BufReader::new(file)),
        };

        let reader: Box<dyn Read + Send> = if options.compression {
            Box::new(GzDecoder::new(plain))
        } else {
            plain
        };
        Ok(reader)
    }

    /// 解包到目录
    pub fn extract_archive(&self, archive: &Path, dir: &Path) -> Result<CodecSummary> {
        let mut input = self.open_archive(archive)?;
        let summary = self.codec.extract_to(&mut input, dir)?;
        info!(
            "已解包 {} -> {}: {} 个文件, {} 个目录",
            archive.display(),
            dir.display(),
            summary.files,
            summary.dirs
        );
        Ok(summary)
    }

    /// 列出归档条目
    pub fn list_archive(&self, archive: &Path) -> Result<Vec<ArchiveEntryInfo>> {
        let mut input = self.open_archive(archive)?;
        Ok(self.codec.list_entries(&mut input)?)
    }
}

impl SyncEngine {
    pub fn archive_dispatcher(&self) -> ArchiveDispatcher {
        ArchiveDispatcher::new(
            self.codec.clone(),
            self.crypto.clone(),
            self.config.archive.clone(),
        )
    }

    /// 按两端类型分派
    pub async fn dispatch(
        &self,
        source: &Endpoint,
        dest: &Endpoint,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        match (source, dest) {
            (Endpoint::Directory(src), Endpoint::Directory(dst)) => {
                self.sync_directories(src, dst, stats).await
            }
            (Endpoint::Directory(dir), Endpoint::Archive(archive)) => {
                self.directory_to_archive(dir, archive, stats).await
            }
            (Endpoint::Archive(archive), Endpoint::Directory(dir)) => {
                self.archive_to_directory(archive, dir, stats).await
            }
            (Endpoint::Archive(src), Endpoint::Archive(dst)) => {
                self.archive_to_archive(src, dst, stats).await
            }
        }
    }

    async fn directory_to_archive(
        &self,
        dir: &Path,
        archive: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        check_source_dir(dir).await?;
        if let Ok(meta) = tokio::fs::metadata(archive).await {
            if !meta.is_file() {
                return Err(SyncError::DestinationNotArchive(archive.to_path_buf()));
            }
        }

        if self.config.dry_run {
            // 打包总是包含整棵树
            let scanner = FileScanner::new(ScanConfig {
                recursive: true,
                compute_checksums: false,
                broken_links: self.config.broken_links,
            });
            let root = dir.to_path_buf();
            let scan_stats = stats.clone();
            let tree = tokio::task::spawn_blocking(move || scanner.scan(&root, &scan_stats))
                .await?
                .map_err(|e| SyncError::SourceUnreadable {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
            for entry in tree.values() {
                if entry.is_dir {
                    stats.record_dir_to_create();
                } else {
                    stats.record_to_copy(entry.size);
                }
            }
            info!("将创建归档: {} -> {}", dir.display(), archive.display());
            return Ok(());
        }

        let dispatcher = self.archive_dispatcher();
        let (root, target) = (dir.to_path_buf(), archive.to_path_buf());
        let summary =
            tokio::task::spawn_blocking(move || dispatcher.create_archive(&root, &target)).await??;
        record_summary(stats, &summary);
        Ok(())
    }

    async fn archive_to_directory(
        &self,
        archive: &Path,
        dir: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        check_source_archive(archive).await?;

        if self.config.dry_run {
            return self.preview_archive_to_directory(archive, dir, stats).await;
        }

        let workspace = workspace()?;
        let staging = workspace.path().join("source");
        self.extract_into(archive, &staging).await?;
        let result = self.sync_directories(&staging, dir, stats).await;
        discard(workspace);
        result
    }

    /// 只列出归档条目，不落盘解包
    async fn preview_archive_to_directory(
        &self,
        archive: &Path,
        dir: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        let dispatcher = self.archive_dispatcher();
        let target = archive.to_path_buf();
        let entries =
            tokio::task::spawn_blocking(move || dispatcher.list_archive(&target)).await??;

        let mut scan_config = self.config.scan_config();
        let mut method = self.config.compare_method();
        if method == CompareMethod::Checksum {
            // 归档条目没有摘要
            info!("归档预览不计算校验和，按 mtime 比较");
            method = CompareMethod::Mtime;
            scan_config.compute_checksums = false;
        }
        let scanner = FileScanner::new(scan_config);
        let source_map = scanner.from_archive_entries(entries, stats);

        let dest_map = match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {
                let root = dir.to_path_buf();
                let scan_stats = stats.clone();
                tokio::task::spawn_blocking(move || scanner.scan(&root, &scan_stats))
                    .await?
                    .map_err(|e| SyncError::DestinationUnreadable {
                        path: dir.to_path_buf(),
                        source: e,
                    })?
            }
            Ok(_) => return Err(SyncError::DestinationNotDirectory(dir.to_path_buf())),
            Err(_) => PathMap::new(),
        };

        self.execute_plan(archive, dir, source_map, dest_map, method, stats)
            .await
    }

    /// 两端都解包到临时目录，目录同步后重新打包目标
    ///
    /// 临时目录在所有返回路径上都会被删除。
    async fn archive_to_archive(
        &self,
        source: &Path,
        dest: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        check_source_archive(source).await?;

        let workspace = workspace()?;
        let result = self
            .archive_to_archive_in(source, dest, workspace.path(), stats)
            .await;
        discard(workspace);
        result
    }

    async fn archive_to_archive_in(
        &self,
        source: &Path,
        dest: &Path,
        workspace: &Path,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        let source_dir = workspace.join("source");
        let dest_dir = workspace.join("dest");

        self.extract_into(source, &source_dir).await?;
        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.is_file() => {
                self.extract_into(dest, &dest_dir).await?;
            }
            Ok(_) => return Err(SyncError::DestinationNotArchive(dest.to_path_buf())),
            Err(_) => {
                debug!("目标归档不存在，从空目录开始: {}", dest.display());
                tokio::fs::create_dir_all(&dest_dir).await?;
            }
        }

        self.sync_directories(&source_dir, &dest_dir, stats).await?;

        if self.config.dry_run {
            info!("dry-run: 跳过重新打包 {}", dest.display());
            return Ok(());
        }

        let dispatcher = self.archive_dispatcher();
        let (root, target) = (dest_dir.clone(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || dispatcher.create_archive(&root, &target)).await??;
        Ok(())
    }

    async fn extract_into(&self, archive: &Path, dir: &Path) -> Result<CodecSummary> {
        let dispatcher = self.archive_dispatcher();
        let (source, target) = (archive.to_path_buf(), dir.to_path_buf());
        tokio::task::spawn_blocking(move || dispatcher.extract_archive(&source, &target)).await?
    }
}

async fn check_source_dir(dir: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(dir)
        .await
        .map_err(|e| SyncError::SourceUnreadable {
            path: dir.to_path_buf(),
            source: e,
        })?;
    if !meta.is_dir() {
        return Err(SyncError::SourceNotDirectory(dir.to_path_buf()));
    }
    Ok(())
}

async fn check_source_archive(archive: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(archive)
        .await
        .map_err(|e| SyncError::SourceUnreadable {
            path: archive.to_path_buf(),
            source: e,
        })?;
    if !meta.is_file() {
        return Err(SyncError::SourceUnreadable {
            path: archive.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "归档路径不是普通文件"),
        });
    }
    Ok(())
}

fn record_summary(stats: &RunStats, summary: &CodecSummary) {
    for entry in &summary.entries {
        stats.record_checked();
        if entry.is_dir {
            stats.record_dir_created();
        } else {
            stats.record_copied(entry.size);
        }
    }
}

fn workspace() -> Result<TempDir> {
    Ok(tempfile::Builder::new()
        .prefix("treesync-")
        .tempdir()
        .map_err(|e| ArchiveError::io("创建临时工作目录", e))?)
}

fn discard(workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.close() {
        warn!("清理临时目录 {} 失败: {}", path.display(), e);
    }
}
