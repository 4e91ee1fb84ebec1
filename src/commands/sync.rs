use crate::config::SyncDefaults;
use crate::core::{BrokenLinkPolicy, CompareMethod, SyncConfig, SyncEngine, SyncReport};
use crate::storage::ArchiveSettings;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// 命令行参数
#[derive(Debug, Clone, Parser)]
#[command(
    name = "treesync",
    version,
    about = "本地目录树与归档同步工具",
    after_help = "比较方法:\n  mtime    源文件更新或大小不同时同步（最快）\n  checksum 按内容摘要比较（最准确）\n  size     只比较大小"
)]
pub struct Cli {
    /// 源目录或归档
    #[arg(value_name = "SOURCE")]
    pub source_arg: Option<PathBuf>,

    /// 目标目录或归档
    #[arg(value_name = "DEST")]
    pub dest_arg: Option<PathBuf>,

    /// 源目录或归档（优先于位置参数）
    #[arg(short = 's', long = "source", value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// 目标目录或归档（优先于位置参数）
    #[arg(short = 'd', long = "dest", value_name = "PATH")]
    pub dest: Option<PathBuf>,

    /// 按内容摘要比较
    #[arg(short = 'c', long)]
    pub checksum: bool,

    /// 只预览，不做任何修改
    #[arg(short = 'n', long = "dry-run", visible_alias = "plan")]
    pub dry_run: bool,

    /// 先预览，确认后再执行
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// 输出详细日志和汇总
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// 递归同步子目录
    #[arg(short = 'r', long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub recursive: bool,

    /// 删除目标中源不存在的条目
    #[arg(long)]
    pub delete: bool,

    /// worker 线程数（默认取配置文件，否则为 4）
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// 比较方法
    #[arg(long, value_enum)]
    pub method: Option<CompareMethod>,

    /// 静默跳过失效的符号链接
    #[arg(long)]
    pub skip_broken_links: bool,

    /// 归档使用 gzip 压缩
    #[arg(long)]
    pub compress: bool,

    /// 归档使用 GPG 加密
    #[arg(long)]
    pub encrypt: bool,

    /// 为归档生成分离签名
    #[arg(long)]
    pub sign: bool,

    /// 加密收件人 / 签名密钥 ID
    #[arg(long, value_name = "ID")]
    pub key_id: Option<String>,

    /// GPG 密钥环路径
    #[arg(long, value_name = "PATH")]
    pub keyring: Option<PathBuf>,

    /// 把本次的线程数、比较方法和密钥设置保存为默认值
    #[arg(long)]
    pub save_defaults: bool,
}

impl Cli {
    /// 解析源和目标路径：`-s/-d` 优先，其次是位置参数
    pub fn endpoints(&self) -> Result<(PathBuf, PathBuf)> {
        let source = self.source.clone().or_else(|| self.source_arg.clone());
        let dest = self.dest.clone().or_else(|| self.dest_arg.clone());
        match (source, dest) {
            (Some(source), Some(dest)) => Ok((source, dest)),
            _ => anyhow::bail!("必须同时指定源路径和目标路径"),
        }
    }

    /// 命令行参数覆盖配置文件中的默认值
    pub fn to_config(&self, defaults: &SyncDefaults) -> SyncConfig {
        SyncConfig {
            method: self.method.unwrap_or(defaults.method),
            checksum: self.checksum,
            recursive: self.recursive,
            delete: self.delete,
            dry_run: self.dry_run,
            threads: self.threads.unwrap_or(defaults.threads).max(1),
            broken_links: if self.skip_broken_links {
                BrokenLinkPolicy::Skip
            } else {
                defaults.broken_links
            },
            verbose: self.verbose,
            archive: ArchiveSettings {
                compress: self.compress,
                encrypt: self.encrypt,
                sign: self.sign,
                key_id: self.key_id.clone().or_else(|| defaults.key_id.clone()),
                keyring: self.keyring.clone().or_else(|| defaults.keyring.clone()),
            },
        }
    }
}

/// 执行一次命令行同步
///
/// 只有致命错误返回 `Err`；单个文件的错误体现在打印的汇总里。
pub async fn run(cli: Cli, config_dir: &Path) -> Result<SyncReport> {
    let (source, dest) = cli.endpoints()?;
    let defaults = SyncDefaults::load(config_dir);
    let config = cli.to_config(&defaults);

    if cli.save_defaults {
        let updated = SyncDefaults {
            threads: config.threads,
            method: config.method,
            broken_links: config.broken_links,
            key_id: config.archive.key_id.clone(),
            keyring: config.archive.keyring.clone(),
        };
        updated
            .save(config_dir)
            .with_context(|| format!("保存默认配置到 {} 失败", config_dir.display()))?;
        info!("已保存默认配置");
    }

    if cli.interactive && !config.dry_run {
        let preview = SyncEngine::new(SyncConfig {
            dry_run: true,
            ..config.clone()
        });
        println!("正在分析变更...");
        let report = preview
            .sync(&source, &dest)
            .await
            .context("预览分析失败")?;
        print!("{}", report.render());

        if !confirm(&mut io::stdin().lock(), &mut io::stdout())? {
            println!("已取消。");
            return Ok(report);
        }
    }

    let verbose = config.verbose;
    let dry_run = config.dry_run;
    let report = SyncEngine::new(config)
        .sync(&source, &dest)
        .await
        .context("同步失败")?;

    if dry_run || verbose {
        print!("{}", report.render());
    }
    Ok(report)
}

/// 询问是否继续，只有 `y` / `yes` 视为确认
fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "\n是否执行上述变更? [y/N]: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes"
    ))
}
