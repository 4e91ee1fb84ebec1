//! 运行结束后的汇总报告

use crate::core::stats::StatsSnapshot;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// 预估同步耗时时假定的吞吐量（50 MiB/s）
const ESTIMATED_THROUGHPUT: f64 = 50.0 * 1024.0 * 1024.0;

/// 一次同步调用的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        !self.stats.errors.is_empty()
    }

    /// 预览或执行汇总，取决于是否 dry-run
    pub fn render(&self) -> String {
        if self.dry_run {
            self.render_preview()
        } else {
            self.render_execution()
        }
    }

    fn render_preview(&self) -> String {
        let s = &self.stats;
        let rule = "=".repeat(60);
        let thin = "-".repeat(30);
        let mut out = String::new();

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "                      同步预览");
        let _ = writeln!(out, "{}", rule);

        let total = s.planned_operations();
        if total == 0 {
            let _ = writeln!(out, "* 无需变更：源与目标已同步");
            let _ = writeln!(out, "  检查文件: {}", s.files_checked);
            let _ = writeln!(out, "  分析耗时: {}", format_duration(self.elapsed.as_secs_f64()));
            if !s.errors.is_empty() {
                write_list(&mut out, "发现问题", &s.errors);
            }
            return out;
        }

        let _ = writeln!(out, "计划操作:");
        let _ = writeln!(out, "{}", thin);
        if s.files_to_copy > 0 {
            let _ = writeln!(
                out,
                "待复制文件:   {} ({})",
                s.files_to_copy,
                format_bytes(s.bytes_to_copy)
            );
        }
        if s.dirs_to_create > 0 {
            let _ = writeln!(out, "待创建目录:   {}", s.dirs_to_create);
        }
        if s.files_to_delete > 0 {
            let _ = writeln!(
                out,
                "待删除文件:   {} ({})",
                s.files_to_delete,
                format_bytes(s.bytes_to_delete)
            );
        }
        if s.dirs_to_delete > 0 {
            let _ = writeln!(out, "待删除目录:   {}", s.dirs_to_delete);
        }

        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(out, "汇总:");
        let _ = writeln!(out, "   操作总数:     {}", total);
        let _ = writeln!(out, "   检查文件:     {}", s.files_checked);
        let net = s.bytes_to_copy as i128 - s.bytes_to_delete as i128;
        let _ = writeln!(out, "   净传输量:     {}", format_signed_bytes(net));
        let _ = writeln!(
            out,
            "   分析耗时:     {}",
            format_duration(self.elapsed.as_secs_f64())
        );
        if s.bytes_to_copy > 0 {
            let estimate = (s.bytes_to_copy as f64 / ESTIMATED_THROUGHPUT).max(1.0);
            let _ = writeln!(out, "   预计同步耗时: {}", format_duration(estimate));
        }

        if !s.errors.is_empty() {
            write_list(&mut out, "发现问题", &s.errors);
        }

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "去掉 --dry-run 重新运行以执行上述变更");
        let _ = writeln!(out, "{}", rule);
        out
    }

    fn render_execution(&self) -> String {
        let s = &self.stats;
        let rule = "=".repeat(50);
        let mut out = String::new();
        let elapsed = self.elapsed.as_secs_f64();

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "                 同步完成");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "结果:");
        let _ = writeln!(out, "   检查文件: {}", s.files_checked);
        let _ = writeln!(out, "   复制文件: {}", s.files_copied);
        let _ = writeln!(out, "   删除文件: {}", s.files_deleted);
        let _ = writeln!(out, "   创建目录: {}", s.dirs_created);
        if s.dirs_deleted > 0 {
            let _ = writeln!(out, "   删除目录: {}", s.dirs_deleted);
        }
        let _ = writeln!(out, "   复制字节: {}", format_bytes(s.bytes_copied));
        let _ = writeln!(out, "   删除字节: {}", format_bytes(s.bytes_deleted));
        let _ = writeln!(out, "   耗时:     {}", format_duration(elapsed));
        if s.bytes_copied > 0 && elapsed > 0.0 {
            let throughput = (s.bytes_copied as f64 / elapsed) as u64;
            let _ = writeln!(out, "   吞吐量:   {}/s", format_bytes(throughput));
        }

        if s.errors.is_empty() {
            let _ = writeln!(out, "\n同步成功完成！");
        } else {
            write_list(&mut out, "错误", &s.errors);
        }
        let _ = writeln!(out, "{}", rule);
        out
    }
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n{} ({}):", title, items.len());
    for item in items {
        let _ = writeln!(out, "   • {}", item);
    }
}

/// 格式化字节数（1024 进制，保留一位小数）
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp + 1 < UNITS.len() {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}", bytes as f64 / div as f64, UNITS[exp])
}

fn format_signed_bytes(bytes: i128) -> String {
    if bytes < 0 {
        format!("-{}", format_bytes(bytes.unsigned_abs() as u64))
    } else {
        format_bytes(bytes as u64)
    }
}

/// 格式化秒数：`12.3s` / `2m 3.0s` / `1h 2m 3.0s`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }

    let total_minutes = (seconds / 60.0) as u64;
    let secs = seconds - (total_minutes * 60) as f64;
    if total_minutes < 60 {
        return format!("{}m {:.1}s", total_minutes, secs);
    }

    format!("{}h {}m {:.1}s", total_minutes / 60, total_minutes % 60, secs)
}
