mod progress;

use std::fmt;
pub use progress::ProgressManager;

use crate::core::QueueStats;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

pub struct DownloadSummary {
    pub stats: QueueStats,
    pub elapsed_time: std::time::Duration,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "总任务数: {}", self.stats.total)?;
        writeln!(f, "已下载: {}", format_size(self.stats.downloaded_bytes))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.stats.completed)?;
        writeln!(f, "失败: {}", self.stats.failed)?;
        writeln!(f, "取消: {}", self.stats.cancelled)?;
        if self.stats.paused + self.stats.pending + self.stats.downloading > 0 {
            writeln!(
                f,
                "未完成: {}",
                self.stats.paused + self.stats.pending + self.stats.downloading
            )?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else if bytes_per_sec > 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}
