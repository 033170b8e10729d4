use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;

use crate::core::task::{TaskId, TaskSnapshot, TaskStatus};
use super::{format_size, format_speed};

const BAR_TEMPLATE: &str = "{prefix:>12} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:>12} [{elapsed_precise}] {spinner} {bytes} {msg}";

/// 每个任务一条进度条
pub struct ProgressManager {
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_for(&mut self, snapshot: &TaskSnapshot) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(snapshot.id).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(0));
            pb.set_style(spinner_style());
            pb
        })
    }

    /// 根据最新快照刷新对应的进度条
    pub fn update(&mut self, snapshot: &TaskSnapshot) {
        let pb = self.bar_for(snapshot).clone();
        if pb.is_finished() {
            return;
        }

        if snapshot.total_bytes > 0 && pb.length() != Some(snapshot.total_bytes) {
            pb.set_style(bar_style());
            pb.set_length(snapshot.total_bytes);
        }
        pb.set_position(snapshot.bytes_transferred);
        pb.set_prefix(status_label(snapshot.status));

        let title: String = snapshot.title.chars().take(40).collect();
        match snapshot.status {
            TaskStatus::Downloading => {
                pb.set_message(format!("{} | {}", format_speed(snapshot.transfer_rate_bps), title));
            }
            TaskStatus::Completed => {
                pb.finish_with_message(format!("{} | {}", format_size(snapshot.bytes_transferred), title));
            }
            TaskStatus::Error => {
                pb.abandon_with_message(format!("{} | {}", title, snapshot.error_detail));
            }
            TaskStatus::Cancelled => pb.abandon_with_message(title),
            TaskStatus::Pending | TaskStatus::Paused => pb.set_message(title),
        }
    }

    /// 任务被移除时去掉进度条
    pub fn remove(&mut self, id: &TaskId) {
        if let Some(pb) = self.bars.remove(id) {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
    }

    pub fn finish(&self) {
        for pb in self.bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "等待中",
        TaskStatus::Downloading => "下载中",
        TaskStatus::Paused => "已暂停",
        TaskStatus::Completed => "已完成",
        TaskStatus::Error => "失败",
        TaskStatus::Cancelled => "已取消",
    }
}
