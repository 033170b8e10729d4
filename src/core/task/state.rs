use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// 任务标识，创建时分配，生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务类型，决定由哪个调度器处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// 需要经过解析器的媒体链接
    Media,
    /// 直接文件链接
    File,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Media => write!(f, "media"),
            TaskKind::File => write!(f, "file"),
        }
    }
}

/// 下载任务状态
///
/// Pending → Downloading → Completed 是正常路径；Error 与 Cancelled 只能通过 retry 回到 Pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    /// Completed、Error、Cancelled 之外的状态
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Downloading | TaskStatus::Paused
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Error | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", text)
    }
}

/// 单个任务的可变进度信息，由任务锁保护
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub bytes_transferred: u64,
    /// 0 表示未知
    pub total_bytes: u64,
    pub transfer_rate_bps: f64,
    pub error_detail: String,
    /// 开始下载前为空
    pub target_path: Option<PathBuf>,
    pub title: String,
    pub platform: String,
}

impl ProgressState {
    pub fn new(title: String) -> Self {
        Self {
            status: TaskStatus::Pending,
            progress_percent: 0.0,
            bytes_transferred: 0,
            total_bytes: 0,
            transfer_rate_bps: 0.0,
            error_detail: String::new(),
            target_path: None,
            title,
            platform: String::new(),
        }
    }

    /// 记录一个分块之后的进度，字节数只增不减
    pub fn record_chunk(&mut self, bytes_transferred: u64, total_bytes: u64, rate_bps: f64) {
        self.bytes_transferred = self.bytes_transferred.max(bytes_transferred);
        self.total_bytes = if total_bytes > 0 && total_bytes < self.bytes_transferred {
            // 服务器实际发送的数据超过了声明长度
            self.bytes_transferred
        } else {
            total_bytes
        };
        if self.total_bytes > 0 {
            let percent = self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0;
            self.progress_percent = self.progress_percent.max(percent.min(100.0));
        }
        self.transfer_rate_bps = rate_bps.max(0.0);
    }

    /// retry 时清空进度和错误信息
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress_percent = 0.0;
        self.bytes_transferred = 0;
        self.total_bytes = 0;
        self.transfer_rate_bps = 0.0;
        self.error_detail.clear();
        self.target_path = None;
    }
}

/// 任务状态的不可变拷贝，供列表展示、轮询和事件通知使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub source_url: String,
    pub kind: TaskKind,
    pub desired_quality: String,
    pub desired_format: String,
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub transfer_rate_bps: f64,
    pub error_detail: String,
    pub target_path: Option<PathBuf>,
    pub title: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn speed_mbps(&self) -> f64 {
        self.transfer_rate_bps / (1024.0 * 1024.0)
    }
}
