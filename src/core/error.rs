use thiserror::Error;
use std::io;

use crate::core::resolver::ResolveError;
use crate::core::task::{TaskId, TaskStatus};

/// 下载队列的错误分类
///
/// `InvalidUrl`、`InvalidTransition`、`NotFound` 是同步返回给调用方的拒绝；
/// `Resolution`、`Transfer` 只会被记录在任务的 `error_detail` 上，不会跨越管理器边界抛出。
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("任务 {task_id} 当前状态为 {status}，不能执行 {action}")]
    InvalidTransition {
        task_id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("解析失败: {0}")]
    Resolution(String),

    #[error("传输失败: {0}")]
    Transfer(String),

    #[error("任务不存在: {0}")]
    NotFound(TaskId),

    #[error("下载被取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("消息投递失败: {0}")]
    Mailbox(#[from] actix::MailboxError),
}

impl DownloadError {
    /// 任务级失败，用户可以通过 retry 恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Resolution(_) | DownloadError::Transfer(_) | DownloadError::Io(_)
        )
    }

    /// 调用被拒绝，任务没有发生任何变化
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DownloadError::InvalidUrl(_)
                | DownloadError::InvalidTransition { .. }
                | DownloadError::NotFound(_)
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DownloadError::Transfer(format!("网络超时: {}", error))
        } else {
            DownloadError::Transfer(error.to_string())
        }
    }
}

impl From<ResolveError> for DownloadError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Transfer(msg) => DownloadError::Transfer(msg),
            other => DownloadError::Resolution(other.to_string()),
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
