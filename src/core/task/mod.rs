//! `task` 模块包含单个下载任务相关的逻辑
//!
//! - `state`: 任务标识、状态机和进度
//! - `download_task`: `DownloadTask` 以及暂停/取消信号
//! - `events`: 任务变更通知

pub mod download_task;
pub mod events;
pub mod state;

pub use download_task::{CancelAction, DownloadTask, ResumeAction, TaskControl};
pub use events::{EventBus, TaskEvent};
pub use state::{ProgressState, TaskId, TaskKind, TaskSnapshot, TaskStatus};
