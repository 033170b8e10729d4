//! Core: 下载队列的任务管理、调度、传输和错误处理

pub mod actor_manager;
pub mod error;
pub mod fetcher;
pub mod resolver;
pub mod scheduler;
pub mod task;

pub use actor_manager::{QueueManager, QueueStats, SubmitTask};
pub use error::{DownloadError, DownloadResult};
pub use task::{TaskEvent, TaskId, TaskKind, TaskSnapshot, TaskStatus};
