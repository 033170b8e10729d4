//! socdl: 社交媒体与文件下载队列
//!
//! 提交的链接按类型交给媒体或文件调度器，在并发上限内下载，支持暂停、恢复、取消和重试。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::resolver::{GenericResolver, Resolver};
pub use crate::core::{
    DownloadError, DownloadResult, QueueManager, QueueStats, SubmitTask, TaskEvent, TaskId, TaskKind,
    TaskSnapshot, TaskStatus,
};
