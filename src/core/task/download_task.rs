use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use super::events::{EventBus, TaskEvent};
use super::state::{ProgressState, TaskId, TaskKind, TaskSnapshot, TaskStatus};
use crate::config::TaskSettings;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::resolver::MediaRequest;
use crate::utils::naming;

/// 暂停/取消信号
///
/// `attached` 表示当前是否有下载器绑定在任务上，三个标志都只在任务锁内修改。
#[derive(Debug, Default)]
pub struct TaskControl {
    cancelled: AtomicBool,
    paused: AtomicBool,
    attached: AtomicBool,
    wake: Notify,
}

impl TaskControl {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn request_resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// 暂停期间挂起当前下载器，恢复后返回 true，被取消返回 false
    pub async fn wait_while_paused(&self) -> bool {
        loop {
            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            notified.await;
        }
    }

    /// 直到任务被取消才返回，配合 `select!` 打断网络读取或解析
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// resume 之后调用方需要做的事
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// 下载器仍然挂着，已经原地唤醒
    InPlace,
    /// 没有下载器，任务回到 Pending，需要重新入队
    Requeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAction {
    /// 没有下载器，任务已经是 Cancelled
    Immediate,
    /// 已通知下载器，清理完临时文件后由它切换到 Cancelled
    Signalled,
}

/// 一个可调度的下载任务
///
/// 不可变字段在创建时确定；进度与状态由一把任务锁保护，所有变更都在锁内发布 `TaskEvent::Changed`，
/// 因此订阅者看到的事件顺序与实际修改顺序一致。
pub struct DownloadTask {
    pub id: TaskId,
    pub source_url: String,
    pub kind: TaskKind,
    pub desired_quality: String,
    pub desired_format: String,
    /// 文件任务可以指定保存的文件名
    pub file_name: Option<String>,
    pub settings: TaskSettings,
    pub created_at: DateTime<Utc>,
    state: Mutex<ProgressState>,
    control: TaskControl,
    events: Arc<EventBus>,
}

impl DownloadTask {
    pub fn new(
        source_url: String,
        kind: TaskKind,
        desired_quality: String,
        desired_format: String,
        file_name: Option<String>,
        settings: TaskSettings,
        events: Arc<EventBus>,
    ) -> Self {
        let title = match kind {
            TaskKind::Media => source_url.clone(),
            TaskKind::File => file_name
                .clone()
                .unwrap_or_else(|| naming::filename_from_url(&source_url)),
        };
        Self {
            id: TaskId::new(),
            source_url,
            kind,
            desired_quality,
            desired_format,
            file_name,
            settings,
            created_at: Utc::now(),
            state: Mutex::new(ProgressState::new(title)),
            control: TaskControl::default(),
            events,
        }
    }

    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn target_path(&self) -> Option<PathBuf> {
        self.state.lock().target_path.clone()
    }

    pub fn media_request(&self) -> MediaRequest {
        MediaRequest {
            quality: self.desired_quality.clone(),
            format: self.desired_format.clone(),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock();
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &ProgressState) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            kind: self.kind,
            desired_quality: self.desired_quality.clone(),
            desired_format: self.desired_format.clone(),
            status: state.status,
            progress_percent: state.progress_percent,
            bytes_transferred: state.bytes_transferred,
            total_bytes: state.total_bytes,
            transfer_rate_bps: state.transfer_rate_bps,
            error_detail: state.error_detail.clone(),
            target_path: state.target_path.clone(),
            title: state.title.clone(),
            platform: state.platform.clone(),
            created_at: self.created_at,
        }
    }

    /// 必须在持有任务锁时调用
    fn publish(&self, state: &ProgressState) {
        self.events.publish(TaskEvent::Changed(self.snapshot_of(state)));
    }

    fn invalid(&self, status: TaskStatus, action: &'static str) -> DownloadError {
        DownloadError::InvalidTransition {
            task_id: self.id,
            status,
            action,
        }
    }

    // ---- 控制操作 ----

    pub fn try_pause(&self) -> DownloadResult<()> {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Downloading {
            return Err(self.invalid(state.status, "pause"));
        }
        self.control.request_pause();
        state.status = TaskStatus::Paused;
        self.publish(&state);
        Ok(())
    }

    pub fn try_resume(&self) -> DownloadResult<ResumeAction> {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Paused {
            return Err(self.invalid(state.status, "resume"));
        }
        self.control.request_resume();
        let action = if self.control.is_attached() {
            state.status = TaskStatus::Downloading;
            ResumeAction::InPlace
        } else {
            state.status = TaskStatus::Pending;
            ResumeAction::Requeue
        };
        self.publish(&state);
        Ok(action)
    }

    pub fn try_cancel(&self) -> DownloadResult<CancelAction> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return Err(self.invalid(state.status, "cancel"));
        }
        self.control.request_cancel();
        if self.control.is_attached() {
            return Ok(CancelAction::Signalled);
        }
        state.status = TaskStatus::Cancelled;
        state.transfer_rate_bps = 0.0;
        self.publish(&state);
        Ok(CancelAction::Immediate)
    }

    /// Error/Cancelled → Pending，进度从零开始
    pub fn try_retry(&self) -> DownloadResult<()> {
        let mut state = self.state.lock();
        if !state.status.is_retryable() || self.control.is_attached() {
            return Err(self.invalid(state.status, "retry"));
        }
        state.reset();
        self.control.reset();
        self.publish(&state);
        Ok(())
    }

    // ---- 调度器与下载器使用 ----

    /// 调度器准入：Pending → Downloading 并绑定下载器，任务不可准入时返回 false
    pub fn begin_attempt(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Pending || self.control.is_cancelled() || self.control.is_attached() {
            return false;
        }
        self.control.set_attached(true);
        state.status = TaskStatus::Downloading;
        self.publish(&state);
        true
    }

    pub fn set_target(&self, target: PathBuf) {
        let mut state = self.state.lock();
        state.target_path = Some(target);
        self.publish(&state);
    }

    pub fn set_media_info(&self, title: &str, platform: &str) {
        let mut state = self.state.lock();
        state.title = title.to_string();
        state.platform = platform.to_string();
        self.publish(&state);
    }

    pub fn record_chunk(&self, bytes_transferred: u64, total_bytes: u64, rate_bps: f64) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.record_chunk(bytes_transferred, total_bytes, rate_bps);
        self.publish(&state);
    }

    /// 在任务锁内提交结果（例如把临时文件改名为目标文件）并切换到 Completed。
    ///
    /// 已被取消时不执行 `commit`，返回 `Ok(false)`。
    pub fn finish_completed<F>(&self, commit: F) -> DownloadResult<bool>
    where
        F: FnOnce() -> io::Result<PathBuf>,
    {
        let mut state = self.state.lock();
        if self.control.is_cancelled() {
            return Ok(false);
        }
        let path = commit()?;
        let size = file_len(&path)?;
        state.bytes_transferred = size;
        state.total_bytes = size;
        state.progress_percent = 100.0;
        state.target_path = Some(path);
        state.status = TaskStatus::Completed;
        self.control.set_attached(false);
        self.publish(&state);
        Ok(true)
    }

    pub fn finish_failed(&self, detail: String) {
        let mut state = self.state.lock();
        state.status = TaskStatus::Error;
        state.error_detail = detail;
        state.transfer_rate_bps = 0.0;
        self.control.set_attached(false);
        self.publish(&state);
    }

    pub fn finish_cancelled(&self) {
        let mut state = self.state.lock();
        state.status = TaskStatus::Cancelled;
        state.transfer_rate_bps = 0.0;
        self.control.set_attached(false);
        self.publish(&state);
    }
}

fn file_len(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
