use actix::prelude::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::fetcher::Fetcher;
use crate::core::resolver::Resolver;
use crate::core::scheduler::{Enqueue, GetSchedulerStats, SchedulerActor, SetLimits};
use crate::core::task::{
    CancelAction, DownloadTask, EventBus, ResumeAction, TaskEvent, TaskId, TaskKind, TaskSnapshot, TaskStatus,
};
use crate::utils::validator;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// ================== 队列统计 ==================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// 媒体调度器中占用名额的下载器数量
    pub active_media: usize,
    pub active_files: usize,
    /// 调度器里排队的条目数，包括等待被清理的过期条目
    pub queued_media: usize,
    pub queued_files: usize,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// 所有 Downloading 任务的速度之和
    pub speed_bps: f64,
}

/// 提交下载任务
///
/// 画质和格式为空时使用提交时配置中的默认值。
#[derive(Debug, Clone)]
pub struct SubmitTask {
    pub url: String,
    pub kind: TaskKind,
    pub quality: Option<String>,
    pub format: Option<String>,
    pub file_name: Option<String>,
}

impl SubmitTask {
    pub fn new(url: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            url: url.into(),
            kind,
            quality: None,
            format: None,
            file_name: None,
        }
    }

    pub fn media(url: impl Into<String>) -> Self {
        Self::new(url, TaskKind::Media)
    }

    pub fn file(url: impl Into<String>) -> Self {
        Self::new(url, TaskKind::File)
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

impl Message for SubmitTask {
    type Result = DownloadResult<TaskId>;
}
impl Handler<SubmitTask> for QueueManagerActor {
    type Result = DownloadResult<TaskId>;
    fn handle(&mut self, msg: SubmitTask, _ctx: &mut Self::Context) -> Self::Result {
        validator::parse_url(&msg.url)?;
        let task = Arc::new(DownloadTask::new(
            msg.url.trim().to_string(),
            msg.kind,
            msg.quality.unwrap_or_else(|| self.config.default_quality.clone()),
            msg.format.unwrap_or_else(|| self.config.default_format.clone()),
            msg.file_name,
            self.config.task_settings(),
            self.events.clone(),
        ));
        let id = task.id;
        info!("添加任务 {} ({}): {}", id, task.kind, task.source_url);

        self.events.publish(TaskEvent::Added(task.snapshot()));
        self.tasks.insert(id, task.clone());
        self.order.push(id);
        self.enqueue(task);
        Ok(id)
    }
}

/// 暂停下载中的任务
pub struct PauseTask {
    pub task_id: TaskId,
}
impl Message for PauseTask {
    type Result = DownloadResult<()>;
}
impl Handler<PauseTask> for QueueManagerActor {
    type Result = DownloadResult<()>;
    fn handle(&mut self, msg: PauseTask, _ctx: &mut Self::Context) -> Self::Result {
        self.get(msg.task_id)?.try_pause()?;
        info!("任务 {} 已暂停", msg.task_id);
        Ok(())
    }
}

/// 恢复暂停的任务
pub struct ResumeTask {
    pub task_id: TaskId,
}
impl Message for ResumeTask {
    type Result = DownloadResult<()>;
}
impl Handler<ResumeTask> for QueueManagerActor {
    type Result = DownloadResult<()>;
    fn handle(&mut self, msg: ResumeTask, _ctx: &mut Self::Context) -> Self::Result {
        let task = self.get(msg.task_id)?.clone();
        if task.try_resume()? == ResumeAction::Requeue {
            debug!("任务 {} 没有挂起的下载器，重新入队", msg.task_id);
            self.enqueue(task);
        }
        info!("任务 {} 已恢复", msg.task_id);
        Ok(())
    }
}

/// 取消任务，任何非终态都可以取消
pub struct CancelTask {
    pub task_id: TaskId,
}
impl Message for CancelTask {
    type Result = DownloadResult<()>;
}
impl Handler<CancelTask> for QueueManagerActor {
    type Result = DownloadResult<()>;
    fn handle(&mut self, msg: CancelTask, _ctx: &mut Self::Context) -> Self::Result {
        match self.get(msg.task_id)?.try_cancel()? {
            CancelAction::Immediate => info!("任务 {} 已取消", msg.task_id),
            CancelAction::Signalled => info!("已通知任务 {} 的下载器取消", msg.task_id),
        }
        Ok(())
    }
}

/// 重试失败或已取消的任务
pub struct RetryTask {
    pub task_id: TaskId,
}
impl Message for RetryTask {
    type Result = DownloadResult<()>;
}
impl Handler<RetryTask> for QueueManagerActor {
    type Result = DownloadResult<()>;
    fn handle(&mut self, msg: RetryTask, _ctx: &mut Self::Context) -> Self::Result {
        let task = self.get(msg.task_id)?.clone();
        task.try_retry()?;
        info!("任务 {} 重新排队", msg.task_id);
        self.enqueue(task);
        Ok(())
    }
}

/// 移除任务，仍在进行的先取消。返回是否真的移除了任务
pub struct RemoveTask {
    pub task_id: TaskId,
}
impl Message for RemoveTask {
    type Result = DownloadResult<bool>;
}
impl Handler<RemoveTask> for QueueManagerActor {
    type Result = DownloadResult<bool>;
    fn handle(&mut self, msg: RemoveTask, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.remove(msg.task_id))
    }
}

/// 按提交顺序列出所有任务
pub struct ListTasks;
impl Message for ListTasks {
    type Result = Vec<TaskSnapshot>;
}
impl Handler<ListTasks> for QueueManagerActor {
    type Result = MessageResult<ListTasks>;
    fn handle(&mut self, _msg: ListTasks, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.ordered().map(|task| task.snapshot()).collect())
    }
}

/// 查询单个任务
pub struct GetSnapshot {
    pub task_id: TaskId,
}
impl Message for GetSnapshot {
    type Result = DownloadResult<TaskSnapshot>;
}
impl Handler<GetSnapshot> for QueueManagerActor {
    type Result = DownloadResult<TaskSnapshot>;
    fn handle(&mut self, msg: GetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.get(msg.task_id)?.snapshot())
    }
}

/// 暂停所有下载中的任务，返回暂停的数量
pub struct PauseAll;
impl Message for PauseAll {
    type Result = usize;
}
impl Handler<PauseAll> for QueueManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: PauseAll, _ctx: &mut Self::Context) -> Self::Result {
        let paused = self.ordered().filter(|task| task.try_pause().is_ok()).count();
        info!("暂停了 {} 个任务", paused);
        paused
    }
}

/// 恢复所有暂停的任务，返回恢复的数量
pub struct ResumeAll;
impl Message for ResumeAll {
    type Result = usize;
}
impl Handler<ResumeAll> for QueueManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: ResumeAll, _ctx: &mut Self::Context) -> Self::Result {
        let mut requeue = Vec::new();
        let mut resumed = 0;
        for task in self.ordered() {
            match task.try_resume() {
                Ok(ResumeAction::InPlace) => resumed += 1,
                Ok(ResumeAction::Requeue) => {
                    resumed += 1;
                    requeue.push(task.clone());
                }
                Err(_) => {}
            }
        }
        for task in requeue {
            self.enqueue(task);
        }
        info!("恢复了 {} 个任务", resumed);
        resumed
    }
}

/// 移除所有已完成的任务，文件保留在磁盘上
pub struct ClearCompleted;
impl Message for ClearCompleted {
    type Result = usize;
}
impl Handler<ClearCompleted> for QueueManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: ClearCompleted, _ctx: &mut Self::Context) -> Self::Result {
        let completed: Vec<TaskId> = self
            .ordered()
            .filter(|task| task.status() == TaskStatus::Completed)
            .map(|task| task.id)
            .collect();
        completed.iter().filter(|id| self.remove(**id)).count()
    }
}

/// 队列统计
pub struct GetStats;
impl Message for GetStats {
    type Result = DownloadResult<QueueStats>;
}
impl Handler<GetStats> for QueueManagerActor {
    type Result = ResponseFuture<DownloadResult<QueueStats>>;
    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        let mut stats = QueueStats::default();
        for snapshot in self.ordered().map(|task| task.snapshot()) {
            stats.total += 1;
            match snapshot.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Downloading => {
                    stats.downloading += 1;
                    stats.speed_bps += snapshot.transfer_rate_bps;
                }
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Error => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_bytes += snapshot.total_bytes;
            stats.downloaded_bytes += snapshot.bytes_transferred;
        }

        let media = self.media.send(GetSchedulerStats);
        let files = self.files.send(GetSchedulerStats);
        Box::pin(async move {
            let media = media.await?;
            let files = files.await?;
            stats.active_media = media.active;
            stats.queued_media = media.queued;
            stats.active_files = files.active;
            stats.queued_files = files.queued;
            Ok(stats)
        })
    }
}

/// 替换配置：只影响之后提交的任务，并发上限立即生效
pub struct UpdateConfig(pub Config);
impl Message for UpdateConfig {
    type Result = DownloadResult<()>;
}
impl Handler<UpdateConfig> for QueueManagerActor {
    type Result = DownloadResult<()>;
    fn handle(&mut self, msg: UpdateConfig, _ctx: &mut Self::Context) -> Self::Result {
        msg.0.validate()?;
        self.config = msg.0;
        self.media.do_send(SetLimits {
            max_concurrent: Some(self.config.max_concurrent_media),
            backoff: self.config.admission_backoff(),
        });
        self.files.do_send(SetLimits {
            max_concurrent: self.config.file_concurrency(),
            backoff: self.config.admission_backoff(),
        });
        info!("配置已更新");
        Ok(())
    }
}

impl Actor for QueueManagerActor {
    type Context = Context<Self>;
}

/// 全局任务管理器 Actor，独占任务注册表
pub struct QueueManagerActor {
    config: Config,
    tasks: HashMap<TaskId, Arc<DownloadTask>>,
    /// 提交顺序
    order: Vec<TaskId>,
    media: Addr<SchedulerActor>,
    files: Addr<SchedulerActor>,
    events: Arc<EventBus>,
}

impl QueueManagerActor {
    pub fn new(
        config: Config,
        media: Addr<SchedulerActor>,
        files: Addr<SchedulerActor>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            tasks: HashMap::new(),
            order: Vec::new(),
            media,
            files,
            events,
        }
    }

    fn get(&self, task_id: TaskId) -> DownloadResult<&Arc<DownloadTask>> {
        self.tasks.get(&task_id).ok_or(DownloadError::NotFound(task_id))
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<DownloadTask>> + '_ {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn enqueue(&self, task: Arc<DownloadTask>) {
        match task.kind {
            TaskKind::Media => self.media.do_send(Enqueue(task)),
            TaskKind::File => self.files.do_send(Enqueue(task)),
        }
    }

    fn remove(&mut self, task_id: TaskId) -> bool {
        let Some(task) = self.tasks.remove(&task_id) else {
            return false;
        };
        if task.status().is_active() {
            // 已经是终态时 try_cancel 会拒绝，忽略即可
            let _ = task.try_cancel();
        }
        self.order.retain(|id| *id != task_id);
        self.events.publish(TaskEvent::Removed(task_id));
        info!("任务 {} 已移除", task_id);
        true
    }
}

/// `QueueManagerActor` 的句柄，可以在多个地方克隆使用
///
/// 必须在 actix 的 System 内创建。
#[derive(Clone)]
pub struct QueueManager {
    addr: Addr<QueueManagerActor>,
    events: Arc<EventBus>,
}

impl QueueManager {
    pub fn start(config: Config, resolver: Arc<dyn Resolver>) -> DownloadResult<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::new());
        let fetcher = Arc::new(Fetcher::new(&config, resolver)?);

        let media = SchedulerActor::new(
            TaskKind::Media,
            Some(config.max_concurrent_media),
            config.admission_backoff(),
            fetcher.clone(),
        )
        .start();
        let files = SchedulerActor::new(
            TaskKind::File,
            config.file_concurrency(),
            config.admission_backoff(),
            fetcher,
        )
        .start();

        let addr = QueueManagerActor::new(config, media, files, events.clone()).start();
        Ok(Self { addr, events })
    }

    pub async fn submit(&self, url: &str, kind: TaskKind) -> DownloadResult<TaskId> {
        self.submit_with(SubmitTask::new(url, kind)).await
    }

    pub async fn submit_with(&self, request: SubmitTask) -> DownloadResult<TaskId> {
        self.addr.send(request).await?
    }

    pub async fn pause(&self, task_id: TaskId) -> DownloadResult<()> {
        self.addr.send(PauseTask { task_id }).await?
    }

    pub async fn resume(&self, task_id: TaskId) -> DownloadResult<()> {
        self.addr.send(ResumeTask { task_id }).await?
    }

    pub async fn cancel(&self, task_id: TaskId) -> DownloadResult<()> {
        self.addr.send(CancelTask { task_id }).await?
    }

    pub async fn retry(&self, task_id: TaskId) -> DownloadResult<()> {
        self.addr.send(RetryTask { task_id }).await?
    }

    /// 重复移除同一个任务返回 `Ok(false)`
    pub async fn remove(&self, task_id: TaskId) -> DownloadResult<bool> {
        self.addr.send(RemoveTask { task_id }).await?
    }

    pub async fn list(&self) -> DownloadResult<Vec<TaskSnapshot>> {
        Ok(self.addr.send(ListTasks).await?)
    }

    pub async fn snapshot(&self, task_id: TaskId) -> DownloadResult<TaskSnapshot> {
        self.addr.send(GetSnapshot { task_id }).await?
    }

    pub async fn pause_all(&self) -> DownloadResult<usize> {
        Ok(self.addr.send(PauseAll).await?)
    }

    pub async fn resume_all(&self) -> DownloadResult<usize> {
        Ok(self.addr.send(ResumeAll).await?)
    }

    pub async fn clear_completed(&self) -> DownloadResult<usize> {
        Ok(self.addr.send(ClearCompleted).await?)
    }

    pub async fn stats(&self) -> DownloadResult<QueueStats> {
        self.addr.send(GetStats).await?
    }

    pub async fn update_config(&self, config: Config) -> DownloadResult<()> {
        self.addr.send(UpdateConfig(config)).await?
    }

    /// 取消所有未结束的任务，返回发出取消的数量
    pub async fn cancel_all(&self) -> DownloadResult<usize> {
        let mut cancelled = 0;
        for snapshot in self.list().await? {
            // 期间自己结束的任务会被拒绝
            if snapshot.status.is_active() && self.cancel(snapshot.id).await.is_ok() {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// 取消所有任务并等待下载器退出（临时文件随之删除），超时返回 `Ok(false)`
    pub async fn shutdown(&self, timeout: Duration) -> DownloadResult<bool> {
        let cancelled = self.cancel_all().await?;
        info!("退出前取消了 {} 个任务", cancelled);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let stats = self.stats().await?;
            if stats.active_media + stats.active_files == 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// 订阅任务变更事件，只会收到订阅之后发生的变更
    pub fn subscribe(&self) -> UnboundedReceiver<TaskEvent> {
        self.events.subscribe()
    }
}
