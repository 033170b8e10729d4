//! 调度器：每种任务类型一个，按并发上限准入任务
//!
//! 准入策略比较粗糙：并发已满时把队首任务放回队尾，并在退避时间后重试。
//! 竞争激烈时排队顺序因此会被打乱，这是已知的公平性缺陷。
//! 除了退避定时器，入队和下载器结束时也会立即尝试准入。

use actix::prelude::*;
use log::debug;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::core::fetcher::Fetcher;
use crate::core::task::{DownloadTask, TaskId, TaskKind, TaskStatus};

pub struct SchedulerActor {
    kind: TaskKind,
    /// None 表示不限制并发
    max_concurrent: Option<usize>,
    backoff: Duration,
    pending: VecDeque<Arc<DownloadTask>>,
    /// 正在运行下载器的任务，下载器退出后才移除
    active: HashSet<TaskId>,
    backoff_timer: Option<SpawnHandle>,
    fetcher: Arc<Fetcher>,
}

impl SchedulerActor {
    pub fn new(kind: TaskKind, max_concurrent: Option<usize>, backoff: Duration, fetcher: Arc<Fetcher>) -> Self {
        Self {
            kind,
            max_concurrent,
            backoff,
            pending: VecDeque::new(),
            active: HashSet::new(),
            backoff_timer: None,
            fetcher,
        }
    }

    fn at_capacity(&self) -> bool {
        self.max_concurrent
            .map(|max| self.active.len() >= max)
            .unwrap_or(false)
    }

    fn dispatch(&mut self, ctx: &mut Context<Self>) {
        // 每个排队项本轮最多看一次
        let mut remaining = self.pending.len();
        let mut deferred = false;

        while remaining > 0 {
            remaining -= 1;
            let Some(task) = self.pending.pop_front() else { break };

            if task.status() != TaskStatus::Pending {
                debug!("[{}] 丢弃过期的排队项 {} ({})", self.kind, task.id, task.status());
                continue;
            }
            if self.at_capacity() {
                debug!("[{}] 并发已满 ({}), 任务 {} 放回队尾", self.kind, self.active.len(), task.id);
                self.pending.push_back(task);
                deferred = true;
                break;
            }
            if self.active.contains(&task.id) {
                // 上一次尝试的下载器还没退出
                self.pending.push_back(task);
                deferred = true;
                continue;
            }
            self.admit(task, ctx);
        }

        if deferred {
            self.schedule_backoff(ctx);
        }
    }

    fn schedule_backoff(&mut self, ctx: &mut Context<Self>) {
        if self.backoff_timer.is_some() {
            return;
        }
        let handle = ctx.run_later(self.backoff, |act, ctx| {
            act.backoff_timer = None;
            act.dispatch(ctx);
        });
        self.backoff_timer = Some(handle);
    }

    fn admit(&mut self, task: Arc<DownloadTask>, ctx: &mut Context<Self>) {
        if !task.begin_attempt() {
            return;
        }
        let id = task.id;
        self.active.insert(id);
        debug!("[{}] 准入任务 {}，当前活跃 {}", self.kind, id, self.active.len());

        let fetcher = self.fetcher.clone();
        let scheduler = ctx.address();
        actix::spawn(async move {
            fetcher.run(task).await;
            scheduler.do_send(WorkerFinished { id });
        });
    }
}

impl Actor for SchedulerActor {
    type Context = Context<Self>;
}

/// 把任务放到等待队列尾部
pub struct Enqueue(pub Arc<DownloadTask>);
impl Message for Enqueue {
    type Result = ();
}
impl Handler<Enqueue> for SchedulerActor {
    type Result = ();
    fn handle(&mut self, msg: Enqueue, ctx: &mut Self::Context) {
        self.pending.push_back(msg.0);
        self.dispatch(ctx);
    }
}

/// 下载器退出，释放并发名额
pub struct WorkerFinished {
    pub id: TaskId,
}
impl Message for WorkerFinished {
    type Result = ();
}
impl Handler<WorkerFinished> for SchedulerActor {
    type Result = ();
    fn handle(&mut self, msg: WorkerFinished, ctx: &mut Self::Context) {
        self.active.remove(&msg.id);
        debug!("[{}] 任务 {} 的下载器已退出，当前活跃 {}", self.kind, msg.id, self.active.len());
        self.dispatch(ctx);
    }
}

/// 运行中调整并发上限和退避时间
pub struct SetLimits {
    pub max_concurrent: Option<usize>,
    pub backoff: Duration,
}
impl Message for SetLimits {
    type Result = ();
}
impl Handler<SetLimits> for SchedulerActor {
    type Result = ();
    fn handle(&mut self, msg: SetLimits, ctx: &mut Self::Context) {
        self.max_concurrent = msg.max_concurrent;
        self.backoff = msg.backoff;
        self.dispatch(ctx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub active: usize,
    pub queued: usize,
}

pub struct GetSchedulerStats;
impl Message for GetSchedulerStats {
    type Result = SchedulerStats;
}
impl Handler<GetSchedulerStats> for SchedulerActor {
    type Result = MessageResult<GetSchedulerStats>;
    fn handle(&mut self, _msg: GetSchedulerStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(SchedulerStats {
            active: self.active.len(),
            queued: self.pending.len(),
        })
    }
}
