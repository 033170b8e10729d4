use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::state::{TaskId, TaskSnapshot};

/// 任务变更通知
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Added(TaskSnapshot),
    Changed(TaskSnapshot),
    Removed(TaskId),
}

/// 事件总线，管理器和下载器共享
///
/// 订阅者掉线后在下一次发布时被清理。
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<TaskEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TaskEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: TaskEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
