//! 任务调度：工具并发池
//!
//! 同一批工具调用并发执行，用 Semaphore 限制同时在跑的数量（默认 3）。

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// 任务调度器
pub struct TaskScheduler {
    /// 工具并发限制
    tool_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max_concurrent = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取工具执行许可；许可随返回值 drop 归还
    pub async fn acquire_tool(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.tool_semaphore.clone().acquire_owned().await
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
