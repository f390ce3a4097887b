use std::sync::atomic::{AtomicU64, Ordering};

/// 进度回调，执行器只调用这两个方法
pub trait Progress: Send + Sync {
    /// 完成一个请求
    fn tick(&self);

    /// 放弃 n 个尚未发送的请求 (出错或提前结束)
    fn drop_remaining(&self, n: u64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn tick(&self) {}

    fn drop_remaining(&self, _n: u64) {}
}

/// 原子计数器，用于命令行汇总
#[derive(Debug, Default)]
pub struct ProgressCounter {
    completed: AtomicU64,
    dropped: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Progress for ProgressCounter {
    fn tick(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn drop_remaining(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }
}
