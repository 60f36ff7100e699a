//! 单次挖矿会话的共享上下文
//!
//! 每次启动都会创建新的上下文并注入到各个工作线程，取代全局的
//! “正在挖矿”标志：取消只影响本次会话，上一次会话残留的线程不会误动作。

use crate::output::LogSink;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct SessionContext {
    id: Uuid,
    active: AtomicBool,
    /// 事件计数，每次通知加一
    generation: Mutex<u64>,
    wake: Condvar,
    sink: LogSink,
}

impl SessionContext {
    pub fn new(sink: LogSink) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            generation: Mutex::new(0),
            wake: Condvar::new(),
            sink,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 协作式取消：清除活动标志并唤醒所有等待者
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        self.notify();
    }

    /// 唤醒等待者（例如输出读取结束）
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.wake.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// 最多等待 `timeout`，期间被取消或被通知时提前返回
    ///
    /// 返回值为会话是否仍处于活动状态。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        let seen = *generation;

        while self.is_active() && *generation == seen {
            if self.wake.wait_until(&mut generation, deadline).timed_out() {
                break;
            }
        }

        self.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_wakes_waiter_immediately() {
        let ctx = SessionContext::new(LogSink::new());
        let waiter = {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let active = ctx.wait_timeout(Duration::from_secs(30));
                (active, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        ctx.cancel();

        let (active, elapsed) = waiter.join().unwrap();
        assert!(!active);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_times_out_while_active() {
        let ctx = SessionContext::new(LogSink::new());
        assert!(ctx.wait_timeout(Duration::from_millis(20)));
        assert!(ctx.is_active());
    }

    #[test]
    fn test_cancelled_context_returns_without_waiting() {
        let ctx = SessionContext::new(LogSink::new());
        ctx.cancel();
        let started = Instant::now();
        assert!(!ctx.wait_timeout(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
