//! 会话工作线程

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// 线程结束时（包括 panic 展开）发出完成信号
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// 带有限时 join 的命名线程
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (tx, done) = mpsc::channel();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = DoneGuard(tx);
            f();
        })?;

        debug!("Worker {} started", name);
        Ok(Self { name, handle, done })
    }

    /// 最多等待 `timeout`；超时的线程被分离，返回 false
    pub fn join_within(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("Worker {} panicked", self.name);
                }
                debug!("Worker {} joined", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Worker {} did not finish within {:?}, detaching", self.name, timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_join_finished_worker() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let worker = Worker::spawn("test-worker", move || flag.store(true, Ordering::SeqCst)).unwrap();

        assert!(worker.join_within(Duration::from_secs(5)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_times_out() {
        let worker = Worker::spawn("slow-worker", || thread::sleep(Duration::from_millis(500))).unwrap();
        assert!(!worker.join_within(Duration::from_millis(10)));
    }

    #[test]
    fn test_panicking_worker_is_joined() {
        let worker = Worker::spawn("panicking-worker", || panic!("boom")).unwrap();
        assert!(worker.join_within(Duration::from_secs(5)));
    }
}
