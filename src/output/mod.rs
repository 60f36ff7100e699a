//! 挖矿程序输出的分类与分发
//!
//! 子进程的合并输出由唯一的读取线程逐行处理：先追加到会话日志文件，
//! 再分类放入内存队列 [`LogSink`]，由界面按固定节奏批量取走。

pub mod classifier;
pub mod router;
pub mod session_log;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use classifier::{classify, ClassifierKeywords};
pub use router::OutputRouter;
pub use session_log::SessionLog;

/// 日志行分类标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTag {
    Plain,
    Important,
    Warning,
    Success,
    Hashrate,
}

/// 一条已分类的日志，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
    pub tag: LogTag,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            timestamp: Local::now(),
            tag: classify(&text),
            text,
        }
    }
}

/// 线程安全的日志队列
///
/// 入队与“取出并清空”都在同一把锁内完成，界面线程可以独立地周期性排空。
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    queue: Arc<Mutex<Vec<LogLine>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分类并入队
    pub fn push(&self, text: impl Into<String>) {
        self.push_line(LogLine::new(text));
    }

    pub fn push_line(&self, line: LogLine) {
        self.queue.lock().push(line);
    }

    /// 取出全部日志并清空队列，保持入队顺序
    pub fn drain(&self) -> Vec<LogLine> {
        std::mem::take(&mut *self.queue.lock())
    }
}
