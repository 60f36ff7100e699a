//! 输出读取循环

use super::SessionLog;
use crate::session::SessionContext;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::Arc;
use tracing::{debug, warn};

/// 子进程输出的唯一读取者
///
/// 按子进程输出顺序逐行处理：先写会话日志并刷新，再分类入队。
pub struct OutputRouter {
    ctx: Arc<SessionContext>,
    log: Option<SessionLog>,
}

impl OutputRouter {
    pub fn new(ctx: Arc<SessionContext>, log: Option<SessionLog>) -> Self {
        Self { ctx, log }
    }

    /// 阻塞读取直到输出结束（子进程退出或管道关闭），返回处理的行数
    pub fn run<R: Read>(mut self, output: R) -> u64 {
        let mut reader = BufReader::new(output);
        let mut buf = Vec::with_capacity(256);
        let mut lines = 0u64;

        self.ctx.sink().push("Capturing miner output...");

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.route(line);
                    lines += 1;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != ErrorKind::BrokenPipe {
                        warn!("Failed to read miner output: {}", e);
                        self.ctx.sink().push(format!("Error reading miner output: {}", e));
                    }
                    break;
                }
            }
        }

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.end() {
                warn!("Failed to close session log {}: {}", log.path().display(), e);
            }
        }

        debug!(session = %self.ctx.id(), "Output reader finished after {} lines", lines);
        self.ctx.notify();
        lines
    }

    fn route(&mut self, line: &str) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.append(line) {
                // 写失败后不再尝试写文件，只保留界面输出
                warn!("Failed to write session log {}: {}", log.path().display(), e);
                self.ctx
                    .sink()
                    .push(format!("Session log disabled after write error: {}", e));
                self.log = None;
            }
        }

        self.ctx.sink().push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{LogSink, LogTag};
    use std::io::Cursor;

    fn context() -> (Arc<SessionContext>, LogSink) {
        let sink = LogSink::new();
        (SessionContext::new(sink.clone()), sink)
    }

    #[test]
    fn test_lines_keep_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mining_log.txt");
        let (ctx, sink) = context();

        let mut log = SessionLog::open(&path).unwrap();
        log.begin().unwrap();

        // stdout 与 stderr 合并后的任意交错
        let output = "miner starting\r\naccepted share: 1/1\n\n   \nconnection refused\nERROR: devfee timeout\ncpu0 1.2 KH/s";
        let routed = OutputRouter::new(ctx, Some(log)).run(Cursor::new(output));
        assert_eq!(routed, 5);

        let queued: Vec<_> = sink.drain().into_iter().skip(1).collect();
        let texts: Vec<&str> = queued.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "miner starting",
                "accepted share: 1/1",
                "connection refused",
                "ERROR: devfee timeout",
                "cpu0 1.2 KH/s",
            ]
        );
        assert_eq!(queued[1].tag, LogTag::Success);
        assert_eq!(queued[2].tag, LogTag::Warning);
        assert_eq!(queued[4].tag, LogTag::Hashrate);

        let content = std::fs::read_to_string(&path).unwrap();
        let logged: Vec<&str> = content
            .lines()
            .filter(|l| l.starts_with('['))
            .map(|l| l.split_once("] ").unwrap().1)
            .collect();
        assert_eq!(logged, texts);
        assert!(content.trim_end().ends_with("==="));
        assert!(content.contains("=== session ended "));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (ctx, sink) = context();
        let output: &[u8] = b"hash\xffrate\n";
        OutputRouter::new(ctx, None).run(output);

        let lines = sink.drain();
        assert_eq!(lines.last().unwrap().text, "hash\u{fffd}rate");
    }

    #[test]
    fn test_reader_end_notifies_context() {
        let (ctx, _sink) = context();
        let generation = ctx.generation();
        OutputRouter::new(ctx.clone(), None).run(Cursor::new(""));
        assert!(ctx.generation() > generation);
    }
}
