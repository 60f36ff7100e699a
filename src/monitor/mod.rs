//! 矿池连接状态监测
//!
//! 周期性重读本次会话的日志，推断连接状态并给出一次性提示。
//! 监测只做观察和提示，从不终止或重启挖矿进程：挖矿程序有自己的重连逻辑。

pub mod indicators;

use crate::output::SessionLog;
use crate::process::ProcessWatch;
use crate::session::SessionContext;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use indicators::IndicatorTable;

/// 推断出的连接状态（非权威）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Pending,
    Established,
    DevfeeAdvisory,
    ConnectionAdvisory,
}

/// 连接状态的共享视图，只有连接监测会写入
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Pending)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// 扫描得到的状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    Established,
    Devfee,
    Connection,
}

impl Advisory {
    pub fn state(self) -> ConnectionState {
        match self {
            Advisory::Established => ConnectionState::Established,
            Advisory::Devfee => ConnectionState::DevfeeAdvisory,
            Advisory::Connection => ConnectionState::ConnectionAdvisory,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Advisory::Established => "✅ Pool connection established, mining is running normally",
            Advisory::Devfee => {
                "⚠️ Devfee pool connection problem detected: this only affects the miner's \
                 developer fee, not your earnings. Mining continues; a VPN or firewall review may help"
            }
            Advisory::Connection => {
                "🚫 Connection errors detected, possibly network instability or the pool needs a VPN. \
                 The miner reconnects on its own; check VPN/firewall settings if it persists"
            }
        }
    }
}

/// 逐行匹配指示短语，每类提示在一次会话内最多触发一次
#[derive(Debug)]
pub struct ConnectionTracker {
    table: IndicatorTable,
    established: bool,
    devfee_reported: bool,
    connection_reported: bool,
}

impl ConnectionTracker {
    pub fn new(table: IndicatorTable) -> Self {
        Self {
            table,
            established: false,
            devfee_reported: false,
            connection_reported: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn scan(&mut self, content: &str) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        if self.established {
            return advisories;
        }

        for line in content.lines() {
            let lower = line.to_lowercase();

            if self.table.is_established(&lower) {
                self.established = true;
                advisories.push(Advisory::Established);
                break;
            }

            // 开发费错误优先：其措辞往往也像一般连接错误
            if self.table.is_devfee_error(&lower) {
                if !self.devfee_reported {
                    self.devfee_reported = true;
                    advisories.push(Advisory::Devfee);
                }
            } else if self.table.is_connection_error(&lower) && !self.connection_reported {
                self.connection_reported = true;
                advisories.push(Advisory::Connection);
            }
        }

        advisories
    }
}

/// 连接监测工作线程
pub struct ConnectionMonitor {
    ctx: Arc<SessionContext>,
    log_path: PathBuf,
    /// 尚未扫描部分的起始偏移
    offset: u64,
    interval: Duration,
    status: ConnectionStatus,
    process: ProcessWatch,
    tracker: ConnectionTracker,
}

impl ConnectionMonitor {
    pub fn new(
        ctx: Arc<SessionContext>,
        log_path: PathBuf,
        offset: u64,
        interval: Duration,
        status: ConnectionStatus,
        process: ProcessWatch,
        table: IndicatorTable,
    ) -> Self {
        Self {
            ctx,
            log_path,
            offset,
            interval,
            status,
            process,
            tracker: ConnectionTracker::new(table),
        }
    }

    /// 运行直到确认连接成功、会话取消或子进程退出
    pub fn run(mut self) -> ConnectionState {
        info!(session = %self.ctx.id(), "🔍 Monitoring pool connection state");
        self.ctx.sink().push("🔍 Monitoring pool connection state...");

        loop {
            self.scan_once();
            if self.tracker.is_established() {
                break;
            }
            if self.process.poll().is_some() {
                debug!("Miner process exited, connection monitor stopping");
                break;
            }
            if !self.ctx.wait_timeout(self.interval) {
                break;
            }
        }

        self.status.get()
    }

    fn scan_once(&mut self) {
        let content = match SessionLog::read_since(&self.log_path, self.offset) {
            Ok(content) => content,
            Err(e) => {
                debug!("Connection monitor could not read {}: {}", self.log_path.display(), e);
                return;
            }
        };

        // 只推进到最后一个完整行，未写完的行留到下次
        let complete = match content.rfind('\n') {
            Some(pos) => &content[..=pos],
            None => return,
        };

        for advisory in self.tracker.scan(complete) {
            match advisory {
                Advisory::Established => info!("{}", advisory.message()),
                _ => warn!("{}", advisory.message()),
            }
            self.status.set(advisory.state());
            self.ctx.sink().push(advisory.message());
        }

        self.offset += complete.len() as u64;
    }
}
