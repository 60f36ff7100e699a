//! 矿池连通性检测
//!
//! 启动前依次做 DNS 解析、ICMP ping 和 TCP 连接三项检测。
//! 检测本身从不返回错误，所有失败都记录在 [`ReachabilityResult`] 中。

pub mod diagnostic;
pub mod ping;

use crate::config::{PoolEndpoint, ProbeSettings};
use crate::output::LogSink;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use diagnostic::PreflightDiagnostic;

/// 连通性检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityResult {
    pub host: String,
    pub port: u16,
    pub dns_ok: bool,
    pub ping_ok: bool,
    pub tcp_ok: bool,
    /// 平均往返时间，不影响 `ping_ok`
    pub ping_avg_ms: Option<f64>,
    pub error_messages: Vec<String>,
}

impl ReachabilityResult {
    fn new(endpoint: &PoolEndpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            dns_ok: false,
            ping_ok: false,
            tcp_ok: false,
            ping_avg_ms: None,
            error_messages: Vec::new(),
        }
    }

    /// 可达 = DNS 成功，且 ping 或 TCP 至少一项成功
    pub fn reachable(&self) -> bool {
        self.dns_ok && (self.ping_ok || self.tcp_ok)
    }
}

/// 连通性检测接口，便于在测试中替换
#[cfg_attr(test, mockall::automock)]
pub trait PoolProbe: Send + Sync {
    fn probe(&self, endpoint: &PoolEndpoint, sink: &LogSink) -> ReachabilityResult;
}

/// 基于系统网络栈的检测实现
#[derive(Debug, Clone, Default)]
pub struct ReachabilityProber {
    settings: ProbeSettings,
}

impl ReachabilityProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    /// 在辅助线程中解析，超时后放弃等待
    fn resolve(&self, endpoint: &PoolEndpoint) -> Result<Vec<SocketAddr>, String> {
        let (tx, rx) = mpsc::channel();
        let target = (endpoint.host.clone(), endpoint.port);

        thread::Builder::new()
            .name("dns-resolve".to_string())
            .spawn(move || {
                let result = target.to_socket_addrs().map(|addrs| addrs.collect::<Vec<_>>());
                let _ = tx.send(result);
            })
            .map_err(|e| format!("DNS resolution failed: {}", e))?;

        match rx.recv_timeout(self.settings.dns_timeout()) {
            Ok(Ok(addrs)) if !addrs.is_empty() => Ok(addrs),
            Ok(Ok(_)) => Err("DNS resolution failed: no addresses".to_string()),
            Ok(Err(e)) => Err(format!("DNS resolution failed: {}", e)),
            Err(_) => Err(format!(
                "DNS resolution timed out after {}s",
                self.settings.dns_timeout().as_secs()
            )),
        }
    }

    /// 依次尝试每个地址，所有尝试共用一个超时期限
    fn connect(&self, endpoint: &PoolEndpoint, addrs: &[SocketAddr]) -> Result<SocketAddr, String> {
        let deadline = Instant::now() + self.settings.tcp_timeout();
        let mut last_error = None;
        for addr in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_error = Some(io::Error::new(io::ErrorKind::TimedOut, "connection timed out"));
                break;
            }
            match TcpStream::connect_timeout(addr, remaining) {
                Ok(_) => return Ok(*addr),
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => format!("TCP connection failed: {} - {}", endpoint, e),
            None => format!("TCP connection failed: {} - no address", endpoint),
        })
    }
}

impl PoolProbe for ReachabilityProber {
    fn probe(&self, endpoint: &PoolEndpoint, sink: &LogSink) -> ReachabilityResult {
        let mut result = ReachabilityResult::new(endpoint);

        info!("🔍 Testing pool reachability: {}", endpoint);
        sink.push(format!("🔍 Testing pool reachability: {}", endpoint));

        // DNS
        sink.push(format!("Resolving {}...", endpoint.host));
        let addrs = match self.resolve(endpoint) {
            Ok(addrs) => {
                result.dns_ok = true;
                sink.push(format!("✅ DNS ok: {}", endpoint.host));
                addrs
            }
            Err(e) => {
                warn!("{}", e);
                sink.push(format!("❌ {}", e));
                result.error_messages.push(e);
                Vec::new()
            }
        };

        // ICMP
        if self.settings.ping_count == 0 {
            debug!("ICMP check disabled");
        } else {
            let report = ping::ping(&endpoint.host, self.settings.ping_count, self.settings.ping_timeout());
            if report.success {
                result.ping_ok = true;
                result.ping_avg_ms = report.avg_ms;
                match report.avg_ms {
                    Some(avg) => sink.push(format!("✅ Ping ok: average {:.1}ms", avg)),
                    None => sink.push(format!("✅ Ping ok: {}", endpoint.host)),
                }
            } else if let Some(e) = report.error {
                warn!("{}", e);
                sink.push(format!("❌ {}", e));
                result.error_messages.push(e);
            }
        }

        // TCP
        if result.dns_ok {
            match self.connect(endpoint, &addrs) {
                Ok(addr) => {
                    result.tcp_ok = true;
                    sink.push(format!("✅ TCP connection ok: {}", addr));
                }
                Err(e) => {
                    warn!("{}", e);
                    sink.push(format!("❌ {}", e));
                    result.error_messages.push(e);
                }
            }
        } else {
            result
                .error_messages
                .push(format!("TCP connection skipped: {} did not resolve", endpoint.host));
        }

        if result.reachable() {
            info!("✅ Pool reachable: {}", endpoint);
            sink.push(format!("✅ Pool reachability check passed: {}", endpoint));
        } else {
            warn!("❌ Pool unreachable: {}", endpoint);
            sink.push(format!("❌ Pool reachability check failed: {}", endpoint));
            sink.push(format!("⚠️ Details: {}", result.error_messages.join("; ")));
        }

        result
    }
}
