//! 调用系统 ping 命令做 ICMP 检测

use crate::process::{hide_window, wait_child_timeout};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// 单次 ping 检测的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PingReport {
    pub success: bool,
    /// 平均往返时间（尽力解析）
    pub avg_ms: Option<f64>,
    pub error: Option<String>,
}

impl PingReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            avg_ms: None,
            error: Some(error.into()),
        }
    }
}

fn ping_command(host: &str, count: u32) -> Command {
    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", &count.to_string(), host]);
    } else {
        command.args(["-c", &count.to_string(), host]);
    }
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null());
    hide_window(&mut command);
    command
}

/// 执行 ping，成功与否只看退出状态
pub fn ping(host: &str, count: u32, timeout: Duration) -> PingReport {
    let mut child = match ping_command(host, count).spawn() {
        Ok(child) => child,
        Err(e) => return PingReport::failed(format!("Ping failed: {}", e)),
    };

    let Some(status) = wait_child_timeout(&mut child, timeout) else {
        let _ = child.kill();
        let _ = child.wait();
        return PingReport::failed(format!("Ping timed out after {}s", timeout.as_secs()));
    };

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        let mut raw = Vec::new();
        if stdout.read_to_end(&mut raw).is_ok() {
            output = String::from_utf8_lossy(&raw).into_owned();
        }
    }

    if status.success() {
        let avg_ms = parse_average_rtt(&output);
        debug!("Ping {} ok, avg {:?} ms", host, avg_ms);
        PingReport {
            success: true,
            avg_ms,
            error: None,
        }
    } else {
        PingReport::failed("Ping failed: host not responding to ICMP")
    }
}

/// 从 ping 输出中解析平均往返时间
///
/// 支持 `rtt min/avg/max/mdev = 1.0/2.0/3.0/0.5 ms`（Linux、macOS）
/// 以及 `Average = 12ms` / `平均 = 12ms`（Windows）。
pub fn parse_average_rtt(output: &str) -> Option<f64> {
    for line in output.lines() {
        if let Some((labels, values)) = line.split_once('=') {
            if labels.contains("min/avg/max") {
                let avg = values.trim().split('/').nth(1)?;
                return avg.trim().parse().ok();
            }
        }

        for label in ["Average =", "平均 ="] {
            if let Some(pos) = line.find(label) {
                let value = &line[pos + label.len()..];
                let digits: String = value
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                return digits.parse().ok();
            }
        }
    }
    None
}
