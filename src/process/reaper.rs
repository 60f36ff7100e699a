//! 按映像名强制清理残留进程
//!
//! 这是停止流程的最后手段，用于清理失去响应或成为孤儿的挖矿进程。

use std::io;
use tracing::{debug, info, warn};

/// 强制清理所有与映像名匹配的进程，返回被清理的进程数
#[cfg_attr(test, mockall::automock)]
pub trait ProcessReaper: Send + Sync {
    fn sweep(&self, image_name: &str) -> io::Result<usize>;
}

/// 平台实现：Windows 使用 taskkill，其他平台遍历系统进程表
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReaper;

impl ProcessReaper for SystemReaper {
    #[cfg(windows)]
    fn sweep(&self, image_name: &str) -> io::Result<usize> {
        use std::os::windows::process::CommandExt;
        use std::process::Command;

        let output = Command::new("taskkill")
            .args(["/F", "/IM", image_name, "/T"])
            .creation_flags(super::CREATE_NO_WINDOW)
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let killed = stdout.lines().filter(|l| l.starts_with("SUCCESS")).count();
            info!("🧹 taskkill cleaned up {} {} process(es)", killed, image_name);
            Ok(killed)
        } else if stderr.contains("not found") {
            debug!("No running {} process found", image_name);
            Ok(0)
        } else {
            warn!("taskkill failed for {}: {}", image_name, stderr.trim());
            Err(io::Error::new(io::ErrorKind::Other, stderr.trim().to_string()))
        }
    }

    #[cfg(not(windows))]
    fn sweep(&self, image_name: &str) -> io::Result<usize> {
        use sysinfo::System;

        let mut system = System::new();
        system.refresh_processes();

        let own_pid = std::process::id();
        let mut killed = 0;
        let mut failed = 0;

        for process in system.processes_by_exact_name(image_name) {
            if process.pid().as_u32() == own_pid {
                continue;
            }
            if process.kill() {
                killed += 1;
            } else {
                failed += 1;
            }
        }

        if failed > 0 {
            warn!("Could not kill {} {} process(es)", failed, image_name);
        }
        if killed > 0 {
            info!("🧹 Cleaned up {} {} process(es)", killed, image_name);
        } else {
            debug!("No running {} process found", image_name);
        }
        Ok(killed)
    }
}
