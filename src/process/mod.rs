//! 挖矿进程监督
//!
//! 子进程句柄只归 [`ProcessSupervisor`] 所有；其他组件通过 [`ProcessWatch`]
//! 做只读的非阻塞查询。所有停止路径（用户停止、关闭窗口、重启、意外退出）
//! 都走同一个 [`ProcessSupervisor::stop`]：终止 → 等待 → 强杀 → 按名清理。

pub mod command;
pub mod reaper;

use crate::error::LaunchError;
use parking_lot::Mutex;
use std::io::{ErrorKind, PipeReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use command::{CommandSpec, MinerCommand, MinerIdentity};
pub use reaper::{ProcessReaper, SystemReaper};

#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// 强杀后的等待上限
const KILL_WAIT: Duration = Duration::from_secs(2);

/// 等待退出时的轮询间隔
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct ChildSlot {
    child: Child,
    exit: Option<ExitStatus>,
}

impl ChildSlot {
    fn try_reap(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => debug!("try_wait failed for PID {}: {}", self.child.id(), e),
            }
        }
        self.exit
    }
}

/// 运行中的挖矿进程，由监督者独占
pub struct ProcessHandle {
    pid: u32,
    slot: Arc<Mutex<ChildSlot>>,
}

/// 子进程的只读视图
#[derive(Clone)]
pub struct ProcessWatch {
    slot: Arc<Mutex<ChildSlot>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn watch(&self) -> ProcessWatch {
        ProcessWatch {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn poll(&self) -> Option<ExitStatus> {
        self.slot.lock().try_reap()
    }
}

impl ProcessWatch {
    /// 非阻塞查询退出状态
    pub fn poll(&self) -> Option<ExitStatus> {
        self.slot.lock().try_reap()
    }

    pub fn is_alive(&self) -> bool {
        self.poll().is_none()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

/// 停止结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 没有活动进程
    NoProcess,
    /// 停止前已经退出
    AlreadyExited(ExitStatus),
    /// 收到终止信号后在宽限期内退出
    Terminated(ExitStatus),
    /// 被强制结束
    Killed(ExitStatus),
    /// 强杀后仍未退出，已按映像名清理
    Swept { killed: usize },
}

impl StopOutcome {
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            StopOutcome::AlreadyExited(status)
            | StopOutcome::Terminated(status)
            | StopOutcome::Killed(status) => Some(*status),
            StopOutcome::NoProcess | StopOutcome::Swept { .. } => None,
        }
    }
}

/// 挖矿进程监督者
pub struct ProcessSupervisor {
    image_name: String,
    reaper: Arc<dyn ProcessReaper>,
    /// 测试中模拟强杀无效的进程
    #[cfg(test)]
    skip_kill: bool,
}

impl ProcessSupervisor {
    pub fn new(image_name: impl Into<String>, reaper: Arc<dyn ProcessReaper>) -> Self {
        Self {
            image_name: image_name.into(),
            reaper,
            #[cfg(test)]
            skip_kill: false,
        }
    }

    /// 启动子进程，stdout 与 stderr 合并到同一个管道
    pub fn start(&self, spec: &CommandSpec) -> Result<(ProcessHandle, PipeReader), LaunchError> {
        let program = spec.program.display().to_string();

        let (reader, writer) = std::io::pipe().map_err(|e| LaunchError::Pipe { error: e.to_string() })?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| LaunchError::Pipe { error: e.to_string() })?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);
        hide_window(&mut command);

        let child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => LaunchError::NotFound { program: program.clone() },
            _ => LaunchError::Spawn {
                program: program.clone(),
                error: e.to_string(),
            },
        })?;
        // 释放父进程持有的写端，子进程退出后读端才能读到 EOF
        drop(command);

        let pid = child.id();
        info!("⛏️ Miner process started, PID: {}", pid);

        let handle = ProcessHandle {
            pid,
            slot: Arc::new(Mutex::new(ChildSlot { child, exit: None })),
        };
        Ok((handle, reader))
    }

    /// 停止子进程，没有活动进程时直接成功
    pub fn stop(&self, handle: Option<ProcessHandle>, grace_period: Duration) -> StopOutcome {
        let Some(handle) = handle else {
            debug!("No active miner process to stop");
            return StopOutcome::NoProcess;
        };

        if let Some(status) = handle.poll() {
            info!("Miner process already exited, exit code: {:?}", status.code());
            return StopOutcome::AlreadyExited(status);
        }

        info!("Stopping miner process (PID: {})", handle.pid);
        terminate(handle.pid);
        if let Some(status) = wait_exit(&handle, grace_period) {
            info!("✅ Miner process stopped gracefully");
            return StopOutcome::Terminated(status);
        }

        warn!(
            "Miner process did not exit within {:?}, killing it",
            grace_period
        );
        self.kill(&handle);
        if let Some(status) = wait_exit(&handle, KILL_WAIT) {
            warn!("⚠️ Miner process was killed");
            return StopOutcome::Killed(status);
        }

        error!("Miner process PID {} survived kill, sweeping by name", handle.pid);
        let killed = self.sweep_strays();
        if let Some(status) = wait_exit(&handle, KILL_WAIT) {
            debug!("PID {} exited after sweep: {:?}", handle.pid, status);
        }
        StopOutcome::Swept { killed }
    }

    fn kill(&self, handle: &ProcessHandle) {
        #[cfg(test)]
        {
            if self.skip_kill {
                return;
            }
        }
        if let Err(e) = handle.slot.lock().child.kill() {
            warn!("Failed to kill PID {}: {}", handle.pid, e);
        }
    }

    /// 按映像名清理残留进程，失败只记录日志
    pub fn sweep_strays(&self) -> usize {
        match self.reaper.sweep(&self.image_name) {
            Ok(killed) => killed,
            Err(e) => {
                warn!("Failed to sweep {} processes: {}", self.image_name, e);
                0
            }
        }
    }
}

/// 轮询等待退出，最多等待 `timeout`
fn wait_exit(handle: &ProcessHandle, timeout: Duration) -> Option<ExitStatus> {
    wait_until(timeout, || handle.poll())
}

/// 等待子进程退出；用于不归监督者管理的短命令（如 ping）
pub(crate) fn wait_child_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    wait_until(timeout, || child.try_wait().ok().flatten())
}

fn wait_until(timeout: Duration, mut poll: impl FnMut() -> Option<ExitStatus>) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = poll() {
            return Some(status);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to PID {}", pid),
        Err(e) => warn!("Failed to send SIGTERM to PID {}: {}", pid, e),
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    use std::os::windows::process::CommandExt;

    // 不带 /F 的 taskkill 请求进程自行关闭
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status();
    if let Err(e) = result {
        warn!("Failed to request termination of PID {}: {}", pid, e);
    }
}

#[cfg(not(any(unix, windows)))]
fn terminate(pid: u32) {
    debug!("Graceful termination not supported on this platform, PID {}", pid);
}

#[cfg(windows)]
pub(crate) fn hide_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
pub(crate) fn hide_window(_command: &mut Command) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::reaper::MockProcessReaper;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::io::Read;
    use std::path::PathBuf;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new("sh", Arc::new(SystemReaper))
    }

    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new(PathBuf::from("/bin/sh"), vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let spec = CommandSpec::new("/nonexistent/SRBMiner-MULTI", vec![]);
        let result = supervisor().start(&spec);
        assert!(matches!(result, Err(LaunchError::NotFound { .. })));
    }

    #[test]
    fn test_stdout_and_stderr_are_merged() {
        let (handle, mut output) = supervisor()
            .start(&shell("echo one; echo two 1>&2; echo three"))
            .unwrap();

        let mut text = String::new();
        output.read_to_string(&mut text).unwrap();
        assert_eq!(text, "one\ntwo\nthree\n");

        let status = wait_exit(&handle, Duration::from_secs(5)).unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_stop_without_process_is_noop() {
        let supervisor = supervisor();
        assert_eq!(supervisor.stop(None, Duration::from_secs(1)), StopOutcome::NoProcess);
        assert_eq!(supervisor.stop(None, Duration::from_secs(1)), StopOutcome::NoProcess);
    }

    #[test]
    fn test_stop_already_exited() {
        let supervisor = supervisor();
        let (handle, _output) = supervisor.start(&shell("exit 7")).unwrap();
        let watch = handle.watch();
        wait_until(Duration::from_secs(5), || watch.poll()).unwrap();

        match supervisor.stop(Some(handle), Duration::from_secs(1)) {
            StopOutcome::AlreadyExited(status) => assert_eq!(status.code(), Some(7)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_graceful_stop() {
        let supervisor = supervisor();
        let (handle, _output) = supervisor.start(&shell("sleep 30")).unwrap();
        let watch = handle.watch();
        assert!(watch.is_alive());

        let outcome = supervisor.stop(Some(handle), Duration::from_secs(3));
        assert!(matches!(outcome, StopOutcome::Terminated(_)), "{:?}", outcome);
        assert!(!watch.is_alive());
    }

    #[test]
    fn test_escalates_to_kill_when_term_is_ignored() {
        let supervisor = supervisor();
        let (handle, _output) = supervisor
            .start(&shell("trap '' TERM; while true; do sleep 0.1; done"))
            .unwrap();
        // 等待 trap 生效
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let outcome = supervisor.stop(Some(handle), Duration::from_millis(300));
        assert!(matches!(outcome, StopOutcome::Killed(_)), "{:?}", outcome);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_sweeps_by_name_when_kill_has_no_effect() {
        let (handle, _output) = supervisor()
            .start(&shell("trap '' TERM; while true; do sleep 0.1; done"))
            .unwrap();
        let watch = handle.watch();
        let pid = handle.pid();
        thread::sleep(Duration::from_millis(200));

        // 清理时才真正结束进程
        let mut reaper = MockProcessReaper::new();
        reaper
            .expect_sweep()
            .withf(|name| name.to_string() == "sh")
            .times(1)
            .returning(move |_| {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                Ok(1)
            });
        let mut supervisor = ProcessSupervisor::new("sh", Arc::new(reaper));
        supervisor.skip_kill = true;

        let outcome = supervisor.stop(Some(handle), Duration::from_millis(200));
        assert_eq!(outcome, StopOutcome::Swept { killed: 1 });
        assert!(outcome.exit_status().is_none());
        assert!(wait_until(Duration::from_secs(5), || watch.poll()).is_some());
    }
}
