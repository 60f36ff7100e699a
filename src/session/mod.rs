//! 挖矿会话控制器
//!
//! 对外提供启动、停止、重启和关闭四个操作，并维护会话状态机：
//!
//! ```text
//! Idle → PreflightChecking → Running → Stopping → Stopped
//!              │                 │
//!              └→ Failed         └→ Failed（意外退出）
//! ```
//!
//! 每次启动都会创建新的 [`SessionContext`]，后台线程只对自己所属的会话生效。
//! 控制器内部状态由一把锁保护，进程停止在锁外执行。

pub mod context;
pub mod worker;

use crate::config::{Config, MiningConfig, PoolEndpoint};
use crate::error::MinerError;
use crate::monitor::{ConnectionMonitor, ConnectionState, ConnectionStatus, IndicatorTable};
use crate::network::{PoolProbe, PreflightDiagnostic, ReachabilityProber};
use crate::output::{LogSink, OutputRouter, SessionLog};
use crate::process::{MinerCommand, ProcessHandle, ProcessReaper, ProcessSupervisor, StopOutcome, SystemReaper};
use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use context::SessionContext;
pub use worker::Worker;

/// 子进程存活检查间隔
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// 等待读取/监测线程结束的上限
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 等待会话驱动线程结束的上限，超时则分离
const DRIVER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// 子进程退出后等待输出读完的上限
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// 未启动
    Idle,
    /// 启动前连通性检测
    PreflightChecking,
    /// 运行中
    Running,
    /// 正在停止
    Stopping,
    /// 已停止
    Stopped,
    /// 失败（检测不通过或进程意外退出）
    Failed,
}

impl SessionState {
    /// 是否有会话正在进行，此时不允许再次启动
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::PreflightChecking | SessionState::Running | SessionState::Stopping
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::PreflightChecking => "preflight checking",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 当前挖矿运行的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSession {
    pub id: Uuid,
    /// 启动时的配置快照
    pub config: MiningConfig,
    pub pid: u32,
    pub started_at: DateTime<Local>,
    pub session_log: PathBuf,
}

struct Inner {
    config: Config,
    state: SessionState,
    history: Vec<SessionState>,
    ctx: Option<Arc<SessionContext>>,
    handle: Option<ProcessHandle>,
    session: Option<MiningSession>,
    workers: Vec<Worker>,
    driver: Option<Worker>,
    connection: ConnectionStatus,
    last_error: Option<MinerError>,
    last_exit: Option<ExitStatus>,
}

impl Inner {
    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state: {} -> {}", self.state, state);
            self.state = state;
            self.history.push(state);
        }
    }

    fn is_current(&self, ctx: &Arc<SessionContext>) -> bool {
        self.ctx.as_ref().is_some_and(|current| Arc::ptr_eq(current, ctx))
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    sink: LogSink,
    probe: Arc<dyn PoolProbe>,
    reaper: Arc<dyn ProcessReaper>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    fn transition(&self, inner: &mut Inner, state: SessionState) {
        inner.set_state(state);
        self.changed.notify_all();
    }

    fn supervisor(&self, config: &Config) -> ProcessSupervisor {
        ProcessSupervisor::new(config.supervisor.image_name(), Arc::clone(&self.reaper))
    }
}

/// 会话控制器，可在多个线程间克隆共享
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(config: Config) -> Self {
        let probe = Arc::new(ReachabilityProber::new(config.supervisor.probe.clone()));
        Self::with_components(config, probe, Arc::new(SystemReaper))
    }

    pub fn with_components(config: Config, probe: Arc<dyn PoolProbe>, reaper: Arc<dyn ProcessReaper>) -> Self {
        let inner = Inner {
            config,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            ctx: None,
            handle: None,
            session: None,
            workers: Vec::new(),
            driver: None,
            connection: ConnectionStatus::new(),
            last_error: None,
            last_exit: None,
        };

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                changed: Condvar::new(),
                sink: LogSink::new(),
                probe,
                reaper,
            }),
        }
    }

    /// 启动挖矿
    ///
    /// 校验失败和重复启动同步返回且没有副作用；连通性检测和进程启动在
    /// 后台线程中进行，结果通过 [`state`](Self::state) 和
    /// [`last_error`](Self::last_error) 观察。
    pub fn start(&self) -> Result<(), MinerError> {
        let mut inner = self.shared.lock();

        if inner.state.is_active() {
            warn!("Mining session already active ({})", inner.state);
            return Err(MinerError::AlreadyRunning);
        }

        let endpoint = match inner.config.validate() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Configuration rejected: {}", e);
                self.shared.sink.push(format!("❌ {}", e));
                return Err(e.into());
            }
        };

        let ctx = SessionContext::new(self.shared.sink.clone());
        let config = inner.config.clone();

        info!(session = %ctx.id(), "🚀 Starting mining session, pool {}", endpoint);
        inner.ctx = Some(Arc::clone(&ctx));
        inner.connection = ConnectionStatus::new();
        inner.last_error = None;
        self.shared.transition(&mut inner, SessionState::PreflightChecking);

        let shared = Arc::clone(&self.shared);
        let driver_ctx = Arc::clone(&ctx);
        match Worker::spawn("session-driver", move || drive(shared, driver_ctx, config, endpoint)) {
            Ok(driver) => {
                inner.driver = Some(driver);
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn session driver: {}", e);
                ctx.cancel();
                inner.ctx = None;
                let err = MinerError::System(format!("failed to spawn session thread: {}", e));
                inner.last_error = Some(err.clone());
                self.shared.transition(&mut inner, SessionState::Failed);
                Err(err)
            }
        }
    }

    /// 停止挖矿，没有活动会话时同样成功
    pub fn stop(&self) -> StopOutcome {
        let (handle, workers, driver, supervisor, grace) = {
            let mut inner = self.shared.lock();

            if let Some(ctx) = inner.ctx.take() {
                ctx.cancel();
            }
            let handle = inner.handle.take();
            let workers = std::mem::take(&mut inner.workers);
            let driver = inner.driver.take();

            if handle.is_none() && workers.is_empty() && !inner.state.is_active() {
                self.shared.transition(&mut inner, SessionState::Stopped);
                drop(inner);
                if let Some(driver) = driver {
                    driver.join_within(DRIVER_JOIN_TIMEOUT);
                }
                debug!("Stop requested with no active session");
                return StopOutcome::NoProcess;
            }

            info!("⏹️ Stopping mining session");
            self.shared.transition(&mut inner, SessionState::Stopping);
            let supervisor = self.shared.supervisor(&inner.config);
            let grace = inner.config.supervisor.grace_period();
            (handle, workers, driver, supervisor, grace)
        };

        self.shared.sink.push("Stopping miner...");
        let outcome = supervisor.stop(handle, grace);
        match outcome {
            StopOutcome::Killed(_) => self.shared.sink.push("⚠️ Miner process was force killed"),
            StopOutcome::Swept { killed } => self
                .shared
                .sink
                .push(format!("⚠️ Miner process did not exit, swept {} process(es)", killed)),
            _ => {}
        }

        for worker in workers {
            worker.join_within(WORKER_JOIN_TIMEOUT);
        }
        if let Some(driver) = driver {
            driver.join_within(DRIVER_JOIN_TIMEOUT);
        }

        let mut inner = self.shared.lock();
        if let Some(status) = outcome.exit_status() {
            inner.last_exit = Some(status);
        }
        inner.session = None;
        self.shared.transition(&mut inner, SessionState::Stopped);
        drop(inner);

        info!("✅ Mining stopped");
        self.shared.sink.push("✅ Mining stopped");
        outcome
    }

    /// 停止、等待后重新启动
    pub fn restart(&self) -> Result<(), MinerError> {
        info!("🔄 Restarting mining session");
        self.stop();
        let delay = self.shared.lock().config.supervisor.restart_delay();
        thread::sleep(delay);
        self.start()
    }

    /// 退出路径：停止后再按名称清理残留进程
    pub fn shutdown(&self) -> StopOutcome {
        let outcome = self.stop();
        let supervisor = self.shared.supervisor(&self.shared.lock().config);
        let swept = supervisor.sweep_strays();
        if swept > 0 {
            warn!("Swept {} stray miner process(es) on shutdown", swept);
        }
        outcome
    }

    /// 替换配置，只能在没有活动会话时进行
    pub fn set_config(&self, config: Config) -> Result<(), MinerError> {
        let mut inner = self.shared.lock();
        if inner.state.is_active() {
            return Err(MinerError::AlreadyRunning);
        }
        inner.config = config;
        Ok(())
    }

    pub fn config(&self) -> Config {
        self.shared.lock().config.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// 状态变化历史，从 `Idle` 开始
    pub fn state_history(&self) -> Vec<SessionState> {
        self.shared.lock().history.clone()
    }

    /// 等待状态满足条件，超时返回 false
    pub fn wait_for<F>(&self, mut pred: F, timeout: Duration) -> bool
    where
        F: FnMut(SessionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        while !pred(inner.state) {
            if self.shared.changed.wait_until(&mut inner, deadline).timed_out() {
                return pred(inner.state);
            }
        }
        true
    }

    pub fn last_error(&self) -> Option<MinerError> {
        self.shared.lock().last_error.clone()
    }

    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.shared.lock().last_exit
    }

    pub fn current_session(&self) -> Option<MiningSession> {
        self.shared.lock().session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection.get()
    }

    /// 界面输出队列
    pub fn sink(&self) -> &LogSink {
        &self.shared.sink
    }
}

/// 会话驱动线程：检测、启动、然后看守子进程
fn drive(shared: Arc<Shared>, ctx: Arc<SessionContext>, config: Config, endpoint: PoolEndpoint) {
    let sink = &shared.sink;

    let result = shared.probe.probe(&endpoint, sink);
    if !ctx.is_active() {
        debug!(session = %ctx.id(), "Session cancelled during preflight");
        return;
    }

    if !result.reachable() {
        let diagnostic = PreflightDiagnostic::new(&result, &config.mining.pool_address);
        for line in diagnostic.lines() {
            sink.push(line);
        }
        let err = diagnostic.to_error();
        error!("{}", err);

        let mut inner = shared.lock();
        if inner.is_current(&ctx) {
            ctx.cancel();
            inner.ctx = None;
            inner.last_error = Some(err);
            shared.transition(&mut inner, SessionState::Failed);
        }
        return;
    }

    sink.push("✅ Pool reachable, starting miner...");

    let log_path = config.supervisor.session_log.clone();
    let (mut log, offset) = match SessionLog::open(&log_path).and_then(|mut log| {
        let offset = log.begin()?;
        Ok((log, offset))
    }) {
        Ok((log, offset)) => (Some(log), Some(offset)),
        Err(e) => {
            warn!("Failed to open session log {}: {}", log_path.display(), e);
            sink.push(format!("⚠️ Session log unavailable, output is not saved: {}", e));
            (None, None)
        }
    };

    let supervisor = shared.supervisor(&config);
    let spec = MinerCommand::build(&config.mining, &config.supervisor);
    debug!("Miner command: {}", spec);

    let mut inner = shared.lock();
    if !ctx.is_active() || !inner.is_current(&ctx) {
        if let Some(log) = log.as_mut() {
            let _ = log.end();
        }
        return;
    }

    let (handle, output) = match supervisor.start(&spec) {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start miner: {}", e);
            sink.push(format!("❌ Failed to start miner: {}", e));
            if let Some(log) = log.as_mut() {
                let _ = log.end();
            }
            ctx.cancel();
            inner.ctx = None;
            inner.last_error = Some(e.into());
            shared.transition(&mut inner, SessionState::Idle);
            return;
        }
    };

    let pid = handle.pid();
    let watch = handle.watch();
    sink.push(format!("⛏️ Miner started, PID: {}", pid));

    inner.session = Some(MiningSession {
        id: ctx.id(),
        config: config.mining.clone(),
        pid,
        started_at: Local::now(),
        session_log: log_path.clone(),
    });
    inner.handle = Some(handle);

    // 读取线程结束时断开通道，用于在报告退出前等待输出读完
    let (drained_tx, drained_rx) = mpsc::channel::<()>();
    let router = OutputRouter::new(Arc::clone(&ctx), log);
    match Worker::spawn("output-reader", move || {
        let _drained = drained_tx;
        router.run(output);
    }) {
        Ok(worker) => inner.workers.push(worker),
        Err(e) => error!("Failed to spawn output reader: {}", e),
    }

    if let Some(offset) = offset {
        let monitor = ConnectionMonitor::new(
            Arc::clone(&ctx),
            log_path,
            offset,
            config.supervisor.monitor_interval(),
            inner.connection.clone(),
            watch.clone(),
            IndicatorTable::v1(),
        );
        match Worker::spawn("connection-monitor", move || {
            monitor.run();
        }) {
            Ok(worker) => inner.workers.push(worker),
            Err(e) => error!("Failed to spawn connection monitor: {}", e),
        }
    }

    shared.transition(&mut inner, SessionState::Running);
    drop(inner);

    let status = loop {
        if let Some(status) = watch.poll() {
            break status;
        }
        if !ctx.wait_timeout(WATCH_INTERVAL) {
            // 停止流程接管子进程
            return;
        }
    };

    if !ctx.is_active() {
        return;
    }

    let _ = drained_rx.recv_timeout(OUTPUT_DRAIN_TIMEOUT);

    let (handle, workers) = {
        let mut inner = shared.lock();
        if !ctx.is_active() || !inner.is_current(&ctx) {
            return;
        }
        ctx.cancel();
        inner.ctx = None;
        inner.session = None;
        inner.last_exit = Some(status);
        inner.last_error = Some(MinerError::UnexpectedExit { code: status.code() });
        shared.transition(&mut inner, SessionState::Failed);
        (inner.handle.take(), std::mem::take(&mut inner.workers))
    };

    let err = MinerError::UnexpectedExit { code: status.code() };
    error!("{}", err);
    sink.push(format!("❌ {}", err));

    supervisor.stop(handle, config.supervisor.grace_period());
    for worker in workers {
        worker.join_within(WORKER_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MockPoolProbe, ReachabilityResult};
    use crate::process::reaper::MockProcessReaper;

    fn probe_result(endpoint: &PoolEndpoint, reachable: bool) -> ReachabilityResult {
        ReachabilityResult {
            host: endpoint.host.clone(),
            port: endpoint.port,
            dns_ok: true,
            ping_ok: false,
            tcp_ok: reachable,
            ping_avg_ms: None,
            error_messages: if reachable {
                Vec::new()
            } else {
                vec!["TCP connection failed".to_string()]
            },
        }
    }

    fn mock_probe(reachable: bool, delay: Duration) -> Arc<MockPoolProbe> {
        let mut probe = MockPoolProbe::new();
        probe.expect_probe().returning(move |endpoint, _sink| {
            thread::sleep(delay);
            probe_result(endpoint, reachable)
        });
        Arc::new(probe)
    }

    fn quiet_reaper() -> Arc<MockProcessReaper> {
        let mut reaper = MockProcessReaper::new();
        reaper.expect_sweep().returning(|_| Ok(0));
        Arc::new(reaper)
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.mining.wallet_address = "scash1qtest".to_string();
        config.mining.pool_address = "stratum+tcp://127.0.0.1:9601".to_string();
        config.supervisor.executable = dir.join("no-such-miner");
        config.supervisor.session_log = dir.join("mining_log.txt");
        config.supervisor.restart_delay_ms = 10;
        config
    }

    #[test]
    fn test_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            SessionController::with_components(test_config(dir.path()), mock_probe(true, Duration::ZERO), quiet_reaper());

        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.state_history(), vec![SessionState::Idle]);
        assert!(controller.last_error().is_none());
        assert!(controller.current_session().is_none());
        assert_eq!(controller.connection_state(), ConnectionState::Pending);
    }

    #[test]
    fn test_invalid_config_is_rejected_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.mining.wallet_address = "btc1qwrong".to_string();

        let mut probe = MockPoolProbe::new();
        probe.expect_probe().never();
        let controller = SessionController::with_components(config, Arc::new(probe), quiet_reaper());

        assert!(matches!(controller.start(), Err(MinerError::Config(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.state_history(), vec![SessionState::Idle]);
        assert!(!dir.path().join("mining_log.txt").exists());
    }

    #[test]
    fn test_unreachable_pool_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            SessionController::with_components(test_config(dir.path()), mock_probe(false, Duration::ZERO), quiet_reaper());

        controller.start().unwrap();
        assert!(controller.wait_for(|s| s == SessionState::Failed, Duration::from_secs(5)));

        assert_eq!(
            controller.state_history(),
            vec![SessionState::Idle, SessionState::PreflightChecking, SessionState::Failed]
        );
        assert!(matches!(
            controller.last_error(),
            Some(MinerError::PreflightUnreachable { tcp_ok: false, .. })
        ));
        assert!(controller.current_session().is_none());
        assert!(!dir.path().join("mining_log.txt").exists());

        let lines = controller.sink().drain();
        assert!(lines.iter().any(|l| l.text.contains("Cannot reach the mining pool")));
    }

    #[test]
    fn test_missing_executable_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            SessionController::with_components(test_config(dir.path()), mock_probe(true, Duration::ZERO), quiet_reaper());

        controller.start().unwrap();
        assert!(controller.wait_for(|s| s == SessionState::Idle, Duration::from_secs(5)));
        assert!(matches!(controller.last_error(), Some(MinerError::Launch(_))));
        assert!(controller.current_session().is_none());

        // 失败后允许再次启动
        controller.start().unwrap();
        assert!(controller.wait_for(|s| s == SessionState::Idle, Duration::from_secs(5)));
    }

    #[test]
    fn test_second_start_is_rejected_while_preflight_runs() {
        let dir = tempfile::tempdir().unwrap();
        let controller = SessionController::with_components(
            test_config(dir.path()),
            mock_probe(true, Duration::from_millis(300)),
            quiet_reaper(),
        );

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(MinerError::AlreadyRunning)));
        assert!(matches!(
            controller.set_config(test_config(dir.path())),
            Err(MinerError::AlreadyRunning)
        ));

        assert_eq!(controller.stop(), StopOutcome::NoProcess);
        assert_eq!(controller.state(), SessionState::Stopped);

        // 被取消的检测结束后不会再启动进程
        thread::sleep(Duration::from_millis(500));
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn test_stop_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            SessionController::with_components(test_config(dir.path()), mock_probe(true, Duration::ZERO), quiet_reaper());

        assert_eq!(controller.stop(), StopOutcome::NoProcess);
        assert_eq!(controller.stop(), StopOutcome::NoProcess);
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(controller.state_history(), vec![SessionState::Idle, SessionState::Stopped]);
    }

    #[test]
    fn test_shutdown_sweeps_by_image_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut reaper = MockProcessReaper::new();
        reaper
            .expect_sweep()
            .withf(|name| name.to_string() == "no-such-miner")
            .times(1)
            .returning(|_| Ok(0));

        let controller =
            SessionController::with_components(test_config(dir.path()), mock_probe(true, Duration::ZERO), Arc::new(reaper));
        assert_eq!(controller.shutdown(), StopOutcome::NoProcess);
    }

    #[test]
    fn test_state_is_active() {
        assert!(SessionState::PreflightChecking.is_active());
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Stopped.is_active());
        assert!(!SessionState::Failed.is_active());
    }
}
