use anyhow::{bail, Context, Result};
use clap::Parser;
use scash_miner_rs::config::{Args, Config};
use scash_miner_rs::logging::formatter::render_line;
use scash_miner_rs::logging::{init_logging, LogConfig, LogRotation};
use scash_miner_rs::network::{PoolProbe, PreflightDiagnostic, ReachabilityProber};
use scash_miner_rs::{LogSink, MinerError, SessionController, SessionState, NAME, VERSION};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// 输出队列的刷新间隔（约 20 Hz）
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// 交互命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserCommand {
    Start,
    Stop,
    Restart,
    Status,
    Quit,
}

impl UserCommand {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "s" | "start" => Some(Self::Start),
            "t" | "stop" => Some(Self::Stop),
            "r" | "restart" => Some(Self::Restart),
            "i" | "status" => Some(Self::Status),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let colored = !args.no_color;

    let level = if args.debug { "debug".to_string() } else { args.log_level.clone() };
    let _guard = init_logging(LogConfig {
        level,
        file_path: args.log_file.clone(),
        colored,
        rotation: LogRotation::Never,
    })
    .context("Failed to initialize logging")?;

    info!("🚀 Starting {} v{}", NAME, VERSION);

    let config = Config::load_or_create(&args.config);
    info!("📋 Configuration loaded from: {}", args.config.display());

    if args.save {
        config
            .save(&args.config)
            .with_context(|| format!("Failed to save {}", args.config.display()))?;
        info!("💾 Configuration written to {}", args.config.display());
        return Ok(());
    }

    if args.check {
        return check_pool(&config, colored);
    }

    run_interactive(config, colored)
}

/// 仅做连通性检测
fn check_pool(config: &Config, colored: bool) -> Result<()> {
    let endpoint = config.validate().context("Invalid configuration")?;
    let sink = LogSink::new();
    let result = ReachabilityProber::new(config.supervisor.probe.clone()).probe(&endpoint, &sink);
    print_lines(&sink, colored);

    if !result.reachable() {
        let diagnostic = PreflightDiagnostic::new(&result, &config.mining.pool_address);
        println!("{}", diagnostic.render());
        bail!(diagnostic.to_error());
    }
    Ok(())
}

fn run_interactive(config: Config, colored: bool) -> Result<()> {
    let controller = SessionController::new(config);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let commands = spawn_command_reader()?;
    let restarting = Arc::new(AtomicBool::new(false));

    info!("Commands: [s]tart, s[t]op, [r]estart, status [i], [q]uit");
    controller.start().context("Failed to start mining")?;

    loop {
        print_lines(controller.sink(), colored);

        if interrupted.load(Ordering::SeqCst) {
            info!("🛑 Received interrupt signal");
            break;
        }

        match commands.try_recv() {
            Ok(UserCommand::Start) => {
                if let Err(e) = controller.start() {
                    warn!("Cannot start: {}", e);
                }
            }
            Ok(UserCommand::Stop) => {
                controller.stop();
            }
            Ok(UserCommand::Restart) => {
                if restarting.swap(true, Ordering::SeqCst) {
                    warn!("Restart already in progress");
                } else {
                    let controller = controller.clone();
                    let restarting = restarting.clone();
                    thread::Builder::new()
                        .name("restart".to_string())
                        .spawn(move || {
                            if let Err(e) = controller.restart() {
                                error!("Restart failed: {}", e);
                            }
                            restarting.store(false, Ordering::SeqCst);
                        })
                        .context("Failed to spawn restart thread")?;
                }
            }
            Ok(UserCommand::Status) => print_status(&controller),
            Ok(UserCommand::Quit) => {
                info!("👋 Quit requested");
                break;
            }
            Err(_) => {}
        }

        thread::sleep(DRAIN_INTERVAL);
    }

    // shutdown 会把状态置为 Stopped，失败信息必须先取出
    let failure = session_failure(&controller);
    controller.shutdown();
    print_lines(controller.sink(), colored);

    session_result(failure)
}

fn session_failure(controller: &SessionController) -> Option<MinerError> {
    if controller.state() == SessionState::Failed {
        controller.last_error()
    } else {
        None
    }
}

/// 会话以失败告终时返回错误，进程以非零码退出
fn session_result(failure: Option<MinerError>) -> Result<()> {
    match failure {
        Some(e) => Err(e).context("Mining session failed"),
        None => {
            info!("👋 Mining stopped gracefully");
            Ok(())
        }
    }
}

/// 从标准输入读取交互命令；标准输入关闭后线程退出
fn spawn_command_reader() -> Result<mpsc::Receiver<UserCommand>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match UserCommand::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
        })
        .context("Failed to spawn command reader")?;
    Ok(rx)
}

fn print_lines(sink: &LogSink, colored: bool) {
    for line in sink.drain() {
        println!("{}", render_line(&line, colored));
    }
}

fn print_status(controller: &SessionController) {
    info!("State: {}", controller.state());
    info!("Connection: {:?}", controller.connection_state());
    if let Some(session) = controller.current_session() {
        info!(
            "Session {} PID {} since {}",
            session.id,
            session.pid,
            session.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(e) = controller.last_error() {
        info!("Last error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_failed_session_exits_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let closed_port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::default();
        config.mining.wallet_address = "scash1qexitcode".to_string();
        config.mining.worker_name = "rig01".to_string();
        config.mining.pool_address = format!("stratum+tcp://127.0.0.1:{}", closed_port);
        config.supervisor.executable = dir.path().join("SRBMiner-MULTI");
        config.supervisor.session_log = dir.path().join("mining_log.txt");
        config.supervisor.probe.ping_count = 0;

        let controller = SessionController::new(config);
        controller.start().unwrap();
        assert!(controller.wait_for(|s| s == SessionState::Failed, Duration::from_secs(10)));

        let failure = session_failure(&controller);
        controller.shutdown();
        assert_eq!(controller.state(), SessionState::Stopped);

        let err = session_result(failure).unwrap_err();
        assert!(err.to_string().contains("Mining session failed"));
        assert!(matches!(
            err.downcast_ref::<MinerError>(),
            Some(MinerError::PreflightUnreachable { .. })
        ));
    }

    #[test]
    fn test_clean_stop_exits_ok() {
        assert!(session_result(None).is_ok());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(UserCommand::parse("s"), Some(UserCommand::Start));
        assert_eq!(UserCommand::parse(" STOP "), Some(UserCommand::Stop));
        assert_eq!(UserCommand::parse("r"), Some(UserCommand::Restart));
        assert_eq!(UserCommand::parse("q"), Some(UserCommand::Quit));
        assert_eq!(UserCommand::parse("exit"), Some(UserCommand::Quit));
        assert_eq!(UserCommand::parse("mine faster"), None);
    }
}
