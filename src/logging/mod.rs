//! 诊断日志系统
//!
//! 监督程序自身的运行日志走 tracing；挖矿程序的输出由 [`crate::output`]
//! 单独分类并写入会话日志，不经过这里。

pub mod formatter;

use crate::error::MinerError;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: String,
    /// 日志文件路径
    pub file_path: Option<PathBuf>,
    /// 是否启用彩色输出
    pub colored: bool,
    /// 日志轮转配置
    pub rotation: LogRotation,
}

/// 日志轮转配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// 不轮转
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    Daily,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            colored: true,
            rotation: LogRotation::Never,
        }
    }
}

/// 解析日志级别，无法识别时回退到 INFO
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// 初始化日志系统
///
/// 启用文件输出时返回的 guard 必须在程序退出前一直持有，否则缓冲的日志会丢失。
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, MinerError> {
    let env_filter = EnvFilter::from_default_env().add_directive(parse_level(&config.level).into());

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colored)
        .event_format(formatter::SupervisorFormatter::new(config.colored))
        .boxed();

    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);

    let Some(file_path) = config.file_path else {
        registry
            .try_init()
            .map_err(|e| MinerError::System(format!("Failed to install logger: {}", e)))?;
        return Ok(None);
    };

    let directory = file_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scash-miner.log");

    let (writer, guard) = match config.rotation {
        LogRotation::Never => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .map_err(|e| MinerError::System(format!("Failed to open log file: {}", e)))?;
            non_blocking(file)
        }
        LogRotation::Hourly => non_blocking(rolling::hourly(directory, file_name)),
        LogRotation::Daily => non_blocking(rolling::daily(directory, file_name)),
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .json();

    registry
        .with(file_layer)
        .try_init()
        .map_err(|e| MinerError::System(format!("Failed to install logger: {}", e)))?;

    Ok(Some(guard))
}
