//! Scash Miner RS - SRBMiner-MULTI 挖矿进程监督程序
//!
//! 把外部挖矿程序当作不透明的子进程管理，负责：
//! - 启动前检测矿池连通性（DNS、Ping、TCP）
//! - 启动挖矿进程并合并捕获其输出
//! - 按关键字分类输出并写入会话日志
//! - 根据会话日志推断矿池连接状态，给出一次性提示
//! - 在所有退出路径上可靠地结束挖矿进程
//!
//! ## 架构
//!
//! 所有并发都基于专用线程，不依赖异步运行时：
//! - 会话驱动线程：连通性检测、启动进程、看守进程退出
//! - 输出读取线程：子进程输出的唯一读取者
//! - 连接监测线程：周期性扫描会话日志
//!
//! 界面（或命令行前端）只与 [`SessionController`] 交互，
//! 并以固定节奏从 [`LogSink`] 批量取走分类后的输出。

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod network;
pub mod output;
pub mod process;
pub mod session;

pub use config::{Config, MiningConfig, PoolEndpoint, SupervisorConfig};
pub use error::{ConfigError, LaunchError, MinerError};
pub use monitor::ConnectionState;
pub use network::{ReachabilityProber, ReachabilityResult};
pub use output::{LogLine, LogSink, LogTag};
pub use process::StopOutcome;
pub use session::{MiningSession, SessionController, SessionState};

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "scash-miner-rs";
