use crate::error::ConfigError;
use clap::Parser;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::{Host, Url};

/// 社区矿池地址
pub const COMMUNITY_POOL: &str = "stratum+tcp://scash.work:9601";

/// 矿池地址要求的协议前缀
pub const POOL_SCHEME_PREFIX: &str = "stratum+tcp://";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path (.toml, anything else is read as JSON)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Only run the pool reachability check and exit
    #[arg(long)]
    pub check: bool,

    /// Write the effective configuration back to the config file and exit
    #[arg(long)]
    pub save: bool,
}

/// 完整配置：顶层为挖矿参数，`[supervisor]` 为运行参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// 挖矿参数，一次挖矿运行期间保持不变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub wallet_address: String,
    pub worker_name: String,
    #[serde(deserialize_with = "lenient_u32")]
    pub cpu_threads: u32,
    pub pool_address: String,
    pub use_wallet_worker_format: bool,
    /// 重连间隔（秒）
    #[serde(deserialize_with = "lenient_u32")]
    pub retry_time: u32,
    pub send_stales: bool,
    /// 只读字段：存在时读取，保存时从不写回
    #[serde(skip_serializing)]
    pub use_tls: Option<bool>,
    #[serde(skip_serializing)]
    pub use_keepalive: Option<bool>,
}

/// 运行参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 挖矿程序路径
    pub executable: PathBuf,
    pub algorithm: String,
    /// 会话日志文件（追加写入）
    pub session_log: PathBuf,
    /// 钱包地址前缀
    pub wallet_prefix: String,
    /// 优雅停止的等待时间
    pub grace_period_ms: u64,
    /// 连接监测间隔
    pub monitor_interval_ms: u64,
    /// 重启前的等待时间
    pub restart_delay_ms: u64,
    pub probe: ProbeSettings,
}

/// 连通性检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub dns_timeout_ms: u64,
    /// Ping次数，0 表示跳过 ICMP 检测
    pub ping_count: u32,
    pub ping_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
}

/// 矿池地址解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            wallet_address: "scash1qtvj3eryz8p46e9nu7zzn7yfg49j7lkns4t2698".to_string(),
            worker_name: "x".to_string(),
            cpu_threads: num_cpus::get().max(1) as u32,
            pool_address: COMMUNITY_POOL.to_string(),
            use_wallet_worker_format: true,
            retry_time: 30,
            send_stales: false,
            use_tls: None,
            use_keepalive: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let executable = if cfg!(windows) { "SRBMiner-MULTI.exe" } else { "SRBMiner-MULTI" };
        Self {
            executable: PathBuf::from(executable),
            algorithm: "randomscash".to_string(),
            session_log: PathBuf::from("mining_log.txt"),
            wallet_prefix: "scash".to_string(),
            grace_period_ms: 3000,
            monitor_interval_ms: 5000,
            restart_delay_ms: 1000,
            probe: ProbeSettings::default(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 5000,
            ping_count: 3,
            ping_timeout_ms: 10_000,
            tcp_timeout_ms: 5000,
        }
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// 用于按进程名清理的映像名
    pub fn image_name(&self) -> String {
        self.executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.to_string_lossy().into_owned())
    }
}

impl ProbeSettings {
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }
}

impl PoolEndpoint {
    /// 未指定端口时使用的默认端口
    pub const DEFAULT_PORT: u16 = 4444;

    /// 解析 `stratum+tcp://host[:port]`
    pub fn parse(pool_address: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPoolUrl {
            url: pool_address.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = pool_address.trim();
        let rest = trimmed
            .strip_prefix(POOL_SCHEME_PREFIX)
            .ok_or_else(|| invalid("scheme must be stratum+tcp://"))?;

        // url 对未知协议不解析端口，统一换成 tcp:// 再解析
        let url = Url::parse(&format!("tcp://{}", rest)).map_err(|e| invalid(&e.to_string()))?;

        // IPv6 地址不带方括号，便于直接用于解析和 ping
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host")),
        };

        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(invalid("unexpected path after host:port"));
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(Self::DEFAULT_PORT),
        })
    }
}

impl std::fmt::Display for PoolEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl MiningConfig {
    /// 校验配置，失败时不产生任何副作用
    pub fn validate(&self, wallet_prefix: &str) -> Result<PoolEndpoint, ConfigError> {
        if !self.wallet_address.trim().starts_with(wallet_prefix) {
            return Err(ConfigError::InvalidWallet {
                prefix: wallet_prefix.to_string(),
            });
        }

        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorker);
        }

        if self.cpu_threads == 0 {
            return Err(ConfigError::InvalidThreads {
                value: self.cpu_threads.to_string(),
            });
        }

        let endpoint = PoolEndpoint::parse(&self.pool_address)?;

        let cores = num_cpus::get();
        if self.cpu_threads as usize > cores {
            warn!(
                "cpu_threads ({}) exceeds the number of logical CPUs ({})",
                self.cpu_threads, cores
            );
        }

        Ok(endpoint)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let parse_error = |error: String| ConfigError::Parse {
            path: path.display().to_string(),
            error,
        };

        if is_toml(path) {
            toml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        } else {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
    }

    /// 加载配置；文件不存在或无法解析时写入并返回默认配置
    pub fn load_or_create(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    warn!("{}, falling back to defaults", e);
                }
                let config = Self::default();
                match config.save(path) {
                    Ok(()) => info!("Created default config file: {}", path.display()),
                    Err(e) => warn!("{}", e),
                }
                config
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |error: String| ConfigError::Write {
            path: path.display().to_string(),
            error,
        };

        let content = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|e| write_error(e.to_string()))
    }

    pub fn validate(&self) -> Result<PoolEndpoint, ConfigError> {
        self.mining.validate(&self.supervisor.wallet_prefix)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}

/// 兼容旧版配置中以字符串保存的数字
fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => u32::try_from(n)
            .map_err(|_| D::Error::custom(format!("{} is out of range", n))),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| D::Error::custom(format!("'{}' is not a valid count", s))),
    }
}
