//! 挖矿程序命令行构造
//!
//! 参数拼写是与 SRBMiner-MULTI 之间的外部约定，必须逐字节保持。

use crate::config::{MiningConfig, SupervisorConfig};
use std::fmt;
use std::path::PathBuf;

/// 待启动的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// 矿池身份：钱包与密码参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerIdentity {
    pub wallet: String,
    pub password: String,
}

impl MinerIdentity {
    /// `wallet.worker` 格式（推荐）或钱包与矿工名分开传递的传统格式
    pub fn from_config(config: &MiningConfig) -> Self {
        let wallet = config.wallet_address.trim();
        let worker = config.worker_name.trim();

        if config.use_wallet_worker_format && !worker.is_empty() {
            Self {
                wallet: format!("{}.{}", wallet, worker),
                password: "x".to_string(),
            }
        } else {
            Self {
                wallet: wallet.to_string(),
                password: if worker.is_empty() { "x".to_string() } else { worker.to_string() },
            }
        }
    }
}

pub struct MinerCommand;

impl MinerCommand {
    pub fn build(config: &MiningConfig, supervisor: &SupervisorConfig) -> CommandSpec {
        let identity = MinerIdentity::from_config(config);

        let args = vec![
            "--algorithm".to_string(),
            supervisor.algorithm.clone(),
            "--pool".to_string(),
            config.pool_address.trim().to_string(),
            "--wallet".to_string(),
            identity.wallet,
            "--password".to_string(),
            identity.password,
            "--cpu-threads".to_string(),
            config.cpu_threads.to_string(),
            "--randomx-use-largepages".to_string(),
            "--send-stales".to_string(),
            config.send_stales.to_string(),
            "--retry-time".to_string(),
            config.retry_time.to_string(),
            "--gpu-off".to_string(),
        ];

        CommandSpec::new(supervisor.executable.clone(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mining_config() -> MiningConfig {
        MiningConfig {
            wallet_address: "scash1qwallet".to_string(),
            worker_name: "rig01".to_string(),
            cpu_threads: 8,
            pool_address: "stratum+tcp://scash.work:9601".to_string(),
            use_wallet_worker_format: true,
            retry_time: 30,
            send_stales: false,
            use_tls: Some(true),
            use_keepalive: Some(true),
        }
    }

    #[test]
    fn test_command_line_is_exact() {
        let supervisor = SupervisorConfig {
            executable: PathBuf::from("SRBMiner-MULTI.exe"),
            ..SupervisorConfig::default()
        };
        let spec = MinerCommand::build(&mining_config(), &supervisor);

        assert_eq!(
            spec.to_string(),
            "SRBMiner-MULTI.exe --algorithm randomscash --pool stratum+tcp://scash.work:9601 \
             --wallet scash1qwallet.rig01 --password x --cpu-threads 8 --randomx-use-largepages \
             --send-stales false --retry-time 30 --gpu-off"
        );
        // TLS 与 keepalive 不会出现在命令行中
        assert!(!spec.args.iter().any(|arg| arg.contains("tls") || arg.contains("keepalive")));
    }

    #[test]
    fn test_identity_formats() {
        let mut config = mining_config();
        assert_eq!(
            MinerIdentity::from_config(&config),
            MinerIdentity {
                wallet: "scash1qwallet.rig01".to_string(),
                password: "x".to_string()
            }
        );

        config.use_wallet_worker_format = false;
        assert_eq!(
            MinerIdentity::from_config(&config),
            MinerIdentity {
                wallet: "scash1qwallet".to_string(),
                password: "rig01".to_string()
            }
        );

        config.worker_name = "  ".to_string();
        assert_eq!(MinerIdentity::from_config(&config).password, "x");

        config.use_wallet_worker_format = true;
        assert_eq!(MinerIdentity::from_config(&config).wallet, "scash1qwallet");
    }

    #[test]
    fn test_send_stales_flag() {
        let mut config = mining_config();
        config.send_stales = true;
        config.retry_time = 10;
        let spec = MinerCommand::build(&config, &SupervisorConfig::default());

        let stales = spec.args.iter().position(|a| a == "--send-stales").unwrap();
        assert_eq!(spec.args[stales + 1], "true");
        let retry = spec.args.iter().position(|a| a == "--retry-time").unwrap();
        assert_eq!(spec.args[retry + 1], "10");
    }
}
