use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MinerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool unreachable: {pool} (dns: {dns_ok}, ping: {ping_ok}, tcp: {tcp_ok}): {details}")]
    PreflightUnreachable {
        pool: String,
        dns_ok: bool,
        ping_ok: bool,
        tcp_ok: bool,
        details: String,
    },

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Miner process exited unexpectedly, exit code: {}", display_code(.code))]
    UnexpectedExit { code: Option<i32> },

    #[error("A mining session is already active")]
    AlreadyRunning,

    #[error("System error: {0}")]
    System(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid wallet address: must start with '{prefix}'")]
    InvalidWallet { prefix: String },

    #[error("Worker name must not be empty")]
    EmptyWorker,

    #[error("Invalid thread count: {value}, must be greater than 0")]
    InvalidThreads { value: String },

    #[error("Invalid pool URL: {url}, reason: {reason}")]
    InvalidPoolUrl { url: String, reason: String },

    #[error("Failed to read config file: {path}, error: {error}")]
    Read { path: String, error: String },

    #[error("Parse error: {path}, error: {error}")]
    Parse { path: String, error: String },

    #[error("Failed to write config file: {path}, error: {error}")]
    Write { path: String, error: String },
}

#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    #[error("Miner executable not found: {program}")]
    NotFound { program: String },

    #[error("Failed to spawn {program}: {error}")]
    Spawn { program: String, error: String },

    #[error("Failed to create output pipe: {error}")]
    Pipe { error: String },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}
