//! 连接状态指示短语表
//!
//! 这些短语依赖挖矿程序的日志措辞，升级挖矿程序时只需要更新这里，
//! 控制流不需要改动。所有短语均为小写。

/// 指示短语表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorTable {
    /// 表版本
    pub version: u32,
    /// 真正开始挖矿的迹象
    pub established: &'static [&'static str],
    /// 开发费矿池连接问题（不影响用户收益）
    pub devfee: &'static [&'static str],
    /// 一般连接错误
    pub connection_error: &'static [&'static str],
}

impl IndicatorTable {
    /// SRBMiner-MULTI 2.5.x 的日志措辞
    pub const fn v1() -> Self {
        Self {
            version: 1,
            established: &[
                "job received",
                "new job",
                "difficulty set to",
                "share accepted",
                "accepted share",
                "result accepted",
                "cpu result",
                "hash rate",
                "hashrate",
                "h/s",
                "randomscash algorithm",
                "mining started",
                "shares: ",
                "接受任务",
                "开始挖矿",
                "哈希率",
            ],
            devfee: &[
                "couldn't get active devfee pools",
                "devfee pools - check your internet",
                "devfee pools - check your firewall",
                "devfee pool connection failed",
                "devfee pool error",
                "devfee network error",
                "devfee connection failed",
                "devfee - check your internet",
                "devfee - check your firewall",
                "couldn't connect to devfee",
                "devfee pools unreachable",
                "devfee timeout",
            ],
            connection_error: &[
                "connection failed",
                "connection refused",
                "connection timeout",
                "connection timed out",
                "connection reset",
                "connection lost",
                "failed to connect",
                "unable to connect",
                "cannot connect to",
                "connect error",
                "network unreachable",
                "network is unreachable",
                "host unreachable",
                "no route to host",
                "socket error",
                "getaddrinfo failed",
                "name resolution failed",
                "dns lookup failed",
                "pool connection error",
                "pool not reachable",
                "error: failed to",
                "连接失败",
                "连接被拒绝",
                "连接超时",
                "网络不可达",
            ],
        }
    }

    pub fn is_established(&self, lower: &str) -> bool {
        contains_any(lower, self.established)
    }

    pub fn is_devfee_error(&self, lower: &str) -> bool {
        contains_any(lower, self.devfee)
    }

    pub fn is_connection_error(&self, lower: &str) -> bool {
        contains_any(lower, self.connection_error)
    }
}

impl Default for IndicatorTable {
    fn default() -> Self {
        Self::v1()
    }
}

fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| lower.contains(phrase))
}
