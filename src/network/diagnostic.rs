//! 启动前连通性检测失败时的诊断信息

use super::ReachabilityResult;
use crate::error::MinerError;

/// 阻止启动的诊断报告
#[derive(Debug, Clone)]
pub struct PreflightDiagnostic<'a> {
    result: &'a ReachabilityResult,
    pool: &'a str,
}

const REMEDIATION: [&str; 4] = [
    "1. ⭐ Enable a VPN before trying to mine again",
    "2. Check that the VPN connection is working",
    "3. Check whether a firewall blocks the connection",
    "4. Try another pool",
];

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅ ok"
    } else {
        "❌ failed"
    }
}

impl<'a> PreflightDiagnostic<'a> {
    pub fn new(result: &'a ReachabilityResult, pool: &'a str) -> Self {
        Self { result, pool }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("🔴 Cannot reach the mining pool: {}", self.pool),
            format!("DNS resolution: {}", mark(self.result.dns_ok)),
            format!("Ping test: {}", mark(self.result.ping_ok)),
            format!("TCP connection: {}", mark(self.result.tcp_ok)),
        ];

        if !self.result.error_messages.is_empty() {
            lines.push("❌ Error details:".to_string());
            lines.extend(self.result.error_messages.iter().map(|e| format!("  {}", e)));
        }

        lines.push("💡 Suggested fixes:".to_string());
        lines.extend(REMEDIATION.iter().map(|s| s.to_string()));
        lines
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }

    pub fn to_error(&self) -> MinerError {
        MinerError::PreflightUnreachable {
            pool: self.pool.to_string(),
            dns_ok: self.result.dns_ok,
            ping_ok: self.result.ping_ok,
            tcp_ok: self.result.tcp_ok,
            details: self.result.error_messages.join("; "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> ReachabilityResult {
        ReachabilityResult {
            host: "127.0.0.1".to_string(),
            port: 9,
            dns_ok: true,
            ping_ok: false,
            tcp_ok: false,
            ping_avg_ms: None,
            error_messages: vec![
                "Ping failed: host not responding to ICMP".to_string(),
                "TCP connection failed: 127.0.0.1:9 - connection refused".to_string(),
            ],
        }
    }

    #[test]
    fn test_diagnostic_breakdown() {
        let result = unreachable();
        let text = PreflightDiagnostic::new(&result, "stratum+tcp://127.0.0.1:9").render();

        assert!(text.contains("DNS resolution: ✅ ok"));
        assert!(text.contains("Ping test: ❌ failed"));
        assert!(text.contains("TCP connection: ❌ failed"));
        assert!(text.contains("connection refused"));
        assert!(text.contains("Enable a VPN"));
        assert!(text.contains("firewall"));
    }

    #[test]
    fn test_diagnostic_error() {
        let result = unreachable();
        match PreflightDiagnostic::new(&result, "stratum+tcp://127.0.0.1:9").to_error() {
            MinerError::PreflightUnreachable {
                pool,
                dns_ok,
                ping_ok,
                tcp_ok,
                details,
            } => {
                assert_eq!(pool, "stratum+tcp://127.0.0.1:9");
                assert!(dns_ok && !ping_ok && !tcp_ok);
                assert!(details.contains("; "));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
