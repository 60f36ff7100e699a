//! 输出行分类

use super::LogTag;

/// 分类关键词表，按优先级顺序检查，第一个命中的类别生效
#[derive(Debug, Clone, Copy)]
pub struct ClassifierKeywords {
    pub warning: &'static [&'static str],
    pub success: &'static [&'static str],
    pub important: &'static [&'static str],
    /// 算力单位
    pub hashrate: &'static [&'static str],
}

pub const KEYWORDS: ClassifierKeywords = ClassifierKeywords {
    warning: &[
        "error",
        "failed",
        "rejected",
        "disconnected",
        "refused",
        "unreachable",
        "timed out",
    ],
    success: &["accepted", "connected", "initialized"],
    important: &[
        "connected",
        "disconnected",
        "difficulty",
        "hashrate",
        "hash rate",
        "accepted",
        "rejected",
        "cpu result",
        "job received",
        "shares",
        "pool",
        "algorithm",
        "error",
        "failed",
        "success",
    ],
    hashrate: &["h/s"],
};

impl ClassifierKeywords {
    pub fn classify(&self, line: &str) -> LogTag {
        let lower = line.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|keyword| lower.contains(keyword));

        if hit(self.warning) {
            LogTag::Warning
        } else if hit(self.success) {
            LogTag::Success
        } else if hit(self.important) {
            LogTag::Important
        } else if hit(self.hashrate) {
            LogTag::Hashrate
        } else {
            LogTag::Plain
        }
    }
}

impl Default for ClassifierKeywords {
    fn default() -> Self {
        KEYWORDS
    }
}

/// 使用默认关键词表分类
pub fn classify(line: &str) -> LogTag {
    KEYWORDS.classify(line)
}
