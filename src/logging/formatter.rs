//! 控制台日志格式化

use crate::output::{LogLine, LogTag};
use chrono::{DateTime, Local};
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";

/// 简洁风格的事件格式化器：`[时间] 级别 组件 消息`
pub struct SupervisorFormatter {
    /// 是否启用彩色输出
    colored: bool,
}

impl SupervisorFormatter {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }
}

impl<S, N> FormatEvent<S, N> for SupervisorFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level();

        let now: DateTime<Local> = Local::now();
        let timestamp = now.format("%H:%M:%S");

        let (level_str, level_color) = match *level {
            tracing::Level::ERROR => ("ERR", "\x1b[31m"), // 红色
            tracing::Level::WARN => ("WRN", "\x1b[33m"),  // 黄色
            tracing::Level::INFO => ("   ", "\x1b[32m"),
            tracing::Level::DEBUG => ("DBG", "\x1b[36m"),
            tracing::Level::TRACE => ("TRC", "\x1b[37m"),
        };
        let (level_color, reset) = if self.colored { (level_color, RESET) } else { ("", "") };

        write!(writer, "[{}] {}{}{} ", timestamp, level_color, level_str, reset)?;

        // 只显示本 crate 的模块名
        let target = metadata.target();
        if let Some(component) = target.strip_prefix("scash_miner_rs::") {
            write!(writer, "{}: ", component)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// 分类标签对应的终端颜色
pub fn tag_color(tag: LogTag) -> Option<&'static str> {
    match tag {
        LogTag::Plain => None,
        LogTag::Important => Some("\x1b[1;34m"), // 蓝色加粗
        LogTag::Warning => Some("\x1b[1;31m"),   // 红色加粗
        LogTag::Success => Some("\x1b[1;32m"),   // 绿色加粗
        LogTag::Hashrate => Some("\x1b[1;35m"),  // 紫色加粗
    }
}

/// 渲染一条分类日志，格式与会话日志一致：`[HH:MM:SS] 内容`
pub fn render_line(line: &LogLine, colored: bool) -> String {
    let text = format!("[{}] {}", line.timestamp.format("%H:%M:%S"), line.text);
    match tag_color(line.tag) {
        Some(color) if colored => format!("{}{}{}", color, text, RESET),
        _ => text,
    }
}
