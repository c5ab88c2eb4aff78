//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{FieldPhase, SessionView, ViewField};

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 `info`（详细模式下本 crate 为 `debug`）。
/// 使用 `try_init`，重复调用不会出错。
///
/// # 参数
/// - `verbose`: 是否显示详细日志
pub fn init(verbose: bool) {
    let default_directive = if verbose { "ctrl_learn=debug,info" } else { "info" };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 代码提交编排");
    info!(
        "🐍 解释器: {} {}",
        if config.launcher.is_empty() {
            config.interpreter.clone()
        } else {
            format!("{} {}", config.launcher.join(" "), config.interpreter)
        },
        config.interpreter_args.join(" ")
    );
    info!(
        "⏱️ 执行超时: {} ms，输出上限: {} 字节",
        config.sandbox_timeout_ms, config.max_output_bytes
    );
    info!("🤖 分析模型: {}", config.llm_model_name);
    info!("{}", "=".repeat(60));
}

/// 打印视图中各字段的最终状态
///
/// # 参数
/// - `view`: 会话视图
pub fn log_view_summary(view: &SessionView) {
    info!("\n{}", "─".repeat(60));
    info!("📊 处理结果 (revision {})", view.revision);
    for field in ViewField::ALL {
        let mark = match view.phase(field) {
            FieldPhase::Ready => "✅",
            FieldPhase::Failed => "❌",
            FieldPhase::Loading => "⏳",
            FieldPhase::Idle => "➖",
        };
        info!("{} {:?}: {:?}", mark, field, view.phase(field));
    }
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("你好世界", 2), "你好...");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
