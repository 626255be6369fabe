//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 安装 `tracing` fmt 订阅者
///
/// 设置了 `RUST_LOG` 时以其为准，否则使用 `level`（如 `"info"`、`"dashan_link=trace"`）。
/// 重复调用会被忽略。
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
