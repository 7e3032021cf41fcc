//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：`RUST_LOG` 优先，否则使用 `default_directive`（如 "info"、"drill=debug"）
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
