//! Drill 服务
//!
//! HTTP 控制面 + Slack 事件回调；兜底轮询、去重清扫在后台运行，Ctrl+C 优雅退出。
//!
//! 环境变量:
//! - SLACK_BOT_TOKEN: 管理 bot token（查用户、建 / 归档频道、轮询）；未设置时使用内存平台
//! - 各人设的 token（见 config/default.toml 的 [[personas]].token_env）
//! - OPENAI_API_KEY: 推理后端 API Key；未设置时使用 Mock
//! - DRILL__*: 覆盖任意配置项，如 DRILL__SERVER__PORT=9000
//!
//! 启动: cargo run --features server

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use drill::config::load_config;
    use drill::core::DrillBuilder;
    use drill::integrations::{create_router, ServerState};
    use tokio_util::sync::CancellationToken;

    drill::observability::init("info");

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let port = config.server.port;
    tracing::info!("Starting {}", config.app.name);

    let token = CancellationToken::new();
    let runtime = DrillBuilder::new(config)
        .with_instructions_from_file()
        .build(token.clone())
        .await;

    let state = Arc::new(ServerState {
        orchestrator: Arc::clone(&runtime.orchestrator),
        ingress: runtime.ingress.clone(),
    });
    let app = create_router(state);

    let signal_token = token.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            tracing::info!("Received Ctrl+C, shutting down...");
            signal_token.cancel();
        }
    });

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    tracing::info!("Drill server listening on http://{}", addr);
    tracing::info!("Slack events URL: http://YOUR_HOST:{}/slack/events", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await
        .context("Server error")?;

    runtime.shutdown().await;
    Ok(())
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("请使用 --features server 编译: cargo run --features server");
    std::process::exit(1);
}
