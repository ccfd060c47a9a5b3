//! Stagehand - 宿主编辑器内嵌的 MCP 能力服务器
//!
//! 入口：解析命令行、加载配置、初始化日志、组装应用，然后
//! - serve：启动 TCP / stdio 传输，Ctrl+C / SIGTERM 时优雅关闭
//! - plan：为目标生成计划并输出 JSON
//! - run：生成并执行计划，输出执行报告 JSON

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use stagehand::config::{load_config, Transport};
use stagehand::core::{
    run_with_graceful_shutdown, App, AppBuilder, BridgeCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
use stagehand::observability;
use stagehand::protocol::{serve_stdio, serve_tcp};

/// 清理任务的总超时（秒）
const CLEANUP_TIMEOUT_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about = "MCP capability server embedded in a host editor, with a planning agent")]
struct Cli {
    /// Path to configuration file (overrides config/default.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the protocol over TCP or stdio
    Serve {
        /// Transport to use (defaults to the configured one)
        #[arg(long, value_enum)]
        transport: Option<Transport>,

        /// TCP bind address (defaults to the configured one)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Create a plan for a goal and print it as JSON
    Plan {
        /// Natural-language goal
        goal: String,
    },
    /// Plan and execute a goal against the in-memory host
    Run {
        /// Natural-language goal
        goal: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let mut config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    if let Command::Serve { transport, bind } = &cli.command {
        if let Some(transport) = transport {
            config.server.transport = *transport;
        }
        if let Some(bind) = bind {
            config.server.bind_addr = bind.clone();
        }
    }

    let app = AppBuilder::new(config).build();

    match cli.command {
        Command::Serve { .. } => serve(app).await,
        Command::Plan { goal } => plan(&app, &goal).await,
        Command::Run { goal } => run(&app, &goal).await,
    }
}

async fn serve(app: App) -> anyhow::Result<()> {
    let manager = Arc::new(ShutdownManager::new());
    let host_loop = app
        .spawn_host_loop(manager.token())
        .context("Failed to start host loop")?;

    let mut coordinator =
        ShutdownCoordinator::new(Arc::clone(&manager)).with_timeout(CLEANUP_TIMEOUT_SECS);
    coordinator.register(BridgeCleanup::new(Arc::clone(&app.bridge)));

    let server = Arc::clone(&app.server);
    let transport = app.config.server.transport;
    let bind_addr = app.config.server.bind_addr.clone();
    let token = manager.token();
    let transport_manager = Arc::clone(&manager);

    let reason = run_with_graceful_shutdown(
        Arc::clone(&manager),
        async move {
            let result = match transport {
                Transport::Tcp => serve_tcp(server, &bind_addr, token).await,
                Transport::Stdio => serve_stdio(server, token).await,
            };
            if let Err(e) = result {
                tracing::error!("Transport failed: {:#}", e);
            }
            transport_manager.shutdown(ShutdownReason::TransportClosed);
        },
        move || async move {
            coordinator.run_cleanup().await;
        },
    )
    .await;
    tracing::info!(
        reason = %reason.unwrap_or(ShutdownReason::TransportClosed),
        "server stopped"
    );

    manager.shutdown(ShutdownReason::TransportClosed);
    tokio::task::spawn_blocking(move || host_loop.join())
        .await
        .context("Failed to join host loop")?
        .map_err(|_| anyhow::anyhow!("host loop panicked"))?;
    Ok(())
}

async fn plan(app: &App, goal: &str) -> anyhow::Result<()> {
    let context = app.context.build_context(goal);
    let plan = app.planner.create_plan(goal, &context).await;
    println!("{}", plan.to_pretty_json());
    shutdown_bridge(app).await
}

async fn run(app: &App, goal: &str) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let host_loop = app
        .spawn_host_loop(token.clone())
        .context("Failed to start host loop")?;

    let report = app.plan_executor().run(goal).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    token.cancel();
    shutdown_bridge(app).await?;
    tokio::task::spawn_blocking(move || host_loop.join())
        .await
        .context("Failed to join host loop")?
        .map_err(|_| anyhow::anyhow!("host loop panicked"))?;
    Ok(())
}

async fn shutdown_bridge(app: &App) -> anyhow::Result<()> {
    let bridge = Arc::clone(&app.bridge);
    let joined = tokio::task::spawn_blocking(move || bridge.shutdown())
        .await
        .context("Failed to stop bridge")?;
    if !joined {
        tracing::warn!("bridge background worker did not stop in time");
    }
    Ok(())
}
