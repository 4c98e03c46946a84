use anyhow::Context;
use ledger_server::{LedgerState, print_banner, setup_environment};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志) 并加载配置
    let config = setup_environment()?;

    print_banner();
    tracing::info!(
        environment = %config.environment,
        work_dir = %config.work_dir,
        "Ledger server starting"
    );

    // 2. 打开账本
    let state = LedgerState::initialize(&config).context("failed to initialize ledger state")?;
    let blocks = state.store.len().context("failed to read ledger")?;
    tracing::info!(blocks, "Ledger ready");

    // 3. 后台验证，直到 Ctrl-C
    let shutdown = CancellationToken::new();
    let scheduler = state.start_background_tasks(shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    scheduler.await.context("verify scheduler task failed")?;

    tracing::info!("Ledger server stopped");
    Ok(())
}
