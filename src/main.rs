use std::{env, fs, sync::Arc};

use anyhow::Context;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use federated_orchestra::{
    RoundOrchestrator, WorkerRegistry,
    configs::CampaignConfig,
    orchestra::{
        audit::AuditLog, communication, dispatcher::Dispatcher, membership::MembershipPolicy,
    },
    strategy::FedAvg,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .context("usage: federated-orchestra <campaign.json>")?;
    let config = CampaignConfig::load(&path)?;

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| config.host.clone()),
        env::var("PORT").unwrap_or_else(|_| config.port.to_string()),
    );

    let listener = communication::listen(&addr).await?;
    info!("listening at {addr}");

    let registry = Arc::new(WorkerRegistry::new());
    let cancel = CancellationToken::new();
    let acceptor = tokio::spawn(communication::accept_workers(
        listener,
        Arc::clone(&registry),
        cancel.clone(),
    ));

    let audit = AuditLog::open(&config.audit_log)
        .with_context(|| format!("cannot open {}", config.audit_log.display()))?;

    let strategy = FedAvg::new(config.strategy.clone());
    let policy = MembershipPolicy::new(config.methodology(), config.threshold);
    let dispatcher = Dispatcher::new(config.max_concurrency);

    let mut orchestrator = RoundOrchestrator::new(
        registry,
        Box::new(strategy),
        policy,
        dispatcher,
        config.round_timeout(),
    )
    .with_observer(Arc::new(audit))
    .with_wait_timeout(config.wait_timeout())
    .with_cancellation(cancel.clone());

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received SIGINT, stopping after the current round");
                cancel.cancel();
            }
        })
    };

    let res = orchestrator.run(config.num_rounds).await;

    info!("wrapping up, disconnecting workers...");
    orchestrator.disconnect_all(config.round_timeout()).await?;

    cancel.cancel();
    interrupt.abort();
    acceptor.await??;

    let history = res?;
    if let Some(path) = &config.history_out {
        fs::write(path, serde_json::to_vec_pretty(&history)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!("history written to {}", path.display());
    }

    Ok(())
}
