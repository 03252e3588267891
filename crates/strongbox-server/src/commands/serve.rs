use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use strongbox_engine::EngineContext;
use strongbox_keys::load_keyring;
use strongbox_replication::probe::spawn_health_probe;
use strongbox_replication::{HttpTransport, ReplicaTransport};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

pub async fn run(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let replication = &config.strongbox.replication;

    let provider = super::open_key_provider(&config.strongbox, cli_passphrase)?;
    let crypto = load_keyring(provider.as_ref()).await?;

    let transport: Arc<dyn ReplicaTransport> = Arc::new(HttpTransport::new(
        replication.cluster_token.clone(),
        replication.replica_timeout(),
    )?);
    let ctx = EngineContext::open(config.strongbox.clone(), crypto, transport.clone()).await?;

    let probe = spawn_health_probe(
        ctx.replication.topology().clone(),
        transport,
        replication.probe_interval(),
        replication.replica_timeout(),
    );

    if config.http.admin_token.is_none() {
        info!("no [http] admin_token configured; admin routes are closed");
    }
    let state = Arc::new(AppState::new(ctx.clone(), config.http.admin_token.clone()));
    let app = build_router(state);

    let listener = TcpListener::bind(&config.http.listen_addr).await?;
    info!(
        addr = %config.http.listen_addr,
        node = replication.node_id,
        role = ?ctx.replication.topology().local_role(),
        "strongbox listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    probe.abort();
    ctx.audit.flush().await;
    info!(audit = ?ctx.audit.stats(), "strongbox stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
