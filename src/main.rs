//! MQ Relay - Main Entry Point
//!
//! Consumes the configured queues, logging each message, and exposes a
//! health endpoint for the supervisor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use mq_relay::api::{self, handlers::AppState};
use mq_relay::logging::{self, LogFormat};
use mq_relay::{AuditLogger, ConsumerSupervisor, MqConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    logging::init(LogFormat::from_env());
    let config = MqConfig::from_env().context("loading MQ_* configuration")?;

    info!("Starting MQ Relay v{}", env!("CARGO_PKG_VERSION"));
    if config.queues.is_empty() {
        bail!("no queues configured, set MQ_QUEUES");
    }

    let mut supervisor = ConsumerSupervisor::new(config.broker.clone())
        .await
        .context("initial broker connection")?
        .with_reconnect_policy(config.reconnect_policy())
        .with_ack_policy(config.ack_policy)
        .with_audit_logger(AuditLogger::new(&config.audit_key));

    for queue in &config.queues {
        let name = queue.clone();
        supervisor.register_receiver(queue, false, move |body| {
            let name = name.clone();
            async move {
                info!(queue = %name, bytes = body.len(), "Message received");
                0
            }
        });
    }

    let state = Arc::new(AppState {
        stats: supervisor.stats(),
        broker_address: config.broker.address(),
        queues: config.queues.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health endpoint on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api::router(state)).await {
            error!(error = %e, "Health server stopped");
        }
    });

    match supervisor.start().await {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "Consumer supervisor stopped");
            Err(e.into())
        }
    }
}
