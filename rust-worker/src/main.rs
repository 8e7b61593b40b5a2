//! Courier Worker - drains the email request queue and sends login emails.
//!
//! The worker long-polls RabbitMQ for batches of requests, sends each email
//! through the configured HTTP mail provider, and serves `/health` and
//! `/metrics` until SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::Registry;
use reqwest::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courier::consumer::BATCH_SIZE;
use courier::web::{self, AppState};
use courier::{
    AmqpQueue, Config, HttpMailTransport, MailSender, MessageProcessor, Metrics, PollSettings,
    Poller,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    // Missing queue configuration is fatal
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        queue = %config.queue_name,
        from_address = %config.from_address,
        mail_api_url = %config.mail_api_url,
        mail_api_key_set = config.mail_api_key.is_some(),
        metrics_port = config.metrics_port,
        "config_loaded"
    );

    let registry = Arc::new(Registry::new());
    let metrics = Metrics::new(&registry).context("Failed to register metrics")?;

    // Bind before connecting so a taken port fails startup
    let listener = web::bind(config.metrics_port).await?;

    let queue = AmqpQueue::connect(
        &config.queue_url,
        &config.queue_name,
        (BATCH_SIZE * 2) as u16,
        config.visibility_timeout,
    )
    .await
    .context("Failed to connect to queue")?;
    let queue = Arc::new(queue);

    let client = Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    let transport = HttpMailTransport::new(
        client,
        config.mail_api_url.clone(),
        config.mail_api_key.clone(),
        Duration::from_millis(config.request_timeout_ms),
    );

    let sender = MailSender::new(
        Arc::new(transport),
        config.from_address.clone(),
        config.subject.clone(),
    );

    let processor = MessageProcessor::new(queue.clone(), Arc::new(sender), metrics.clone());
    let poller = Poller::new(queue.clone(), processor, metrics.clone(), PollSettings::default());

    let shutdown = CancellationToken::new();

    // A dead metrics server stops the worker rather than leaving it unobservable
    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = web::serve(listener, AppState::new(registry, metrics), server_token.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "metrics_server_failed");
            server_token.cancel();
        }
        result
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    info!("worker_ready");

    poller.run(shutdown.clone()).await;

    // The poller may also stop on its own; make sure the server follows.
    shutdown.cancel();

    let server_result = match server.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "metrics_server_panicked");
            Ok(())
        }
    };

    queue.close().await;

    info!("worker_shutdown_complete");
    server_result
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
