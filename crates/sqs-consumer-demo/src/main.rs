//! Demo consumer service.
//!
//! Registers a single `orders` queue with two message types and prints every
//! event from the aggregated result stream. Intended as a runnable example
//! of wiring `sqs-consumer` against a real AWS account (or LocalStack via
//! `SQS_ENDPOINT_URL`), not as a template for production topology.

mod config;
mod health;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqs_consumer::{AwsSqsBroker, Consumer, Event, Logger, Recoverer};

use crate::config::DemoConfig;
use crate::telemetry::init_telemetry;

/// Port on which the health endpoint listens, overridable via `HEALTH_PORT`.
const DEFAULT_HEALTH_PORT: u16 = 9090;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = DemoConfig::from_env()?;
    let _sentry_guard = init_telemetry("sqs-consumer-demo", &config.sentry_dsn);

    tracing::info!("sqs-consumer-demo starting");

    let broker = Arc::new(AwsSqsBroker::new(&config.aws_region, config.sqs_endpoint_url.as_deref()).await?);

    let mut consumer = Consumer::new(broker);
    let orders_dlq = config.orders_dlq_name.clone();
    consumer.consume(config.orders_queue_name.clone(), move |queue| {
        queue.with_retry_policy([
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(60),
        ]);
        if let Some(dlq) = &orders_dlq {
            queue.with_dead_letter_queue(dlq.clone());
        }
        queue.use_middleware(Recoverer);
        queue.use_middleware(Logger);

        queue.with_handler("order.created", |response, request| async move {
            tracing::info!(message_id = %request.message_id, attempt = request.attempt, "order.created");
            match handle_order_created(&request.body).await {
                Ok(()) => {
                    response.handled().await.ok();
                }
                Err(err) => {
                    tracing::warn!(error = %err, message_id = %request.message_id, "order.created failed");
                    response.retry().await.ok();
                }
            }
        });

        queue.with_handler("order.cancelled", |response, request| async move {
            tracing::info!(message_id = %request.message_id, "order.cancelled");
            response.handled().await.ok();
        });
    });

    let (mut events, startup_failures) = consumer.listen().await;
    for failure in &startup_failures {
        tracing::error!(error = %failure, "queue failed to start");
    }

    let health_port = if config.health_port == 0 {
        DEFAULT_HEALTH_PORT
    } else {
        config.health_port
    };
    let (health_shutdown_tx, health_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let health_handle = tokio::spawn(async move {
        health::serve_health(health_port, async {
            let _ = health_shutdown_rx.await;
        })
        .await;
    });

    let events_handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Observed { request, response } => {
                    tracing::debug!(
                        message_id = %request.message_id,
                        message_type = %request.message_type,
                        result = ?response.result(),
                        "observed"
                    );
                }
                Event::Error(err) => {
                    tracing::error!(error = %err, "consume pipeline error");
                }
            }
        }
    });

    // The consume pipeline has no shutdown API (its worker loops are meant to
    // run for the process lifetime); the demo exits the process on signal
    // rather than attempting to drain in-flight work.
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        tracing::info!("received Ctrl-C, shutting down");
    }

    let _ = health_shutdown_tx.send(());
    let _ = health_handle.await;
    events_handle.abort();

    tracing::info!("sqs-consumer-demo shut down");
    Ok(())
}

async fn handle_order_created(_body: &str) -> Result<()> {
    Ok(())
}
