use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use common_queue::{Enqueue, EnqueueOptions, PgQueue, RetryPolicy, Worker};
use common_store::{PgAnalyticsStore, PgAppStore};
use common_types::jobs::{queues, JobPayload, RotateSaltJob};
use common_types::SystemClock;

use worker::config::Config;
use worker::handlers::PipelineHandler;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully");
}

/// Periodically enqueue the day's salt rotation. The date dedup key makes
/// this safe to run on every worker instance: only one rotation job per day
/// makes it into the queue.
async fn schedule_salt_rotations(queue: Arc<PgQueue>, check_interval: Duration) {
    let mut interval = tokio::time::interval(check_interval);

    loop {
        interval.tick().await;

        let job = JobPayload::RotateSalt(RotateSaltJob {
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        });
        let options = EnqueueOptions {
            delay: None,
            dedup_key: job.dedup_key(),
        };

        match serde_json::to_value(&job) {
            Ok(payload) => {
                if let Err(e) = queue.enqueue(job.queue(), payload, options).await {
                    error!("failed to schedule salt rotation: {}", e);
                }
            }
            Err(e) => error!("failed to encode salt rotation job: {}", e),
        }
    }
}

/// Return jobs abandoned by dead workers to the queue, and prune settled
/// rows past their retention so the table does not grow without bound.
async fn sweep_queue(
    queue: Arc<PgQueue>,
    stall_timeout: Duration,
    settled_retention: Duration,
    sweep_interval: Duration,
) {
    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        interval.tick().await;

        match queue.sweep_stalled(stall_timeout).await {
            Ok(0) => {}
            Ok(swept) => warn!(swept, "returned stalled jobs to the queue"),
            Err(e) => error!("stall sweep failed: {}", e),
        }

        match queue.delete_settled(settled_retention).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "pruned settled jobs"),
            Err(e) => error!("settled-job prune failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration:");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let queue = Arc::new(
        PgQueue::new(&config.queue_table, &config.database_url)
            .await
            .expect("failed to connect to the job queue"),
    );
    let app = Arc::new(
        PgAppStore::new(&config.database_url)
            .await
            .expect("failed to connect to the app store"),
    );
    let analytics = Arc::new(
        PgAnalyticsStore::new(&config.database_url)
            .await
            .expect("failed to connect to the analytics store"),
    );

    let handler = Arc::new(PipelineHandler::new(
        app,
        analytics,
        Arc::new(SystemClock),
        chrono::Duration::seconds(config.session_window_secs as i64),
        config.salt_keep,
    ));

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let retry_policy = RetryPolicy::default();

    // One worker per queue. Queues whose handler mutates one logical row
    // per key run at concurrency 1 so snapshots never interleave.
    let queue_concurrency = [
        (queues::DEVICE, config.device_concurrency),
        (queues::EVENT, config.event_concurrency),
        (queues::SESSION, 1),
        (queues::USER_CREATE, 1),
        (queues::USER_UPDATE, 1),
        (queues::MERGE, 1),
        (queues::SALT, 1),
    ];

    for (name, concurrency) in queue_concurrency {
        let worker = Worker::new(
            name,
            queue.clone(),
            handler.clone(),
            poll_interval,
            concurrency,
            retry_policy,
        );
        tokio::spawn(async move { worker.run().await });
        info!(queue = name, concurrency, "worker started");
    }

    tokio::spawn(schedule_salt_rotations(
        queue.clone(),
        Duration::from_secs(config.salt_check_secs),
    ));
    tokio::spawn(sweep_queue(
        queue,
        Duration::from_secs(config.stall_timeout_secs),
        Duration::from_secs(config.settled_retention_secs),
        Duration::from_secs(config.sweep_interval_secs),
    ));

    shutdown().await;
}
