//! Composition root: builds every component from [`Configuration`] and
//! exposes `start`/`stop` lifecycle control.

use crate::config::{Configuration, StorageKind};
use crate::context::{Context, NamedLocks};
use crate::error::AppError;
use crate::queue::BoundedQueue;
use crate::receiver;
use crate::rest_client::SignalApiClient;
use crate::worker::{self, WorkerPoolConfig};
use signal_dlq::{DeadLetterQueue, DlqConfig};
use signal_resilience::{CircuitBreakerConfig, RateLimiterConfig, ResilienceRegistry};
use signal_router::{CommandRouter, Middleware};
use signal_storage::{EmbeddedSqlStorage, KeyValueStorage, MemoryStorage, StorageAdapter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const DLQ_SCHEDULER_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct Application {
    config: Configuration,
    queue: Arc<BoundedQueue>,
    resilience: Arc<ResilienceRegistry>,
    api: Arc<SignalApiClient>,
    dlq: Arc<DeadLetterQueue>,
    router: Arc<CommandRouter<Context>>,
    middlewares: Arc<Vec<Arc<dyn Middleware<Context>>>>,
}

/// A running Application. Dropping this without calling `stop` leaves
/// background tasks running detached; callers should always `stop`.
pub struct ApplicationHandle {
    shutdown_tx: watch::Sender<bool>,
    receiver_task: tokio::task::JoinHandle<()>,
    worker_tasks: Vec<tokio::task::JoinHandle<()>>,
    scheduler_task: tokio::task::JoinHandle<()>,
}

impl Application {
    /// Build every component. Does not start any background task yet.
    pub fn build(
        config: Configuration,
        router: CommandRouter<Context>,
        middlewares: Vec<Arc<dyn Middleware<Context>>>,
    ) -> Result<Self, AppError> {
        receiver::validate_service_url(&config.service_url)?;

        let storage: Option<Arc<dyn StorageAdapter>> = if config.durable_queue_enabled {
            Some(build_storage(&config)?)
        } else {
            None
        };
        let queue = Arc::new(BoundedQueue::new(config.backpressure, config.queue_capacity, storage));

        let resilience = Arc::new(ResilienceRegistry::new(
            RateLimiterConfig {
                capacity: config.rate_limit.capacity,
                refill_per_second: config.rate_limit.refill_per_second,
            },
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                open_duration: config.circuit_breaker.open_duration,
                rolling_window: config.circuit_breaker.rolling_window,
            },
        ));
        let api = Arc::new(SignalApiClient::new(config.api_url.clone(), resilience.clone()));

        let dlq_storage = build_storage(&config)?;
        let dlq = Arc::new(DeadLetterQueue::new(
            dlq_storage,
            DlqConfig {
                max_attempts: config.dlq.max_attempts,
                initial_backoff: config.dlq.initial_backoff,
                multiplier: config.dlq.multiplier,
                max_backoff: config.dlq.max_backoff,
                jitter: config.dlq.jitter,
            },
        ));

        signal_metrics::describe_all();

        Ok(Self {
            config,
            queue,
            resilience,
            api,
            dlq,
            router: Arc::new(router),
            middlewares: Arc::new(middlewares),
        })
    }

    pub fn resilience(&self) -> &Arc<ResilienceRegistry> {
        &self.resilience
    }

    /// Rehydrate the durable queue (if enabled), then spawn the receiver,
    /// worker pool, and DLQ scheduler.
    pub async fn start(self) -> Result<ApplicationHandle, AppError> {
        self.queue.rehydrate().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let receiver_task = tokio::spawn(receiver::run(
            self.config.service_url.clone(),
            self.queue.clone(),
            shutdown_rx.clone(),
        ));

        let locks = Arc::new(NamedLocks::new());
        let worker_tasks = worker::spawn(
            WorkerPoolConfig {
                pool_size: self.config.worker_pool_size,
                redact_source: self.config.log_redaction_enabled,
                handler_deadline: None,
            },
            self.queue.clone(),
            self.router.clone(),
            self.middlewares.clone(),
            self.api.clone(),
            locks,
            self.dlq.clone(),
            shutdown_rx.clone(),
        );

        let (dlq_sender, mut dlq_receiver) = tokio::sync::mpsc::channel(self.config.queue_capacity);
        let requeue_queue = self.queue.clone();
        let requeue_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut shutdown = requeue_shutdown;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                    envelope = dlq_receiver.recv() => {
                        match envelope {
                            Some(envelope) => { requeue_queue.enqueue(envelope).await; }
                            None => break,
                        }
                    }
                }
            }
        });
        let scheduler_task = tokio::spawn(signal_dlq::run_scheduler(
            self.dlq.clone(),
            dlq_sender,
            DLQ_SCHEDULER_POLL_INTERVAL,
            shutdown_rx,
        ));

        Ok(ApplicationHandle {
            shutdown_tx,
            receiver_task,
            worker_tasks,
            scheduler_task,
        })
    }
}

impl ApplicationHandle {
    /// Signal every background task to stop, and wait up to the grace
    /// period for in-flight work to finish before returning.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let drain = async {
            let _ = self.receiver_task.await;
            for task in self.worker_tasks {
                let _ = task.await;
            }
            let _ = self.scheduler_task.await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
            tracing::warn!("shutdown grace period elapsed with tasks still running");
        }
    }
}

fn build_storage(config: &Configuration) -> Result<Arc<dyn StorageAdapter>, AppError> {
    Ok(match config.storage {
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::EmbeddedSql => {
            Arc::new(EmbeddedSqlStorage::open(Path::new("/var/lib/signal-bot/storage.sqlite3"))?)
        }
        StorageKind::KeyValue => {
            Arc::new(KeyValueStorage::open(Path::new("/var/lib/signal-bot/storage.kv"))?)
        }
    })
}
