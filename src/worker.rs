//! Fixed-size pool of workers draining the main queue.

use crate::context::{Context, NamedLocks};
use crate::queue::BoundedQueue;
use crate::rest_client::SignalApiClient;
use signal_dlq::DeadLetterQueue;
use signal_protocol::parse_envelope;
use signal_router::{compose, CommandRouter, Handler, Middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

pub struct WorkerPoolConfig {
    pub pool_size: usize,
    pub redact_source: bool,
    pub handler_deadline: Option<Duration>,
}

/// Spawn `config.pool_size` worker tasks; each runs until `shutdown` fires.
/// Returns the join handles so the caller can await a clean drain.
pub fn spawn(
    config: WorkerPoolConfig,
    queue: Arc<BoundedQueue>,
    router: Arc<CommandRouter<Context>>,
    middlewares: Arc<Vec<Arc<dyn Middleware<Context>>>>,
    api: Arc<SignalApiClient>,
    locks: Arc<NamedLocks>,
    dlq: Arc<DeadLetterQueue>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..config.pool_size)
        .map(|worker_id| {
            let queue = queue.clone();
            let router = router.clone();
            let middlewares = middlewares.clone();
            let api = api.clone();
            let locks = locks.clone();
            let dlq = dlq.clone();
            let mut shutdown = shutdown.clone();
            let redact_source = config.redact_source;
            let handler_deadline = config.handler_deadline;
            tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        item = queue.dequeue() => item,
                    };

                    let message = match parse_envelope(&item.envelope) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(err) => {
                            warn!(error = %err, worker_id, "unparseable envelope, routing to DLQ");
                            if let Err(storage_err) = dlq
                                .push(
                                    &item.envelope,
                                    "terminal_unparseable",
                                    &err.to_string(),
                                    item.envelope.attempt_count,
                                    true,
                                )
                                .await
                            {
                                error!(error = %storage_err, "failed to persist unparseable envelope to DLQ");
                            }
                            continue;
                        }
                    };

                    let Some(command) = router.route(&message) else {
                        debug!(worker_id, "no command matched");
                        continue;
                    };

                    let command_name = command.name.clone();
                    let ctx = Context::new(
                        message,
                        command_name.clone(),
                        worker_id,
                        api.clone(),
                        locks.clone(),
                        redact_source,
                    );
                    let composed: Arc<dyn Handler<Context>> = compose(&middlewares, command.handler());

                    let invocation = composed.call(ctx);
                    let result = match handler_deadline {
                        Some(deadline) => tokio::time::timeout(deadline, invocation)
                            .await
                            .unwrap_or_else(|_| Err(signal_router::HandlerError::transient("handler deadline exceeded"))),
                        None => invocation.await,
                    };

                    match result {
                        Ok(()) => {
                            metrics::counter!(
                                signal_metrics::COMMAND_INVOCATIONS_TOTAL,
                                "command" => command_name
                            )
                            .increment(1);
                        }
                        Err(err) => {
                            warn!(error = %err.message, worker_id, command = %command_name, "handler failed");
                            let kind = if err.terminal {
                                "terminal_handler"
                            } else {
                                "transient_network"
                            };
                            if let Err(storage_err) = dlq
                                .push(
                                    &item.envelope,
                                    kind,
                                    &err.message,
                                    item.envelope.attempt_count,
                                    err.terminal,
                                )
                                .await
                            {
                                error!(error = %storage_err, "failed to persist failed handler invocation to DLQ");
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
