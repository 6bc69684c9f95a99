//! A long-running command-bot runtime over a Signal gateway: websocket
//! ingestion with backpressure, a fixed worker pool, command routing with
//! middleware, and a resilience envelope (rate limiting, circuit breaking,
//! dead-letter retry) around outbound calls.

pub mod application;
pub mod config;
pub mod context;
pub mod error;
pub mod queue;
pub mod receiver;
pub mod rest_client;
pub mod worker;

pub use application::{Application, ApplicationHandle};
pub use context::Context;
pub use error::AppError;

pub use signal_dlq as dlq;
pub use signal_protocol as protocol;
pub use signal_resilience as resilience;
pub use signal_router as router;
pub use signal_storage as storage;
