//! Top-level application error: only errors fatal to the whole process.

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("receiver error: {0}")]
    Receiver(#[from] crate::receiver::ReceiverError),
    #[error("storage error: {0}")]
    Storage(#[from] signal_storage::StorageError),
}
