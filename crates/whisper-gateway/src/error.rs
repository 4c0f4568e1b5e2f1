use thiserror::Error;

/// Failures that reach the caller of a gateway operation. Authorization and
/// not-found conditions are never errors; they are reported as an `Outcome`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unauthenticated connection")]
    Unauthenticated,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
