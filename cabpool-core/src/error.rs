use thiserror::Error;

/// Errors a match request can surface to its caller. Infra detail stays in
/// the message; the variant is the stable kind tag the transport layer maps
/// on.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The routing backend failed or produced no drivable route. The pool
    /// was not touched.
    #[error("route indexer unavailable: {0}")]
    IndexerUnavailable(String),
    /// A pool operation failed. The engine does not retry on its own.
    #[error("pool store unavailable: {0}")]
    PoolUnavailable(String),
    /// The request alone exceeds a trip capacity bound; rejected before
    /// registration.
    #[error("request exceeds trip capacity: {0}")]
    RequestTooLarge(String),
    /// The worker pool shut down while the task was queued or running.
    #[error("worker pool terminated")]
    WorkerPoolTerminated,
}
