//! Error types for the mcpmon proxy engine.

use thiserror::Error;

/// Main error type for proxy operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The child process could not be spawned.
    #[error("failed to spawn '{0}': {1}")]
    SpawnFailed(String, String),

    /// A write to the child's stdin or the client's stdout failed.
    #[error("write failed on {0}: {1}")]
    WriteFailed(String, String),

    /// The child process's stdio pipes were not available after spawn.
    #[error("child stdio pipe '{0}' unavailable")]
    PipeUnavailable(String),

    /// A proxy-originated request timed out waiting for a response.
    #[error("request timeout")]
    RequestTimeout,

    /// A proxy-originated request was issued with no child running.
    #[error("server not running")]
    ServerNotRunning,

    /// An extension hook raised an error while handling a tool call.
    #[error("extension tool '{0}' failed: {1}")]
    ExtensionToolFailed(String, String),

    /// An extension failed during its `initialize` lifecycle call.
    #[error("extension '{0}' failed to initialize: {1}")]
    ExtensionInitFailed(String, String),

    /// The watch target could not be observed.
    #[error("failed to watch '{0}': {1}")]
    WatchFailed(String, String),

    /// A `docker` side-command used for container-aware kill failed.
    #[error("docker {0} failed: {1}")]
    ContainerCommandFailed(String, String),

    /// The proxy is shutting down; further requests are rejected.
    #[error("proxy shutting down")]
    ShuttingDown,

    /// Generic I/O failure, preserved with context.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
