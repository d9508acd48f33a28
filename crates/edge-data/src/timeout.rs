//! Timeout configuration for origin requests.

use std::time::Duration;

/// Timeout configuration for an origin request.
///
/// Every wait on the origin is bounded: establishing the connection,
/// receiving the response head, and each gap between body chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Connection timeout.
    pub connect: Duration,
    /// Time until response headers arrive.
    pub response: Duration,
    /// Longest allowed silence between body chunks.
    pub idle: Duration,
}

impl TimeoutConfig {
    /// Create a new timeout configuration.
    pub fn new(connect: Duration, response: Duration, idle: Duration) -> Self {
        Self {
            connect,
            response,
            idle,
        }
    }

    /// Create from millisecond values, as found in configuration files.
    pub fn from_millis(connect_ms: u64, response_ms: u64, idle_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(connect_ms),
            Duration::from_millis(response_ms),
            Duration::from_millis(idle_ms),
        )
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response: Duration::from_secs(15),
            idle: Duration::from_secs(30),
        }
    }
}

/// Error when a timeout is exceeded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("Connection timeout after {0:?}")]
    Connect(Duration),

    #[error("Response timeout after {0:?}")]
    Response(Duration),

    #[error("Body idle timeout after {0:?}")]
    Idle(Duration),
}
