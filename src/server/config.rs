//! Server configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use cable_mux::ServerConfig;
//!
//! let config = ServerConfig::new()
//!     .with_worker_pool_size(8)
//!     .with_backoff(Duration::from_millis(50), Duration::from_secs(2));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use crate::broadcast::Backoff;

// ============================================================================
// Constants
// ============================================================================

/// Pool size used when available parallelism cannot be determined.
const FALLBACK_POOL_SIZE: usize = 4;

/// Lower bound on the default pool size.
const MIN_DEFAULT_POOL_SIZE: usize = 2;

/// Default delay before the first backend resubscribe.
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Default upper bound on the backend resubscribe delay.
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Reason sent with the disconnect frame on server shutdown.
const DEFAULT_SHUTDOWN_REASON: &str = "server_restart";

// ============================================================================
// ServerConfig
// ============================================================================

/// Tunables of a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Concurrent worker slots. `None` uses available parallelism.
    pub worker_pool_size: Option<usize>,

    /// Delay before the first backend resubscribe.
    pub backoff_initial: Duration,

    /// Upper bound on the backend resubscribe delay.
    pub backoff_max: Duration,

    /// Reason sent to clients when the server shuts down.
    pub shutdown_reason: Cow<'static, str>,

    /// Whether clients should reconnect after a shutdown disconnect.
    pub reconnect_on_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServerConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            worker_pool_size: None,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            shutdown_reason: Cow::Borrowed(DEFAULT_SHUTDOWN_REASON),
            reconnect_on_shutdown: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServerConfig {
    /// Sets the number of concurrent worker slots.
    #[inline]
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = Some(size);
        self
    }

    /// Sets the backend resubscribe backoff.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    /// Sets the disconnect frame sent on shutdown.
    #[inline]
    #[must_use]
    pub fn with_shutdown_reason(
        mut self,
        reason: impl Into<Cow<'static, str>>,
        reconnect: bool,
    ) -> Self {
        self.shutdown_reason = reason.into();
        self.reconnect_on_shutdown = reconnect;
        self
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl ServerConfig {
    /// Effective worker pool size.
    #[must_use]
    pub fn resolved_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| {
            thread::available_parallelism()
                .map_or(FALLBACK_POOL_SIZE, NonZeroUsize::get)
                .max(MIN_DEFAULT_POOL_SIZE)
        })
    }

    /// Effective resubscribe backoff.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_initial, self.backoff_max)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_pool_size == Some(0) {
            return Err("Worker pool size must be greater than zero".to_string());
        }
        if self.backoff_initial.is_zero() {
            return Err("Backoff initial delay must be greater than zero".to_string());
        }
        if self.backoff_max < self.backoff_initial {
            return Err("Backoff max must not be less than the initial delay".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_default() {
        let config = ServerConfig::new();
        assert!(config.worker_pool_size.is_none());
        assert_eq!(config.backoff_initial, DEFAULT_BACKOFF_INITIAL);
        assert_eq!(config.backoff_max, DEFAULT_BACKOFF_MAX);
        assert_eq!(config.shutdown_reason, "server_restart");
        assert!(config.reconnect_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_pool_size_has_floor() {
        assert!(ServerConfig::new().resolved_pool_size() >= MIN_DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_builder_chain() {
        let config = ServerConfig::new()
            .with_worker_pool_size(3)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
            .with_shutdown_reason("maintenance", false);

        assert_eq!(config.resolved_pool_size(), 3);
        assert_eq!(config.backoff().delay(5), Duration::from_millis(40));
        assert_eq!(config.shutdown_reason, "maintenance");
        assert!(!config.reconnect_on_shutdown);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = ServerConfig::new().with_worker_pool_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config =
            ServerConfig::new().with_backoff(Duration::from_secs(2), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }
}
