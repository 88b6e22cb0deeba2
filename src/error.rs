use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// The error type for rustrelay operations.
///
/// Only startup and infrastructure failures surface as errors. Per-connection
/// failures (a client hanging up, a failed write to one destination, a
/// transient accept error) are logged and reported through
/// [`RelayEvent`](crate::RelayEvent)s instead.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided host/port could not be resolved into any socket address.
    #[error("Invalid socket address")]
    InvalidAddress,

    /// The port argument is not a number in the accepted range.
    #[error("Invalid port '{0}', expected a number between 1024 and 65535")]
    InvalidPort(String),

    /// None of the candidate addresses could be bound and put into listening
    /// state.
    #[error("Failed to bind any of {} candidate address(es)", .attempted.len())]
    BindFailed {
        /// Every candidate that was tried, in order.
        attempted: Vec<SocketAddr>,
    },

    /// None of the resolved server addresses accepted a connection.
    #[error("Failed to connect to any of {} candidate address(es)", .attempted.len())]
    ConnectFailed {
        /// Every candidate that was tried, in order.
        attempted: Vec<SocketAddr>,
    },

    /// The readiness wait itself failed. The event loop cannot continue.
    #[error("Poll error: {0}")]
    Poll(std::io::Error),

    // ============================================================================
    // Resource Errors
    // ============================================================================

    /// The connection set could not grow to hold another connection.
    #[error("Connection set exhausted at capacity {capacity}")]
    ConnectionSetExhausted {
        /// The capacity the set was stuck at.
        capacity: usize,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Returned by [`ConnectionSet::add`](crate::ConnectionSet::add) when the set
/// cannot grow.
///
/// The set is left unchanged and ownership of the rejected item goes back to
/// the caller, who is responsible for closing it.
#[derive(Error)]
#[error("Connection set cannot grow beyond capacity {capacity}")]
pub struct GrowError<T> {
    /// Capacity of the set at the time of the failed add.
    pub capacity: usize,
    item: T,
}

impl<T> GrowError<T> {
    pub(crate) fn new(item: T, capacity: usize) -> Self {
        Self { capacity, item }
    }

    /// Takes back the item that could not be added.
    pub fn into_inner(self) -> T {
        self.item
    }
}

// Manual impl so that GrowError<T> is Debug even when T is not.
impl<T> fmt::Debug for GrowError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowError")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> From<GrowError<T>> for Error {
    fn from(err: GrowError<T>) -> Self {
        Error::ConnectionSetExhausted {
            capacity: err.capacity,
        }
    }
}
