//! Single-threaded broadcast relay.
//!
//! [`RelayServer`] owns one listening socket and a [`ConnectionSet`] of
//! clients, waits on a mio [`Poll`] for readability, and copies every chunk it
//! reads from one client to all the others.

pub mod bootstrap;
pub mod broadcast;
mod connection_set;
mod endpoint;

pub use connection_set::{ConnectionSet, DEFAULT_INITIAL_CAPACITY};
pub use endpoint::{Connection, Endpoint};

use crate::config::get_namespaced_usize_or;
use crate::error::Error;
use ::config::Config;

use mio::{Events, Poll, Token};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Default upper bound for a single read, and so for a broadcast chunk.
pub const DEFAULT_MAX_READ_SIZE: usize = 256;

const DEFAULT_POLL_CAPACITY: usize = 128;

/// How long the listener rests after an accept error that is not transient.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// Internal constants for connection ids
const LISTENER_ID: usize = 1;
const CONNECTION_ID_RANGE_START: usize = 1000;

/// Events produced by [`RelayServer::poll_events()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A client was accepted and is now tracked.
    Accepted { id: usize, peer_addr: SocketAddr },
    /// A client was accepted but the connection set could not grow, so it was
    /// closed right away.
    Rejected { peer_addr: SocketAddr },
    /// A chunk of `len` bytes from `from` was written to `delivered`
    /// destinations and failed (fully or partially) for `failed` others.
    Relayed {
        from: usize,
        len: usize,
        delivered: usize,
        failed: usize,
    },
    /// A client hung up or failed a read and was closed.
    Evicted { id: usize },
}

/// What happens to the listener after a failed accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptRetry {
    /// The backlog is empty; wait for the next readiness event.
    Drained,
    /// The failure concerned one connection only; accept again next iteration.
    Immediate,
    /// Accept again once [`ACCEPT_RETRY_DELAY`] has passed. Used for errors
    /// such as running out of descriptors, which would otherwise either spin
    /// the loop or strand clients already waiting in the backlog.
    Delayed,
}

impl AcceptRetry {
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::WouldBlock => AcceptRetry::Drained,
            ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                AcceptRetry::Immediate
            }
            _ => AcceptRetry::Delayed,
        }
    }
}

/// The relay event loop.
///
/// Not thread-safe; the loop thread is the only one touching the connection
/// set.
#[derive(Debug)]
pub struct RelayServer {
    connections: ConnectionSet<Connection>,
    poll: Poll,
    poll_capacity: usize,
    read_buf: Vec<u8>,
    next_id: usize,
    accept_retry_at: Option<Instant>,
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayServer {
    /// Binds the first usable address from `candidates` and sets up the loop.
    ///
    /// See [`Self::new_named`] for configuration keys.
    pub fn new<I>(config: &Config, candidates: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        Self::new_named(config, "", candidates)
    }

    /// Creates a relay with configuration namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `lobby.max_read_size`)
    /// 2. `{key}` (e.g., `max_read_size`)
    /// 3. Hard-coded default
    ///
    /// # Configuration Keys
    ///
    /// - `max_read_size`: bytes per read and per broadcast chunk (256)
    /// - `initial_capacity`: starting size of the connection set (5)
    /// - `max_connections`: slot limit including the listener, 0 for none (0)
    /// - `poll_capacity`: events fetched per wait (128)
    /// - `listen_backlog`: listen backlog (10)
    ///
    /// # Errors
    ///
    /// Fails if a configuration value is malformed, if no candidate can be
    /// bound, or if the poll instance cannot be created.
    pub fn new_named<I>(config: &Config, name: &str, candidates: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let max_read_size =
            get_namespaced_usize_or(config, name, "max_read_size", DEFAULT_MAX_READ_SIZE)?.max(1);
        let initial_capacity = get_namespaced_usize_or(
            config,
            name,
            "initial_capacity",
            DEFAULT_INITIAL_CAPACITY,
        )?;
        let max_connections = get_namespaced_usize_or(config, name, "max_connections", 0)?;
        let poll_capacity =
            get_namespaced_usize_or(config, name, "poll_capacity", DEFAULT_POLL_CAPACITY)?.max(1);
        let listen_backlog = get_namespaced_usize_or(
            config,
            name,
            "listen_backlog",
            bootstrap::DEFAULT_LISTEN_BACKLOG,
        )?;

        let poll = Poll::new()?;
        let listener = bootstrap::bind_listener(candidates, listen_backlog)?;
        let listener = Connection::listener(poll.registry(), LISTENER_ID, listener)?;

        let mut connections = if max_connections == 0 {
            ConnectionSet::new(initial_capacity)
        } else {
            ConnectionSet::with_limit(initial_capacity, max_connections)
        };
        connections.add(listener)?;

        info!(
            local_addr = %connections[0].addr(),
            max_read_size,
            initial_capacity = connections.capacity(),
            "Relay ready"
        );

        Ok(Self {
            connections,
            poll,
            poll_capacity,
            read_buf: vec![0; max_read_size],
            next_id: CONNECTION_ID_RANGE_START,
            accept_retry_at: None,
        })
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl RelayServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.connections[0].addr()
    }

    /// All tracked connections, listener in slot 0.
    pub fn connections(&self) -> &ConnectionSet<Connection> {
        &self.connections
    }

    /// Ids of the tracked clients, in slot order.
    pub fn client_ids(&self) -> Vec<usize> {
        self.connections.iter().skip(1).map(Endpoint::id).collect()
    }

    pub fn client_count(&self) -> usize {
        self.connections.len() - 1
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl RelayServer {
    /// Runs the loop until the readiness wait fails.
    ///
    /// Never returns `Ok`; the server has no shutdown path of its own.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.poll_events(None)?;
        }
    }

    /// Runs one wait/accept/relay iteration and returns what happened.
    ///
    /// Blocks until at least one connection is ready or `timeout` passes. A
    /// connection whose last read returned data has not been drained yet, so
    /// while one exists the wait does not block at all. A listener resting
    /// after an accept error shortens the wait to the end of its rest.
    ///
    /// Only returns unrecoverable errors. Per-connection failures are logged
    /// and show up as events.
    #[instrument(skip(self))]
    pub fn poll_events(&mut self, timeout: Option<Duration>) -> Result<Vec<RelayEvent>, Error> {
        let timeout = if self.connections.iter().any(Endpoint::is_ready) {
            Some(Duration::ZERO)
        } else if let Some(retry_at) = self.accept_retry_at {
            let rest = retry_at.saturating_duration_since(Instant::now());
            Some(timeout.map_or(rest, |timeout| timeout.min(rest)))
        } else {
            timeout
        };

        let mut poll_events = Events::with_capacity(self.poll_capacity);
        if let Err(err) = self.poll.poll(&mut poll_events, timeout) {
            if err.kind() == ErrorKind::Interrupted {
                debug!("Readiness wait interrupted");
                return Ok(Vec::new());
            }
            error!(?err, "Readiness wait failed");
            return Err(Error::Poll(err));
        }

        // mio reports errors and hangups alongside readability, so every
        // token is marked ready and the read itself surfaces the failure.
        let ready: HashSet<Token> = poll_events.iter().map(|event| event.token()).collect();
        for conn in self.connections.iter_mut() {
            if ready.contains(&Token(conn.id())) {
                conn.set_ready(true);
            }
        }

        if self.accept_retry_at.is_some_and(|retry_at| Instant::now() >= retry_at) {
            self.accept_retry_at = None;
            self.connections[0].set_ready(true);
        }

        let mut events = Vec::new();

        // The listener is always serviced before any client
        if self.connections[0].is_ready() {
            self.accept_client(&mut events);
        }

        let registry = self.poll.registry();
        events.extend(broadcast::service_clients(
            &mut self.connections,
            &mut self.read_buf,
            |mut conn| {
                if let Err(err) = conn.deregister(registry) {
                    warn!(id = conn.id(), ?err, "Failed to deregister connection");
                }
            },
        ));

        debug!(count = events.len(), "Fetched events");
        Ok(events)
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

impl RelayServer {
    // Accepts at most one client per iteration, like one accept per wakeup.
    fn accept_client(&mut self, events: &mut Vec<RelayEvent>) {
        let local_addr = self.connections[0].addr();

        let (stream, peer_addr) = match self.connections[0].accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                match AcceptRetry::for_error(err.kind()) {
                    AcceptRetry::Drained => {
                        debug!(%local_addr, "No pending connection");
                        self.connections[0].set_ready(false);
                    }
                    AcceptRetry::Immediate => {
                        warn!(?err, %local_addr, "Transient accept error");
                    }
                    AcceptRetry::Delayed => {
                        error!(
                            ?err,
                            %local_addr,
                            retry_in = ?ACCEPT_RETRY_DELAY,
                            "Error accepting connection"
                        );
                        self.connections[0].set_ready(false);
                        self.accept_retry_at = Some(Instant::now() + ACCEPT_RETRY_DELAY);
                    }
                }
                return;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer_addr, ?err, "Failed to set TCP_NODELAY");
        }

        let id = self.next_id;
        let conn = match Connection::client(self.poll.registry(), id, stream, peer_addr) {
            Ok(conn) => conn,
            Err(err) => {
                error!(%peer_addr, ?err, "Failed to register connection");
                return;
            }
        };

        match self.connections.add(conn) {
            Ok(slot) => {
                info!(id, slot, %peer_addr, "Accepted connection");
                self.advance_connection_id();
                events.push(RelayEvent::Accepted { id, peer_addr });
            }
            Err(err) => {
                warn!(%peer_addr, capacity = err.capacity, "Connection set full, closing connection");
                let mut conn = err.into_inner();
                if let Err(err) = conn.deregister(self.poll.registry()) {
                    warn!(id, ?err, "Failed to deregister connection");
                }
                events.push(RelayEvent::Rejected { peer_addr });
            }
        }
    }

    fn advance_connection_id(&mut self) {
        loop {
            self.next_id = self
                .next_id
                .checked_add(1)
                .unwrap_or(CONNECTION_ID_RANGE_START);
            if !self.connections.iter().any(|conn| conn.id() == self.next_id) {
                break;
            }
        }
    }
}
