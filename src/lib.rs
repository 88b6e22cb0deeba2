//! RustRelay - a single-threaded TCP broadcast relay
//!
//! A [`RelayServer`] accepts any number of TCP clients on one listening socket,
//! waits on a readiness poll for incoming data, and writes every chunk it
//! receives from one client to all the other clients. There is no framing:
//! bytes are relayed as they arrive, in chunks of at most `max_read_size`.
//!
//! The [`client`] module provides the small line-oriented client used by the
//! `rustrelay client` command.

// Internal-only modules
pub(crate) mod config;
pub(crate) mod error;

pub mod client;
pub mod relay;

// These are the intended public API
pub use error::{Error, GrowError};
pub use relay::{AcceptRetry, Connection, ConnectionSet, Endpoint, RelayEvent, RelayServer};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::error::{Error, GrowError};
    pub use crate::relay::bootstrap::{parse_port, resolve, wildcard_candidates};
    pub use crate::relay::{
        AcceptRetry, Connection, ConnectionSet, Endpoint, RelayEvent, RelayServer,
    };
}
