//! Listener bootstrap: port parsing, candidate addresses and the
//! first-bind-wins socket setup.

use crate::error::Error;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use tracing::{info, warn};

/// Lowest port accepted on the command line.
pub const MIN_PORT: u16 = 1024;

/// Default listen backlog.
pub const DEFAULT_LISTEN_BACKLOG: usize = 10;

/// Parses a service port, accepting only `MIN_PORT..=65535`.
pub fn parse_port(port: &str) -> Result<u16, Error> {
    match port.trim().parse::<u16>() {
        Ok(value) if value >= MIN_PORT => Ok(value),
        _ => Err(Error::InvalidPort(port.to_string())),
    }
}

/// Wildcard bind candidates for `port`, IPv4 first.
pub fn wildcard_candidates(port: u16) -> Vec<SocketAddr> {
    vec![
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
    ]
}

/// Resolves `host:port` into the ordered list of candidate addresses.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
    let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if candidates.is_empty() {
        return Err(Error::InvalidAddress);
    }
    Ok(candidates)
}

/// Creates a non-blocking listener on the first candidate that can be bound.
///
/// `SO_REUSEADDR` is set on every socket before bind. Candidates that fail are
/// logged and skipped; if none succeeds the error lists all of them.
pub fn bind_listener<I>(candidates: I, backlog: usize) -> Result<mio::net::TcpListener, Error>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut attempted = Vec::new();

    for addr in candidates {
        attempted.push(addr);
        match bind_one(addr, backlog) {
            Ok(listener) => {
                let local_addr = listener.local_addr()?;
                info!(%local_addr, "Bound listener");
                return Ok(mio::net::TcpListener::from_std(listener));
            }
            Err(err) => {
                warn!(%addr, ?err, "Failed to bind candidate");
            }
        }
    }

    Err(Error::BindFailed { attempted })
}

fn bind_one(addr: SocketAddr, backlog: usize) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
