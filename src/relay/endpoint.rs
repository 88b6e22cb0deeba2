//! Connection handles tracked by the relay.

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

/// An opaque connection handle as seen by the relay step.
///
/// Exposes identity, the last observed readiness, and byte-level read/write.
/// Closing is done by dropping the handle once it has been removed from the
/// [`ConnectionSet`](super::ConnectionSet).
pub trait Endpoint {
    /// Transport identifier, unique and stable for the lifetime of the handle.
    fn id(&self) -> usize;

    /// Whether the handle was reported readable and has not been drained yet.
    fn is_ready(&self) -> bool;

    fn set_ready(&mut self, ready: bool);

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

#[derive(Debug)]
enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// A mio-backed connection handle: either the listening socket or one client
/// stream.
///
/// Both roles live in the same [`ConnectionSet`](super::ConnectionSet); the
/// listener is the one in slot 0.
#[derive(Debug)]
pub struct Connection {
    id: usize,
    socket: Socket,
    addr: SocketAddr,
    ready: bool,
}

impl Connection {
    /// Wraps a listening socket and registers it for readability.
    pub(crate) fn listener(
        registry: &Registry,
        id: usize,
        mut listener: TcpListener,
    ) -> io::Result<Self> {
        let addr = listener.local_addr()?;
        registry.register(&mut listener, Token(id), Interest::READABLE)?;
        Ok(Self {
            id,
            socket: Socket::Listener(listener),
            addr,
            ready: false,
        })
    }

    /// Wraps an accepted client stream and registers it for readability.
    pub(crate) fn client(
        registry: &Registry,
        id: usize,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> io::Result<Self> {
        registry.register(&mut stream, Token(id), Interest::READABLE)?;
        Ok(Self {
            id,
            socket: Socket::Stream(stream),
            addr: peer_addr,
            ready: false,
        })
    }

    /// Local address for the listener, peer address for a client.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.socket, Socket::Listener(_))
    }

    /// Accepts one pending client. Only valid on the listener.
    pub(crate) fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        match &mut self.socket {
            Socket::Listener(listener) => listener.accept(),
            Socket::Stream(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "accept called on a client connection",
            )),
        }
    }

    /// Removes the handle from the poll registry. The socket itself closes
    /// when the handle is dropped.
    pub(crate) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match &mut self.socket {
            Socket::Listener(listener) => registry.deregister(listener),
            Socket::Stream(stream) => registry.deregister(stream),
        }
    }
}

impl Endpoint for Connection {
    fn id(&self) -> usize {
        self.id
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.socket {
            Socket::Stream(stream) => stream.read(buf),
            Socket::Listener(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot read from the listening connection",
            )),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.socket {
            Socket::Stream(stream) => stream.write(buf),
            Socket::Listener(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot write to the listening connection",
            )),
        }
    }
}
