//! Interactive line client for the relay.
//!
//! Forwards every input line to the server and prints every chunk the server
//! relays back. Uses plain blocking std sockets with one input thread.

use crate::error::Error;
use std::io::{self, BufRead, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use tracing::{debug, info, warn};

/// Connects to the first candidate that accepts the connection.
pub fn connect<I>(candidates: I) -> Result<TcpStream, Error>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut attempted = Vec::new();
    for addr in candidates {
        attempted.push(addr);
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!(%addr, "Connected to relay");
                return Ok(stream);
            }
            Err(err) => warn!(%addr, ?err, "Failed to connect to candidate"),
        }
    }
    Err(Error::ConnectFailed { attempted })
}

/// Runs the client until the server closes the connection.
///
/// Lines from `input` are sent on a background thread with their trailing
/// newline restored. When `input` runs out the write half is shut down, but
/// chunks from the server keep being copied to `output` until it hangs up.
pub fn run<R, W>(stream: TcpStream, input: R, mut output: W) -> Result<(), Error>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let mut writer = stream.try_clone()?;
    thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(?err, "Failed to read input");
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            let mut bytes = line.into_bytes();
            bytes.push(b'\n');
            if let Err(err) = writer.write_all(&bytes) {
                warn!(?err, "Failed to send to relay");
                break;
            }
            debug!(len = bytes.len(), "Sent line");
        }
        if let Err(err) = writer.shutdown(Shutdown::Write) {
            debug!(?err, "Failed to shut down write half");
        }
    });

    let mut reader = stream;
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                info!("Relay closed the connection");
                return Ok(());
            }
            Ok(len) => {
                output.write_all(&buf[..len])?;
                output.flush()?;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}
