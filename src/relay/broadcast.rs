//! The relay step: bounded reads from ready clients and fan-out of each chunk
//! to every other client.
//!
//! Everything here is generic over [`Endpoint`] so the scan, eviction and
//! fan-out rules are independent of mio.

use super::{ConnectionSet, Endpoint, RelayEvent};
use std::io::ErrorKind;
use tracing::{debug, error, info, instrument, trace, warn};

// Internal data type for read_chunk
enum ReadOutcome {
    Data(usize),
    Drained,
    Closed,
}

/// Outcome of writing one chunk to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The whole chunk was handed to the transport.
    Complete,
    /// Only the first `written` bytes fit; the rest was dropped.
    Partial { written: usize },
    /// Nothing was written.
    Failed,
}

/// Scans client slots in ascending order and services every ready one.
///
/// For each ready client one read of at most `buf.len()` bytes is made. Data
/// is broadcast with [`broadcast`]. End of stream or a read error evicts the
/// client: it is removed from `set` and handed to `evict`, which owns closing
/// it. After an eviction the cursor stays put, because the slot now holds what
/// used to be the last client and that one has not been looked at yet.
///
/// Readiness is updated as the scan goes: a read that returns data leaves the
/// client ready, since more data or end of stream may already be queued
/// behind it. Only `WouldBlock` clears it.
#[instrument(skip_all)]
pub fn service_clients<E, F>(
    set: &mut ConnectionSet<E>,
    buf: &mut [u8],
    mut evict: F,
) -> Vec<RelayEvent>
where
    E: Endpoint,
    F: FnMut(E),
{
    let mut events = Vec::new();

    let mut index = 1;
    while index < set.len() {
        if !set[index].is_ready() {
            index += 1;
            continue;
        }

        match read_chunk(&mut set[index], buf) {
            ReadOutcome::Data(len) => {
                let from = set[index].id();
                let (delivered, failed) = broadcast(set, from, &buf[..len]);
                events.push(RelayEvent::Relayed {
                    from,
                    len,
                    delivered,
                    failed,
                });
                index += 1;
            }
            ReadOutcome::Drained => {
                index += 1;
            }
            ReadOutcome::Closed => {
                let connection = set.remove_at(index);
                let id = connection.id();
                evict(connection);
                info!(id, remaining = set.len(), "Evicted connection");
                events.push(RelayEvent::Evicted { id });
            }
        }
    }

    events
}

/// Writes `chunk` once to every connection except the listener in slot 0 and
/// the sender `from`.
///
/// Failures are logged per destination and never stop delivery to the
/// remaining ones. Failed destinations are not evicted here; if the peer is
/// gone its own read will report it.
///
/// Returns `(delivered, failed)` where a partial write counts as failed.
pub fn broadcast<E: Endpoint>(
    set: &mut ConnectionSet<E>,
    from: usize,
    chunk: &[u8],
) -> (usize, usize) {
    let Some(listener_id) = set.get(0).map(Endpoint::id) else {
        return (0, 0);
    };

    let mut delivered = 0;
    let mut failed = 0;
    for dest in set.iter_mut() {
        let to = dest.id();
        if to == listener_id || to == from {
            continue;
        }
        match write_chunk(dest, chunk) {
            Delivery::Complete => delivered += 1,
            Delivery::Partial { .. } | Delivery::Failed => failed += 1,
        }
    }

    debug!(from, len = chunk.len(), delivered, failed, "Broadcast chunk");
    (delivered, failed)
}

/// Writes as much of `chunk` as the transport takes without blocking.
pub fn write_chunk<E: Endpoint>(dest: &mut E, chunk: &[u8]) -> Delivery {
    let to = dest.id();
    let mut written = 0;

    while written < chunk.len() {
        match dest.write(&chunk[written..]) {
            Ok(0) => {
                warn!(to, remaining = chunk.len() - written, "Write to socket returned 0");
                break;
            }
            Ok(len) => {
                trace!(to, len, "Wrote to socket");
                written += len;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                warn!(to, dropped = chunk.len() - written, "Send buffer full, dropping chunk");
                break;
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::BrokenPipe => warn!(to, "Broken pipe"),
                    ErrorKind::ConnectionReset => warn!(to, "Connection reset"),
                    _ => error!(to, ?err, "Error writing to socket"),
                }
                break;
            }
        }
    }

    if written == chunk.len() {
        Delivery::Complete
    } else if written == 0 {
        Delivery::Failed
    } else {
        Delivery::Partial { written }
    }
}

fn read_chunk<E: Endpoint>(conn: &mut E, buf: &mut [u8]) -> ReadOutcome {
    let id = conn.id();
    match conn.read(buf) {
        Ok(0) => {
            info!(id, "Client closed connection");
            ReadOutcome::Closed
        }
        Ok(len) => {
            // Stays ready until a read reports WouldBlock; the wakeup that
            // delivered this data may also have delivered the FIN
            trace!(id, len, "Read data from socket");
            ReadOutcome::Data(len)
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
            trace!(id, "Socket drained");
            conn.set_ready(false);
            ReadOutcome::Drained
        }
        // Stays ready and is retried on the next iteration
        Err(err) if err.kind() == ErrorKind::Interrupted => ReadOutcome::Drained,
        Err(err) => {
            match err.kind() {
                ErrorKind::BrokenPipe => warn!(id, "Broken pipe"),
                ErrorKind::ConnectionReset => warn!(id, "Connection reset"),
                _ => error!(id, ?err, "Error reading from socket"),
            }
            ReadOutcome::Closed
        }
    }
}
