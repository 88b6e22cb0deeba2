//! Relay step tests against in-memory endpoints.
//!
//! The fakes script what each read returns and how each write behaves, which
//! makes failure injection and same-scan evictions deterministic.

use rustrelay::relay::broadcast::{broadcast, service_clients, write_chunk, Delivery};
use rustrelay::prelude::*;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::rc::Rc;

// ============================================================================
// Fake Endpoint
// ============================================================================

enum Read {
    Data(Vec<u8>),
    Eof,
    Fail(ErrorKind),
}

#[derive(Clone, Copy)]
enum WriteMode {
    Accept,
    Fail(ErrorKind),
    /// Accepts at most this many bytes in total, then reports WouldBlock.
    Limit(usize),
    /// Reports Interrupted once, then accepts.
    InterruptOnce,
}

struct FakePeer {
    id: usize,
    ready: bool,
    reads: VecDeque<Read>,
    write_mode: WriteMode,
    received: Rc<RefCell<Vec<u8>>>,
    write_calls: Rc<RefCell<usize>>,
}

impl FakePeer {
    fn new(id: usize) -> Self {
        Self {
            id,
            ready: false,
            reads: VecDeque::new(),
            write_mode: WriteMode::Accept,
            received: Rc::new(RefCell::new(Vec::new())),
            write_calls: Rc::new(RefCell::new(0)),
        }
    }

    fn sending(mut self, read: Read) -> Self {
        self.reads.push_back(read);
        self.ready = true;
        self
    }

    fn writes(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    fn inbox(&self) -> Rc<RefCell<Vec<u8>>> {
        self.received.clone()
    }
}

impl Endpoint for FakePeer {
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
        match self.reads.pop_front() {
            Some(Read::Data(mut bytes)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                if len < bytes.len() {
                    let rest = bytes.split_off(len);
                    self.reads.push_front(Read::Data(rest));
                }
                Ok(len)
            }
            Some(Read::Eof) => Ok(0),
            Some(Read::Fail(kind)) => Err(kind.into()),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        *self.write_calls.borrow_mut() += 1;
        match self.write_mode {
            WriteMode::Accept => {
                self.received.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            WriteMode::Fail(kind) => Err(kind.into()),
            WriteMode::Limit(limit) => {
                let room = limit.saturating_sub(self.received.borrow().len());
                if room == 0 {
                    return Err(ErrorKind::WouldBlock.into());
                }
                let len = room.min(buf.len());
                self.received.borrow_mut().extend_from_slice(&buf[..len]);
                Ok(len)
            }
            WriteMode::InterruptOnce => {
                self.write_mode = WriteMode::Accept;
                Err(ErrorKind::Interrupted.into())
            }
        }
    }
}

const LISTENER: usize = 1;

fn set_of(peers: Vec<FakePeer>) -> ConnectionSet<FakePeer> {
    let mut set = ConnectionSet::new(5);
    set.add(FakePeer::new(LISTENER).writes(WriteMode::Fail(ErrorKind::InvalidInput)))
        .unwrap();
    for peer in peers {
        set.add(peer).unwrap();
    }
    set
}

fn ids(set: &ConnectionSet<FakePeer>) -> Vec<usize> {
    set.iter().map(|peer| peer.id()).collect()
}

// ============================================================================
// Broadcast
// ============================================================================

#[test]
fn chunk_goes_to_everyone_but_sender_and_listener() {
    let a = FakePeer::new(10).sending(Read::Data(b"hi".to_vec()));
    let b = FakePeer::new(11);
    let c = FakePeer::new(12);
    let (a_inbox, b_inbox, c_inbox) = (a.inbox(), b.inbox(), c.inbox());
    let mut set = set_of(vec![a, b, c]);
    let listener_calls = set[0].write_calls.clone();

    let mut buf = [0u8; 256];
    let events = service_clients(&mut set, &mut buf, |_| panic!("nothing should be evicted"));

    assert_eq!(
        events,
        vec![RelayEvent::Relayed {
            from: 10,
            len: 2,
            delivered: 2,
            failed: 0
        }]
    );
    assert_eq!(&*b_inbox.borrow(), b"hi");
    assert_eq!(&*c_inbox.borrow(), b"hi");
    assert!(a_inbox.borrow().is_empty());
    assert_eq!(*listener_calls.borrow(), 0);
}

#[test]
fn failed_destination_does_not_block_the_rest() {
    let a = FakePeer::new(10);
    let b = FakePeer::new(11).writes(WriteMode::Fail(ErrorKind::BrokenPipe));
    let c = FakePeer::new(12).writes(WriteMode::Fail(ErrorKind::Other));
    let d = FakePeer::new(13);
    let d_inbox = d.inbox();
    let b_calls = b.write_calls.clone();
    let mut set = set_of(vec![a, b, c, d]);

    let (delivered, failed) = broadcast(&mut set, 10, b"payload");

    assert_eq!((delivered, failed), (1, 2));
    assert_eq!(&*d_inbox.borrow(), b"payload");
    assert_eq!(*b_calls.borrow(), 1, "each destination is tried exactly once");
    assert_eq!(ids(&set), vec![LISTENER, 10, 11, 12, 13], "failed writes do not evict");
}

#[test]
fn broadcast_with_no_other_clients() {
    let mut set = set_of(vec![FakePeer::new(10)]);
    assert_eq!(broadcast(&mut set, 10, b"alone"), (0, 0));
}

#[test]
fn short_write_is_partial() {
    let mut dest = FakePeer::new(10).writes(WriteMode::Limit(3));
    assert_eq!(write_chunk(&mut dest, b"abcdef"), Delivery::Partial { written: 3 });
    assert_eq!(write_chunk(&mut dest, b"more"), Delivery::Failed);
    assert_eq!(&*dest.received.borrow(), b"abc");
}

#[test]
fn interrupted_write_is_retried() {
    let mut dest = FakePeer::new(10).writes(WriteMode::InterruptOnce);
    assert_eq!(write_chunk(&mut dest, b"abc"), Delivery::Complete);
    assert_eq!(&*dest.received.borrow(), b"abc");
    assert_eq!(*dest.write_calls.borrow(), 2);
}

// ============================================================================
// Scan and Eviction
// ============================================================================

#[test]
fn end_of_stream_evicts_sender() {
    let a = FakePeer::new(10).sending(Read::Eof);
    let b = FakePeer::new(11);
    let c = FakePeer::new(12);
    let mut set = set_of(vec![a, b, c]);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    let events = service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));

    assert_eq!(events, vec![RelayEvent::Evicted { id: 10 }]);
    assert_eq!(evicted, vec![10]);
    assert_eq!(set.len(), 3);
    assert_eq!(ids(&set), vec![LISTENER, 12, 11], "last client moves into the freed slot");
}

#[test]
fn read_error_evicts() {
    let a = FakePeer::new(10).sending(Read::Fail(ErrorKind::ConnectionReset));
    let b = FakePeer::new(11).sending(Read::Fail(ErrorKind::Other));
    let mut set = set_of(vec![a, b]);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));

    evicted.sort_unstable();
    assert_eq!(evicted, vec![10, 11]);
    assert_eq!(ids(&set), vec![LISTENER]);
}

#[test]
fn swapped_in_client_is_serviced_in_same_scan() {
    // [L, A(eof), B, C(eof), D(data)]
    let a = FakePeer::new(10).sending(Read::Eof);
    let b = FakePeer::new(11);
    let c = FakePeer::new(12).sending(Read::Eof);
    let d = FakePeer::new(13).sending(Read::Data(b"x".to_vec()));
    let (b_inbox, c_inbox) = (b.inbox(), c.inbox());
    let mut set = set_of(vec![a, b, c, d]);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    let events = service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));

    // Evicting A moves D into slot 1, which is examined before moving on
    assert_eq!(
        events,
        vec![
            RelayEvent::Evicted { id: 10 },
            RelayEvent::Relayed {
                from: 13,
                len: 1,
                delivered: 2,
                failed: 0
            },
            RelayEvent::Evicted { id: 12 },
        ]
    );
    assert_eq!(evicted, vec![10, 12]);
    assert_eq!(ids(&set), vec![LISTENER, 13, 11]);
    assert_eq!(&*b_inbox.borrow(), b"x");
    assert_eq!(&*c_inbox.borrow(), b"x");
}

#[test]
fn every_client_evicted_in_one_scan() {
    let peers = (10..20).map(|id| FakePeer::new(id).sending(Read::Eof)).collect();
    let mut set = set_of(peers);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));

    evicted.sort_unstable();
    assert_eq!(evicted, (10..20).collect::<Vec<_>>());
    assert_eq!(ids(&set), vec![LISTENER]);
}

#[test]
fn idle_clients_are_skipped() {
    let a = FakePeer::new(10);
    let b = FakePeer::new(11);
    let mut set = set_of(vec![a, b]);

    let mut buf = [0u8; 256];
    let events = service_clients(&mut set, &mut buf, |_| panic!("nothing should be evicted"));
    assert!(events.is_empty());
}

#[test]
fn would_block_clears_readiness_without_eviction() {
    let mut a = FakePeer::new(10);
    a.ready = true; // Ready but nothing queued
    let mut set = set_of(vec![a]);

    let mut buf = [0u8; 256];
    let events = service_clients(&mut set, &mut buf, |_| panic!("nothing should be evicted"));

    assert!(events.is_empty());
    assert!(!set[1].is_ready());
    assert_eq!(set.len(), 2);
}

#[test]
fn large_message_is_relayed_in_bounded_chunks() {
    let message: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
    let a = FakePeer::new(10).sending(Read::Data(message.clone()));
    let b = FakePeer::new(11);
    let b_inbox = b.inbox();
    let mut set = set_of(vec![a, b]);

    let mut buf = [0u8; 256];
    let mut lens = Vec::new();
    for _ in 0..3 {
        for event in service_clients(&mut set, &mut buf, |_| panic!("nothing should be evicted")) {
            if let RelayEvent::Relayed { len, .. } = event {
                lens.push(len);
            }
        }
    }

    assert_eq!(lens, vec![256, 256, 88]);
    assert_eq!(*b_inbox.borrow(), message);
    assert!(set[1].is_ready(), "not drained until a read would block");

    let events = service_clients(&mut set, &mut buf, |_| panic!("nothing should be evicted"));
    assert!(events.is_empty());
    assert!(!set[1].is_ready());
}

#[test]
fn data_read_keeps_readiness() {
    let a = FakePeer::new(10).sending(Read::Data(vec![7u8; 4]));
    let b = FakePeer::new(11).sending(Read::Data(vec![7u8; 2]));
    let mut set = set_of(vec![a, b]);

    let mut buf = [0u8; 4];
    service_clients(&mut set, &mut buf, |_| {});
    assert!(set[1].is_ready(), "full read");
    assert!(set[2].is_ready(), "short read");

    let events = service_clients(&mut set, &mut buf, |_| {});
    assert!(events.is_empty());
    assert!(!set[1].is_ready());
    assert!(!set[2].is_ready());
}

#[test]
fn end_of_stream_behind_short_read_evicts() {
    // Data and FIN arrive together: one readiness mark covers both
    let a = FakePeer::new(10).sending(Read::Data(b"bye".to_vec())).sending(Read::Eof);
    let b = FakePeer::new(11);
    let b_inbox = b.inbox();
    let mut set = set_of(vec![a, b]);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    let first = service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));
    assert!(matches!(first.as_slice(), [RelayEvent::Relayed { from: 10, len: 3, .. }]));
    assert!(evicted.is_empty());

    // No new readiness mark in between
    let second = service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));
    assert_eq!(second, vec![RelayEvent::Evicted { id: 10 }]);
    assert_eq!(evicted, vec![10]);
    assert_eq!(ids(&set), vec![LISTENER, 11]);
    assert_eq!(&*b_inbox.borrow(), b"bye");
}

#[test]
fn end_of_stream_after_long_message_evicts() {
    let message = vec![1u8; 300];
    let a = FakePeer::new(10).sending(Read::Data(message.clone())).sending(Read::Eof);
    let b = FakePeer::new(11);
    let b_inbox = b.inbox();
    let mut set = set_of(vec![a, b]);

    let mut evicted = Vec::new();
    let mut buf = [0u8; 256];
    for _ in 0..3 {
        service_clients(&mut set, &mut buf, |peer| evicted.push(peer.id()));
    }

    assert_eq!(evicted, vec![10]);
    assert_eq!(ids(&set), vec![LISTENER, 11]);
    assert_eq!(*b_inbox.borrow(), message);
}
