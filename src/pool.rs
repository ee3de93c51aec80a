/*
 * rangedl - Parallel HTTP/1.1 range-based file downloader.
 * Copyright (C) 2025  compiledkernel-idk and rangedl contributors
 */

//! Non-blocking TCP connection pool. Connections are addressed by an
//! internally assigned, monotonically increasing [`ConnectionId`] rather
//! than by raw socket/fd, so the health tracker's bookkeeping survives
//! re-establishment cleanly (spec §9's handle-stability design note).

use crate::error::{RangedlError, Result};
use crate::mirror::MirrorTarget;
use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::time::{Duration, Instant};
use tracing::debug;

/// Opaque handle to a connection, stable across re-establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    fn token(self) -> Token {
        Token(self.0)
    }
}

/// Per-socket state, as specified in §3.
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub socket: MioTcpStream,
    pub mirror_index: usize,
    /// Bytes received since the last completed response was parsed.
    pub recv_buf: Vec<u8>,
    /// Verbatim bytes of the most recently sent request, kept so a
    /// duplicate request can be resent on a fresh socket.
    pub request_buf: Vec<u8>,
    /// Freshness counter: 0 right after this socket delivers, incremented
    /// whenever any other socket delivers.
    pub stack: u64,
    pub last_recv_time: Instant,
    pub total_bytes: u64,
    /// Block index this connection's outstanding request is for, if any.
    pub assigned_block: Option<usize>,
}

/// Pool of non-blocking connections distributed round-robin across
/// mirrors.
pub struct ConnectionPool {
    poll: Poll,
    records: HashMap<ConnectionId, ConnectionRecord>,
    order: Vec<ConnectionId>,
    mirrors: Vec<MirrorTarget>,
    next_id: usize,
}

/// Connect timeout for opening (and re-opening) sockets.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl ConnectionPool {
    /// Open `num` connections distributed round-robin across `mirrors`:
    /// `floor(num/M)` per mirror plus one extra to the first `num mod M`
    /// mirrors, per spec §4.3.
    pub fn new(mirrors: Vec<MirrorTarget>, num: usize) -> Result<Self> {
        if mirrors.is_empty() {
            return Err(RangedlError::NoMirrors);
        }
        let poll = Poll::new().map_err(|e| RangedlError::io("creating poll", e))?;
        let mut pool = Self {
            poll,
            records: HashMap::new(),
            order: Vec::new(),
            mirrors,
            next_id: 0,
        };

        let m = pool.mirrors.len();
        let base = num / m;
        let extra = num % m;
        let mut mirror_index = 0usize;
        let mut opened = 0usize;
        for mi in 0..m {
            let count = base + if mi < extra { 1 } else { 0 };
            for _ in 0..count {
                pool.open(mi)?;
                opened += 1;
            }
            mirror_index = mi;
        }
        let _ = mirror_index;
        debug_assert_eq!(opened, num);
        Ok(pool)
    }

    fn open(&mut self, mirror_index: usize) -> Result<ConnectionId> {
        let address = self.mirrors[mirror_index].address;
        let std_stream = StdTcpStream::connect_timeout(&address, CONNECT_TIMEOUT)
            .map_err(|e| RangedlError::io(format!("connecting to {address}"), e))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| RangedlError::io("set_nonblocking", e))?;
        let mut socket = MioTcpStream::from_std(std_stream);

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        self.poll
            .registry()
            .register(&mut socket, id.token(), Interest::READABLE)
            .map_err(|e| RangedlError::io("registering socket", e))?;

        self.records.insert(
            id,
            ConnectionRecord {
                id,
                socket,
                mirror_index,
                recv_buf: Vec::new(),
                request_buf: Vec::new(),
                stack: 0,
                last_recv_time: Instant::now(),
                total_bytes: 0,
                assigned_block: None,
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Replace `old` with a freshly connected socket to the same mirror,
    /// carrying `request_buf` and `assigned_block` forward; everything
    /// else (stack, timestamp, buffered bytes) resets, per spec §9.
    pub fn re_establish(&mut self, old: ConnectionId) -> Result<ConnectionId> {
        let old_record = self
            .records
            .get(&old)
            .ok_or_else(|| RangedlError::Probe {
                url: String::new(),
                message: "unknown connection id".to_string(),
            })?;
        let mirror_index = old_record.mirror_index;
        let request_buf = old_record.request_buf.clone();
        let assigned_block = old_record.assigned_block;

        let new_id = self.open(mirror_index)?;

        if let Some(mut old) = self.records.remove(&old) {
            let _ = self.poll.registry().deregister(&mut old.socket);
        }
        self.order.retain(|id| *id != old);

        if let Some(rec) = self.records.get_mut(&new_id) {
            rec.request_buf = request_buf;
            rec.assigned_block = assigned_block;
        }
        Ok(new_id)
    }

    /// Send `request` verbatim on `id`, looping on partial writes. Stores
    /// the bytes in `request_buf` for later duplicate dispatch.
    pub fn send_request(&mut self, id: ConnectionId, request: &[u8], block: usize) -> Result<()> {
        debug!(
            connection = id.0,
            block,
            request = %String::from_utf8_lossy(request),
            "sending range request"
        );
        let record = self.record_mut(id)?;
        record.request_buf = request.to_vec();
        record.assigned_block = Some(block);

        let mut sent = 0usize;
        let mut attempts = 0;
        while sent < request.len() {
            match record.socket.write(&request[sent..]) {
                Ok(0) => {
                    return Err(RangedlError::io(
                        "socket closed mid-request",
                        std::io::Error::from(std::io::ErrorKind::WriteZero),
                    ))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    attempts += 1;
                    if attempts > 1000 {
                        return Err(RangedlError::io("send stalled", e));
                    }
                    std::thread::sleep(Duration::from_micros(100));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RangedlError::io("writing request", e)),
            }
        }
        Ok(())
    }

    /// Drain up to `RECV_CHUNK` bytes from `id` into its `recv_buf`.
    /// Returns the number of bytes read (0 means would-block / nothing new).
    pub fn recv_into_buffer(&mut self, id: ConnectionId, chunk: usize) -> Result<usize> {
        let record = self.record_mut(id)?;
        let mut tmp = vec![0u8; chunk];
        match record.socket.read(&mut tmp) {
            Ok(0) => Ok(0),
            Ok(n) => {
                record.recv_buf.extend_from_slice(&tmp[..n]);
                record.last_recv_time = Instant::now();
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(RangedlError::io("reading socket", e)),
        }
    }

    pub fn record(&self, id: ConnectionId) -> Result<&ConnectionRecord> {
        self.records.get(&id).ok_or_else(|| RangedlError::Probe {
            url: String::new(),
            message: "unknown connection id".to_string(),
        })
    }

    pub fn record_mut(&mut self, id: ConnectionId) -> Result<&mut ConnectionRecord> {
        self.records.get_mut(&id).ok_or_else(|| RangedlError::Probe {
            url: String::new(),
            message: "unknown connection id".to_string(),
        })
    }

    /// All connection ids currently open, in the order they were first
    /// established (used for the initial dispatch burst and for "iterate
    /// over all sockets" scans, per spec §4.5).
    pub fn ids(&self) -> &[ConnectionId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn mirror_url(&self, mirror_index: usize) -> &str {
        &self.mirrors[mirror_index].url
    }

    pub fn mirror(&self, mirror_index: usize) -> &MirrorTarget {
        &self.mirrors[mirror_index]
    }

    pub fn poll_mut(&mut self) -> &mut Poll {
        &mut self.poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    fn loopback_listener() -> (TcpListener, MirrorTarget) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let target = MirrorTarget {
            url: format!("http://{addr}/file.bin"),
            host: "127.0.0.1".into(),
            port: addr.port(),
            path: "/file.bin".into(),
            address: addr,
        };
        (listener, target)
    }

    #[test]
    fn round_robin_distribution_across_mirrors() {
        let (listener_a, target_a) = loopback_listener();
        let (listener_b, target_b) = loopback_listener();

        let accept_a = thread::spawn(move || {
            for _ in 0..2 {
                let _ = listener_a.accept();
            }
        });
        let accept_b = thread::spawn(move || {
            for _ in 0..1 {
                let _ = listener_b.accept();
            }
        });

        let pool = ConnectionPool::new(vec![target_a, target_b], 3).unwrap();
        assert_eq!(pool.len(), 3);
        let mirror_a_count = pool
            .ids()
            .iter()
            .filter(|id| pool.record(**id).unwrap().mirror_index == 0)
            .count();
        assert_eq!(mirror_a_count, 2);

        accept_a.join().unwrap();
        accept_b.join().unwrap();
    }

    #[test]
    fn send_and_recv_round_trip() {
        let (listener, target) = loopback_listener();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"GET /file.bin"));
            stream
                .write_all(b"HTTP/1.1 206 Partial Content\r\n\r\nHELLO")
                .unwrap();
        });

        let mut pool = ConnectionPool::new(vec![target], 1).unwrap();
        let id = pool.ids()[0];
        pool.send_request(id, b"GET /file.bin HTTP/1.1\r\n\r\n", 0)
            .unwrap();

        let mut total = Vec::new();
        for _ in 0..100 {
            let n = pool.recv_into_buffer(id, 4096).unwrap();
            if n > 0 {
                total.extend_from_slice(&pool.record(id).unwrap().recv_buf);
                if total.ends_with(b"HELLO") {
                    break;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.record(id).unwrap().recv_buf.ends_with(b"HELLO"));
        server.join().unwrap();
    }

    #[test]
    fn re_establish_preserves_request_buf_and_resets_stack() {
        let (listener, target) = loopback_listener();
        let accept = thread::spawn(move || {
            for _ in 0..2 {
                let _ = listener.accept();
            }
        });

        let mut pool = ConnectionPool::new(vec![target], 1).unwrap();
        let old_id = pool.ids()[0];
        pool.send_request(old_id, b"GET / HTTP/1.1\r\n\r\n", 3).unwrap();
        pool.record_mut(old_id).unwrap().stack = 42;

        let new_id = pool.re_establish(old_id).unwrap();
        assert_ne!(new_id, old_id);
        assert!(pool.record(old_id).is_err());
        let new_record = pool.record(new_id).unwrap();
        assert_eq!(new_record.request_buf, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(new_record.assigned_block, Some(3));
        assert_eq!(new_record.stack, 0);

        accept.join().unwrap();
    }
}
