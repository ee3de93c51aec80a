/*
 * rangedl - Parallel HTTP/1.1 range-based file downloader.
 * Copyright (C) 2025  compiledkernel-idk and rangedl contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The demultiplexing engine: one cooperative, single-threaded poll loop
//! that dispatches range requests, pulls completed responses off whichever
//! socket became readable, hands their bodies to the ordered writer, and
//! asks the active stall detector whether any in-flight request needs
//! duplicating onto a fresh connection.

use crate::config::{Config, POLL_CAP_MS, RECV_CHUNK};
use crate::error::{RangedlError, Result};
use crate::health;
use crate::http;
use crate::mirror::MirrorTarget;
use crate::plan::{Block, FilePlan};
use crate::pool::{ConnectionId, ConnectionPool};
use crate::writer::OrderedWriter;
use mio::Events;
use std::time::Duration;
use tracing::{debug, warn};

/// Build the verbatim `GET` request for `block` against `target`.
fn build_request(target: &MirrorTarget, block: &Block) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nRange: {range}\r\nConnection: keep-alive\r\nUser-Agent: rangedl/0.1\r\n\r\n",
        path = target.path,
        host = target.host,
        range = block.range_header(),
    )
    .into_bytes()
}

pub struct Engine {
    pool: ConnectionPool,
    plan: FilePlan,
    config: Config,
    next_block: usize,
}

impl Engine {
    pub fn new(pool: ConnectionPool, plan: FilePlan, config: Config) -> Self {
        Self {
            pool,
            plan,
            config,
            next_block: 0,
        }
    }

    /// Assign the next unclaimed block to `id`. Returns `false` (leaving
    /// the connection idle, with `assigned_block` cleared so the health
    /// tracker no longer treats it as having an outstanding request) once
    /// every block has been dispatched at least once.
    fn dispatch_next(&mut self, id: ConnectionId) -> Result<bool> {
        if self.next_block >= self.plan.total_blocks() {
            self.pool.record_mut(id)?.assigned_block = None;
            return Ok(false);
        }
        let index = self.next_block;
        let block = *self
            .plan
            .block(index)
            .expect("index bounded by total_blocks");
        let mirror_index = self.pool.record(id)?.mirror_index;
        let request = build_request(self.pool.mirror(mirror_index), &block);
        self.pool.send_request(id, &request, index)?;
        self.next_block += 1;
        Ok(true)
    }

    /// Resend `id`'s already-recorded `request_buf` verbatim, used after a
    /// stall-triggered re-establishment duplicates an in-flight request
    /// rather than advancing to a new block.
    fn resend(&mut self, id: ConnectionId) -> Result<()> {
        let record = self.pool.record(id)?;
        let request = record.request_buf.clone();
        let block = record
            .assigned_block
            .expect("resend only called for connections with an outstanding request");
        self.pool.send_request(id, &request, block)
    }

    /// Run the engine until every block has been written to `writer`,
    /// invoking `on_progress` with the cumulative byte count after each
    /// drain that wrote anything.
    pub fn run(&mut self, writer: &mut OrderedWriter, mut on_progress: impl FnMut(u64)) -> Result<()> {
        if self.plan.total_blocks() == 0 {
            return Ok(());
        }

        for id in self.pool.ids().to_vec() {
            self.dispatch_next(id)?;
        }

        let mut events = Events::with_capacity(self.pool.len().max(1));
        while !writer.is_complete() {
            self.pool
                .poll_mut()
                .poll(&mut events, Some(Duration::from_millis(POLL_CAP_MS)))
                .map_err(|e| RangedlError::io("polling sockets", e))?;

            for event in events.iter() {
                let id = ConnectionId(event.token().0);
                loop {
                    let n = match self.pool.recv_into_buffer(id, RECV_CHUNK) {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(connection = id.0, error = %e, "read error, re-establishing");
                            self.handle_broken(id)?;
                            break;
                        }
                    };
                    if n == 0 {
                        break;
                    }
                }
            }

            for id in self.pool.ids().to_vec() {
                self.try_complete(id, writer)?;
            }

            let stalled = health::detect_stalls(
                &self.pool,
                self.config.algorithm,
                self.config.weight_v1,
                self.config.weight_v2,
                self.config.timeout_secs,
            );
            for id in stalled {
                debug!(connection = id.0, "stall detected, duplicating request");
                self.handle_broken(id)?;
            }

            if writer.drain()? > 0 {
                on_progress(writer.total_bytes());
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Re-establish a connection (stalled or broken) on a fresh socket and
    /// resend its outstanding request.
    fn handle_broken(&mut self, id: ConnectionId) -> Result<()> {
        let had_request = self
            .pool
            .record(id)
            .map(|r| r.assigned_block.is_some())
            .unwrap_or(false);
        let new_id = self.pool.re_establish(id)?;
        if had_request {
            self.resend(new_id)?;
        }
        Ok(())
    }

    /// Check whether `id`'s buffered bytes now hold a complete response; if
    /// so, hand the block to `writer`, refresh stall bookkeeping, and
    /// dispatch the next block (or leave the connection idle).
    fn try_complete(&mut self, id: ConnectionId, writer: &mut OrderedWriter) -> Result<()> {
        let Some(assigned) = self.pool.record(id)?.assigned_block else {
            return Ok(());
        };
        let expected_len = self
            .plan
            .block_len(assigned)
            .expect("assigned block index is always in range");

        let buf = self.pool.record(id)?.recv_buf.clone();
        let (header, body) = match http::separate_header(&buf) {
            Ok(parts) => parts,
            Err(RangedlError::SeparateHeader) => return Ok(()),
            Err(e) => return Err(e),
        };
        if (body.len() as u64) < expected_len {
            return Ok(());
        }

        http::check_status(header)?;
        let reported_index = match http::get_order(header, self.plan.chunk_size) {
            Ok(index) => index as usize,
            Err(RangedlError::GetOrder) => return Ok(()),
            Err(e) => return Err(e),
        };

        // `Content-Range` is the sole oracle tying this response back to a
        // planned block -- never this connection's own bookkeeping of what
        // it last asked for. A mismatch still means a dispatched request
        // went unanswered on this socket, so bytes keep accumulating in
        // `recv_buf` for it rather than being discarded.
        if reported_index != assigned {
            warn!(
                connection = id.0,
                assigned, reported_index, "mirror returned a different block than requested"
            );
        }
        let Some(write_len) = self.plan.block_len(reported_index) else {
            warn!(connection = id.0, reported_index, "block index out of range, ignoring response");
            return Ok(());
        };
        if (body.len() as u64) < write_len {
            return Ok(());
        }

        let block_bytes = body[..write_len as usize].to_vec();
        let leftover = body[write_len as usize..].to_vec();

        // All bookkeeping -- handing the block to the writer, clearing the
        // receive buffer, and refreshing the stall counters -- happens
        // before dispatching the next request, so a connection that
        // immediately goes idle (no more blocks left) still leaves the
        // pool and writer in a consistent state.
        writer.submit(reported_index, block_bytes);
        {
            let record = self.pool.record_mut(id)?;
            record.recv_buf = leftover;
            record.total_bytes += write_len;
        }
        health::bump_stacks(&mut self.pool, id);

        self.dispatch_next(id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorTarget;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_range(listener: TcpListener, total: u64, body: &'static [u8]) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let mut buf = [0u8; 1024];
                loop {
                    let n = match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let req = String::from_utf8_lossy(&buf[..n]);
                    let range = req
                        .lines()
                        .find_map(|l| l.strip_prefix("Range: bytes="))
                        .unwrap_or("0-0")
                        .trim()
                        .to_string();
                    let mut parts = range.split('-');
                    let lo: usize = parts.next().unwrap().parse().unwrap();
                    let hi: usize = parts.next().unwrap().parse().unwrap();
                    let chunk = &body[lo..=hi.min(body.len() - 1)];
                    let resp = format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {lo}-{hi}/{total}\r\n\r\n"
                    );
                    let _ = stream.write_all(resp.as_bytes());
                    let _ = stream.write_all(chunk);
                }
            }
        });
    }

    #[test]
    fn downloads_all_blocks_in_order() {
        let body: &'static [u8] = b"AAAABBBBCCCCDDDD";
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        serve_range(listener, body.len() as u64, body);

        let target = MirrorTarget {
            url: format!("http://{addr}/f"),
            host: "127.0.0.1".into(),
            port: addr.port(),
            path: "/f".into(),
            address: addr,
        };

        let plan = FilePlan::new(body.len() as u64, 4, 4);
        let pool = ConnectionPool::new(vec![target], 4).unwrap();
        let config = Config::default();
        let mut engine = Engine::new(pool, plan.clone(), config);

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.bin");
        let file = std::fs::File::create(&out_path).unwrap();
        let mut writer = OrderedWriter::new(file, plan.total_blocks());

        engine.run(&mut writer, |_| {}).unwrap();

        let mut contents = Vec::new();
        std::fs::File::open(&out_path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, body);
    }

    #[test]
    fn dispatch_next_clears_assigned_block_once_blocks_exhausted() {
        let body: &'static [u8] = b"DATA";
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        serve_range(listener, body.len() as u64, body);

        let target = MirrorTarget {
            url: format!("http://{addr}/f"),
            host: "127.0.0.1".into(),
            port: addr.port(),
            path: "/f".into(),
            address: addr,
        };
        let plan = FilePlan::new(body.len() as u64, body.len() as u64, 1);
        let pool = ConnectionPool::new(vec![target], 1).unwrap();
        let mut engine = Engine::new(pool, plan, Config::default());
        let id = engine.pool.ids()[0];

        assert!(engine.dispatch_next(id).unwrap());
        assert!(engine.pool.record(id).unwrap().assigned_block.is_some());

        assert!(!engine.dispatch_next(id).unwrap());
        assert!(engine.pool.record(id).unwrap().assigned_block.is_none());
    }

    #[test]
    fn try_complete_skips_response_without_content_range() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || {
            let _ = listener.accept();
        });

        let target = MirrorTarget {
            url: format!("http://{addr}/f"),
            host: "127.0.0.1".into(),
            port: addr.port(),
            path: "/f".into(),
            address: addr,
        };
        let plan = FilePlan::new(4, 4, 1);
        let pool = ConnectionPool::new(vec![target], 1).unwrap();
        let mut engine = Engine::new(pool, plan.clone(), Config::default());
        let id = engine.pool.ids()[0];
        engine.dispatch_next(id).unwrap();
        engine.pool.record_mut(id).unwrap().recv_buf =
            b"HTTP/1.1 206 Partial Content\r\n\r\nDATA".to_vec();

        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("out.bin")).unwrap();
        let mut writer = OrderedWriter::new(file, plan.total_blocks());

        // A 206 with no Content-Range is GetOrderError, a local/skip
        // condition per spec -- it must not abort the download.
        assert!(engine.try_complete(id, &mut writer).is_ok());
        assert!(!writer.is_complete());

        accept.join().unwrap();
    }

    #[test]
    fn try_complete_trusts_content_range_over_the_connections_own_assignment() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || {
            let _ = listener.accept();
        });

        let target = MirrorTarget {
            url: format!("http://{addr}/f"),
            host: "127.0.0.1".into(),
            port: addr.port(),
            path: "/f".into(),
            address: addr,
        };
        // length=8, chunk_size=4: two same-sized blocks, no tail.
        let plan = FilePlan::new(8, 4, 2);
        let pool = ConnectionPool::new(vec![target], 1).unwrap();
        let mut engine = Engine::new(pool, plan.clone(), Config::default());
        let id = engine.pool.ids()[0];
        engine.dispatch_next(id).unwrap();

        {
            let record = engine.pool.record_mut(id).unwrap();
            // This connection believes it asked for block 0, but the
            // response it got back names block 1 via Content-Range.
            record.assigned_block = Some(0);
            record.recv_buf =
                b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 4-7/8\r\n\r\nWXYZ".to_vec();
        }

        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("out.bin")).unwrap();
        let mut writer = OrderedWriter::new(file, plan.total_blocks());
        engine.try_complete(id, &mut writer).unwrap();

        // Block 1 landed, but block 0 is still missing so nothing drains yet.
        assert_eq!(writer.drain().unwrap(), 0);
        writer.submit(0, b"ABCD".to_vec());
        assert_eq!(writer.drain().unwrap(), 8);

        accept.join().unwrap();
    }
}
