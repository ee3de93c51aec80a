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

//! Stall detection. A connection is "stalled" when its peer has gone quiet
//! while others keep delivering; once flagged, the engine duplicates its
//! in-flight request onto a fresh connection without giving up the original.
//!
//! Three interchangeable algorithms are offered, selectable via
//! [`crate::config::Config`]:
//!
//! - `StackV1`: fires once the sum of every connection's stack counter
//!   exceeds `weight_v1 * num_connections`, duplicating only the single
//!   handle with the highest `stack` (ties broken by iteration order).
//! - `StackV2`: fires per-connection once that connection's stack counter
//!   reaches `weight_v2 * mean(all stacks)`.
//! - `Timeout`: fires per-connection once `timeout_secs` have elapsed since
//!   that connection last received any bytes.

use crate::pool::{ConnectionId, ConnectionPool};
use serde::Deserialize;
use std::time::Instant;

/// Which stall-detection algorithm is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallAlgorithm {
    StackV1,
    StackV2,
    Timeout,
}

/// Increment every connection's `stack` counter except `fresh`, which is
/// the connection that just delivered a complete response. Called once per
/// completed block, per spec §4.6.
pub fn bump_stacks(pool: &mut ConnectionPool, fresh: ConnectionId) {
    let ids: Vec<ConnectionId> = pool.ids().to_vec();
    for id in ids {
        if id == fresh {
            continue;
        }
        if let Ok(record) = pool.record_mut(id) {
            record.stack += 1;
        }
    }
    if let Ok(record) = pool.record_mut(fresh) {
        record.stack = 0;
    }
}

/// Evaluate the active algorithm and return the connection ids (if any)
/// whose in-flight request should be duplicated onto a fresh connection.
///
/// `StackV1`'s trigger is global (the sum across every connection) but its
/// target is a single handle -- the worst-lagging one; `StackV2` and
/// `Timeout` evaluate and target each connection independently.
pub fn detect_stalls(
    pool: &ConnectionPool,
    algorithm: StallAlgorithm,
    weight_v1: f64,
    weight_v2: f64,
    timeout_secs: u64,
) -> Vec<ConnectionId> {
    match algorithm {
        StallAlgorithm::StackV1 => detect_stack_v1(pool, weight_v1),
        StallAlgorithm::StackV2 => detect_stack_v2(pool, weight_v2),
        StallAlgorithm::Timeout => detect_timeout(pool, timeout_secs),
    }
}

fn detect_stack_v1(pool: &ConnectionPool, weight: f64) -> Vec<ConnectionId> {
    let ids = pool.ids();
    if ids.is_empty() {
        return Vec::new();
    }
    let sum: u64 = ids
        .iter()
        .filter_map(|id| pool.record(*id).ok())
        .map(|r| r.stack)
        .sum();
    let threshold = weight * ids.len() as f64;
    if (sum as f64) <= threshold {
        return Vec::new();
    }
    // Global trigger, single-handle target: the worst-lagging connection,
    // ties broken by iteration order, exactly as the original's
    // `max(self._stack.items(), key=lambda x: x[1])[0]`. `max_by_key`
    // keeps the *last* maximum on ties, so the winner is folded by hand to
    // keep the *first*.
    let mut winner: Option<(ConnectionId, u64)> = None;
    for id in ids {
        let Ok(record) = pool.record(*id) else {
            continue;
        };
        if record.assigned_block.is_none() {
            continue;
        }
        match winner {
            Some((_, best)) if record.stack <= best => {}
            _ => winner = Some((*id, record.stack)),
        }
    }
    winner.map(|(id, _)| id).into_iter().collect()
}

fn detect_stack_v2(pool: &ConnectionPool, weight: f64) -> Vec<ConnectionId> {
    let ids = pool.ids();
    if ids.is_empty() {
        return Vec::new();
    }
    let stacks: Vec<u64> = ids
        .iter()
        .filter_map(|id| pool.record(*id).ok())
        .map(|r| r.stack)
        .collect();
    if stacks.is_empty() {
        return Vec::new();
    }
    let mean = stacks.iter().sum::<u64>() as f64 / stacks.len() as f64;
    let threshold = mean * weight;
    ids.iter()
        .filter(|id| {
            pool.record(**id)
                .map(|r| r.assigned_block.is_some() && (r.stack as f64) >= threshold)
                .unwrap_or(false)
        })
        .copied()
        .collect()
}

fn detect_timeout(pool: &ConnectionPool, timeout_secs: u64) -> Vec<ConnectionId> {
    let now = Instant::now();
    pool.ids()
        .iter()
        .filter(|id| {
            pool.record(**id)
                .map(|r| {
                    r.assigned_block.is_some()
                        && now.duration_since(r.last_recv_time).as_secs() >= timeout_secs
                })
                .unwrap_or(false)
        })
        .copied()
        .collect()
}
