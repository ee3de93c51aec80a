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

//! Configuration for the health tracker and engine internals, with optional
//! overrides from a `rangedl.toml` in the working directory. CLI flags
//! always win over the file; the file exists so the stall-detection
//! algorithm can be tuned without a rebuild.

use crate::error::{RangedlError, Result};
use crate::health::StallAlgorithm;
use serde::Deserialize;
use std::path::Path;

/// Hard cap on simultaneous connections, per spec.
pub const MAX_CONNECTIONS: usize = 10;

/// Default part size when the user requests 0 (1,000,000 bytes).
pub const DEFAULT_PART_SIZE: u64 = 1_000_000;

/// Bytes read per `recv` call in the receive loop.
pub const RECV_CHUNK: usize = 32 * 1024;

/// Upper bound on how long the demultiplexer blocks per iteration, so the
/// `Timeout` stall detector can still fire with no socket activity.
pub const POLL_CAP_MS: u64 = 1000;

fn default_algorithm() -> StallAlgorithm {
    StallAlgorithm::StackV1
}

fn default_weight_v1() -> f64 {
    10.0
}

fn default_weight_v2() -> f64 {
    5.0
}

fn default_timeout_secs() -> u64 {
    5
}

/// Tunable engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which stall detector is active.
    #[serde(rename = "algorithm")]
    pub algorithm: StallAlgorithm,
    /// Weight for STACK_V1 (threshold = weight * num connections).
    pub weight_v1: f64,
    /// Weight for STACK_V2 (duplicate when stack >= mean * weight).
    pub weight_v2: f64,
    /// Timeout in seconds for the TIMEOUT detector.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            weight_v1: default_weight_v1(),
            weight_v2: default_weight_v2(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from `path` if it exists, falling back to
    /// defaults when the file is absent. A malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| RangedlError::io(format!("reading {}", path.display()), e))?;
        toml::from_str(&text).map_err(|e| RangedlError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }
}
