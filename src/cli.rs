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

//! Command line interface.

use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parallel HTTP/1.1 range-based file downloader.
#[derive(Parser, Debug)]
#[command(name = "rangedl")]
#[command(version = VERSION)]
#[command(about = "Fetch a file from one or more mirrors over many concurrent range requests.")]
pub struct Cli {
    /// One or more mirror URLs serving the same file.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Number of TCP connections (clamped to 10).
    #[arg(short = 'n', long = "num", default_value_t = 5)]
    pub num: usize,

    /// Split size in MB (decimal, combined additively with -sk/-sg).
    #[arg(short = 's', long = "size", default_value_t = 0)]
    pub size_mb: u64,

    /// Split size in KB (combined additively with -s/-sg).
    #[arg(short = 'k', long = "size-kb", default_value_t = 0)]
    pub size_kb: u64,

    /// Split size in GB (combined additively with -s/-sk).
    #[arg(short = 'g', long = "size-gb", default_value_t = 0)]
    pub size_gb: u64,

    /// Disable progress bar output.
    #[arg(short = 'p', long = "non-progress")]
    pub non_progress: bool,

    /// Enable verbose diagnostics.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Combine `-s`/`-sk`/`-sg` into a byte part size, defaulting to
    /// [`crate::config::DEFAULT_PART_SIZE`] when all three are zero.
    pub fn part_size(&self) -> u64 {
        let combined =
            self.size_mb * 1_000_000 + self.size_kb * 1_000 + self.size_gb * 1_000_000_000;
        if combined == 0 {
            crate::config::DEFAULT_PART_SIZE
        } else {
            combined
        }
    }

    /// Number of connections clamped to [`crate::config::MAX_CONNECTIONS`],
    /// and at least 1.
    pub fn connections(&self) -> usize {
        self.num.clamp(1, crate::config::MAX_CONNECTIONS)
    }
}
