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

//! Top-level orchestration: probe mirrors, plan the file's blocks, open the
//! connection pool, and run the engine to completion.

use crate::cli::Cli;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::mirror::{self, MirrorTarget};
use crate::plan::FilePlan;
use crate::pool::ConnectionPool;
use crate::progress::Progress;
use crate::writer::OrderedWriter;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Everything the run summary needs once the engine finishes.
pub struct DownloadReport {
    pub output_path: PathBuf,
    pub length: u64,
    pub elapsed: std::time::Duration,
    pub connections: usize,
    pub batch_sizes: Vec<u64>,
}

/// Resolve mirrors, probe their shared length, plan the download, and drive
/// it to completion. Returns a summary suitable for the CLI to print.
pub fn download(cli: &Cli, config: Config) -> Result<DownloadReport> {
    let targets: Vec<MirrorTarget> = cli
        .urls
        .iter()
        .map(|u| MirrorTarget::resolve(u))
        .collect::<Result<_>>()?;

    let length = mirror::probe_all(&targets)?;
    info!(length, mirrors = targets.len(), "probed mirrors");

    let connections = cli.connections();
    let plan = FilePlan::new(length, cli.part_size(), connections);
    info!(
        blocks = plan.total_blocks(),
        chunk_size = plan.chunk_size,
        "planned download"
    );

    let output_path = PathBuf::from(targets[0].filename());
    let file = File::create(&output_path)
        .map_err(|e| crate::error::RangedlError::io(format!("creating {}", output_path.display()), e))?;

    let pool = ConnectionPool::new(targets, connections)?;
    let mut engine = Engine::new(pool, plan.clone(), config);
    let mut writer = OrderedWriter::new(file, plan.total_blocks());

    let progress = Progress::new(length, !cli.non_progress);
    let start = Instant::now();
    if let Err(e) = engine.run(&mut writer, |written| progress.set_position(written)) {
        progress.abandon();
        drop(writer);
        // A non-206 response cancels the whole download: the partial
        // output is not a usable prefix of anything, so it is removed
        // rather than left around truncated, per spec's HttpResponseError
        // recovery policy.
        if matches!(e, crate::error::RangedlError::HttpResponse { .. }) {
            let _ = std::fs::remove_file(&output_path);
        }
        return Err(e);
    }
    let elapsed = start.elapsed();
    progress.finish(&format!("downloaded {} bytes in {:.2?}", length, elapsed));

    Ok(DownloadReport {
        output_path,
        length,
        elapsed,
        connections,
        batch_sizes: writer.batch_sizes().to_vec(),
    })
}

/// Log the batch-size distribution (max / mean / population stddev) once a
/// download completes, mirroring the summary the python original printed.
pub fn log_batch_summary(report: &DownloadReport) {
    if report.batch_sizes.is_empty() {
        return;
    }
    let n = report.batch_sizes.len() as f64;
    let mean = report.batch_sizes.iter().sum::<u64>() as f64 / n;
    let max = *report.batch_sizes.iter().max().unwrap_or(&0);
    let variance = report
        .batch_sizes
        .iter()
        .map(|&b| {
            let diff = b as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    let stdev = variance.sqrt();
    info!(
        batches = report.batch_sizes.len(),
        max_batch = max,
        mean_batch = mean,
        stdev_batch = stdev,
        "write batch summary"
    );
}
