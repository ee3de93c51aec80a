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

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::error;

mod cli;
mod config;
mod driver;
mod engine;
mod error;
mod health;
mod http;
mod logging;
mod mirror;
mod plan;
mod pool;
mod progress;
mod writer;

use cli::Cli;
use config::Config;

const CONFIG_FILE: &str = "rangedl.toml";

fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init(args.debug);

    let config = match Config::load(Path::new(CONFIG_FILE)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match driver::download(&args, config) {
        Ok(report) => {
            driver::log_batch_summary(&report);
            println!(
                "saved {} bytes to {} in {:.2?} using {} connections",
                report.length,
                report.output_path.display(),
                report.elapsed,
                report.connections
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "download failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
