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

//! Hierarchical error type for the downloader pipeline.

use thiserror::Error;

/// Main error type for rangedl operations.
#[derive(Debug, Error)]
pub enum RangedlError {
    /// A mirror's HEAD request came back as a redirect.
    #[error("mirror {url} redirected to {location}")]
    Redirection { url: String, location: String },

    /// A mirror's HEAD request returned a non-200, non-redirect status.
    #[error("mirror {url} returned HEAD status {status}")]
    HeadResponse { url: String, status: u16 },

    /// A mirror did not advertise `Accept-Ranges`.
    #[error("mirror {url} does not accept range requests")]
    AcceptRange { url: String },

    /// Two mirrors reported different `Content-Length` for the same file.
    #[error("mirror {url} reports length {got}, expected {expected}")]
    FileSize {
        url: String,
        expected: u64,
        got: u64,
    },

    /// Response buffer does not yet contain a full header (CRLFCRLF not found).
    #[error("no header boundary (CRLFCRLF) found yet")]
    SeparateHeader,

    /// A 206 response lacks a parseable `Content-Range` field.
    #[error("no Content-Range field found in response header")]
    GetOrder,

    /// A response's status line was not `HTTP/1.1 206 Partial Content`.
    #[error("unexpected HTTP status line: {status_line}")]
    HttpResponse { status_line: String },

    /// A mirror URL used a scheme other than `http`.
    #[error("unsupported URL scheme '{scheme}' in {url} (only http is supported)")]
    UnsupportedScheme { url: String, scheme: String },

    /// A mirror URL could not be parsed.
    #[error("invalid mirror URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// No mirrors were supplied.
    #[error("at least one mirror URL is required")]
    NoMirrors,

    /// DNS resolution or socket I/O failure.
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The mirror probe (via `ureq`) failed in a way not covered above.
    #[error("probe failed for {url}: {message}")]
    Probe { url: String, message: String },

    /// Config file could not be parsed.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

/// Result type alias for rangedl operations.
pub type Result<T> = std::result::Result<T, RangedlError>;

impl RangedlError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RangedlError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error is fatal to the whole download (vs. a local,
    /// skip-and-retry framing condition).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RangedlError::SeparateHeader | RangedlError::GetOrder)
    }
}
