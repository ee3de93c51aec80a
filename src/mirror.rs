/*
 * rangedl - Parallel HTTP/1.1 range-based file downloader.
 * Copyright (C) 2025  compiledkernel-idk and rangedl contributors
 */

//! Mirror URL parsing and the one-shot HEAD probe used to learn the file's
//! length and range support before any non-blocking socket is opened.

use crate::error::{RangedlError, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use url::Url;

/// A parsed, resolved mirror endpoint.
#[derive(Debug, Clone)]
pub struct MirrorTarget {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub address: SocketAddr,
}

impl MirrorTarget {
    /// Parse and resolve `raw` into a mirror target. Only plain `http` is
    /// supported; `https` and anything else is rejected at the planner
    /// boundary, per spec §9 ("no TLS").
    pub fn resolve(raw: &str) -> Result<Self> {
        let parsed = Url::parse(raw).map_err(|e| RangedlError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;

        if parsed.scheme() != "http" {
            return Err(RangedlError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: parsed.scheme().to_string(),
            });
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| RangedlError::InvalidUrl {
                url: raw.to_string(),
                message: "missing host".to_string(),
            })?
            .to_string();
        let port = parsed.port().unwrap_or(80);
        let path = if parsed.path().is_empty() {
            "/".to_string()
        } else {
            let mut p = parsed.path().to_string();
            if let Some(q) = parsed.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        };

        let address = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| RangedlError::io(format!("resolving {host}:{port}"), e))?
            .next()
            .ok_or_else(|| RangedlError::InvalidUrl {
                url: raw.to_string(),
                message: format!("no address for host {host}"),
            })?;

        Ok(Self {
            url: raw.to_string(),
            host,
            port,
            path,
            address,
        })
    }

    /// Basename of the URL path, used as the output filename.
    pub fn filename(&self) -> String {
        self.path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string()
    }
}

/// Result of probing a single mirror.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub length: u64,
}

/// Issue a single HEAD request against `target` and validate it per spec
/// §4.2: redirects and non-200 statuses are fatal, as is a missing
/// `Accept-Ranges` header.
pub fn probe(target: &MirrorTarget) -> Result<ProbeResult> {
    let response = ureq::head(&target.url).call();
    match response {
        Ok(resp) => {
            let status = resp.status();
            if matches!(status, 302 | 303 | 307) {
                let location = resp
                    .header("Location")
                    .unwrap_or_default()
                    .to_string();
                return Err(RangedlError::Redirection {
                    url: target.url.clone(),
                    location,
                });
            }
            if status != 200 {
                return Err(RangedlError::HeadResponse {
                    url: target.url.clone(),
                    status,
                });
            }
            if resp.header("Accept-Ranges").is_none() {
                return Err(RangedlError::AcceptRange {
                    url: target.url.clone(),
                });
            }
            let length: u64 = resp
                .header("Content-Length")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| RangedlError::Probe {
                    url: target.url.clone(),
                    message: "missing or invalid Content-Length".to_string(),
                })?;
            Ok(ProbeResult { length })
        }
        Err(ureq::Error::Status(status, resp)) => {
            if matches!(status, 302 | 303 | 307) {
                let location = resp
                    .header("Location")
                    .unwrap_or_default()
                    .to_string();
                Err(RangedlError::Redirection {
                    url: target.url.clone(),
                    location,
                })
            } else {
                Err(RangedlError::HeadResponse {
                    url: target.url.clone(),
                    status,
                })
            }
        }
        Err(e) => Err(RangedlError::Probe {
            url: target.url.clone(),
            message: e.to_string(),
        }),
    }
}

/// Probe every mirror and require that all report the same length, per
/// spec §4.2. Returns the agreed-upon length.
pub fn probe_all(targets: &[MirrorTarget]) -> Result<u64> {
    if targets.is_empty() {
        return Err(RangedlError::NoMirrors);
    }
    let first = probe(&targets[0])?;
    for target in &targets[1..] {
        let result = probe(target)?;
        if result.length != first.length {
            return Err(RangedlError::FileSize {
                url: target.url.clone(),
                expected: first.length,
                got: result.length,
            });
        }
    }
    Ok(first.length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_https() {
        let err = MirrorTarget::resolve("https://example.com/file.iso").unwrap_err();
        assert!(matches!(err, RangedlError::UnsupportedScheme { .. }));
    }

    #[test]
    fn filename_is_path_basename() {
        let target = MirrorTarget {
            url: "http://example.com/dist/image.iso".into(),
            host: "example.com".into(),
            port: 80,
            path: "/dist/image.iso".into(),
            address: "127.0.0.1:80".parse().unwrap(),
        };
        assert_eq!(target.filename(), "image.iso");
    }

    #[test]
    fn filename_falls_back_for_root_path() {
        let target = MirrorTarget {
            url: "http://example.com/".into(),
            host: "example.com".into(),
            port: 80,
            path: "/".into(),
            address: "127.0.0.1:80".parse().unwrap(),
        };
        assert_eq!(target.filename(), "download");
    }

    #[test]
    fn default_port_is_80() {
        let target = MirrorTarget::resolve("http://127.0.0.1/file.iso");
        let target = target.expect("loopback should resolve without DNS");
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/file.iso");
    }

    #[test]
    fn explicit_port_is_honored() {
        let target = MirrorTarget::resolve("http://127.0.0.1:8080/file.iso").unwrap();
        assert_eq!(target.port, 8080);
    }
}
