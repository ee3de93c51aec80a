/*
 * rangedl - Parallel HTTP/1.1 range-based file downloader.
 * Copyright (C) 2025  compiledkernel-idk and rangedl contributors
 */

//! The three byte-level operations that tie a raw socket buffer back to a
//! planned block: splitting header from body, validating the status line,
//! and recovering the block index from `Content-Range`.
//!
//! Bodies are arbitrary binary data and may legally contain `CR LF`
//! sequences, so headers can only be found by locating the first blank
//! line (`\r\n\r\n`) — never by scanning for a terminator inside the body.

use crate::error::{RangedlError, Result};

const HEADER_BOUNDARY: &[u8] = b"\r\n\r\n";
const STATUS_206: &[u8] = b"HTTP/1.1 206 Partial Content";
const CONTENT_RANGE_PREFIX: &[u8] = b"Content-Range: bytes ";

/// Split a raw response buffer into `(header, body)` at the first blank
/// line. The header bytes do not include the trailing `CRLFCRLF`; the body
/// bytes start immediately after it.
pub fn separate_header(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let idx = find(buf, HEADER_BOUNDARY).ok_or(RangedlError::SeparateHeader)?;
    Ok((&buf[..idx], &buf[idx + HEADER_BOUNDARY.len()..]))
}

/// Validate that the response's status line is exactly
/// `HTTP/1.1 206 Partial Content`. Any other status is fatal to the whole
/// download.
pub fn check_status(header: &[u8]) -> Result<()> {
    let status_line = match find(header, b"\r\n") {
        Some(idx) => &header[..idx],
        None => header,
    };
    if find(status_line, STATUS_206).is_some() {
        Ok(())
    } else {
        Err(RangedlError::HttpResponse {
            status_line: String::from_utf8_lossy(status_line).into_owned(),
        })
    }
}

/// Recover the block index a response belongs to from its `Content-Range`
/// header, given the planned `chunk_size`. Requires [`check_status`] to
/// have already passed.
///
/// Searches case-insensitively for `Content-Range: bytes ` and reads the
/// ASCII digits that follow, up to the `-`, as the block's starting byte
/// offset. The length skipped past the field name is always the length of
/// whatever case variant actually matched, never a hardcoded one — the
/// python original this crate descends from slices with a fixed-case
/// length regardless of which case matched, which happens to be harmless
/// only because both variants of this particular string share a length.
pub fn get_order(header: &[u8], chunk_size: u64) -> Result<u64> {
    check_status(header)?;

    let (idx, matched_len) =
        find_ci_with_len(header, CONTENT_RANGE_PREFIX).ok_or(RangedlError::GetOrder)?;
    let rest = &header[idx + matched_len..];

    let digit_end = rest
        .iter()
        .position(|&b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if digit_end == 0 {
        return Err(RangedlError::GetOrder);
    }
    // Require the digits to actually be followed by '-', i.e. a range, not
    // some unrelated numeric field that happened to share the prefix.
    if rest.get(digit_end) != Some(&b'-') {
        return Err(RangedlError::GetOrder);
    }

    let offset: u64 = std::str::from_utf8(&rest[..digit_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RangedlError::GetOrder)?;

    if chunk_size == 0 {
        return Err(RangedlError::GetOrder);
    }
    Ok(offset / chunk_size)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Case-insensitive search returning the match index and the needle's byte
/// length (the matched length is always `needle.len()` for ASCII
/// case-insensitive comparison, but is returned explicitly so callers never
/// have to assume it).
fn find_ci_with_len(haystack: &[u8], needle: &[u8]) -> Option<(usize, usize)> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|idx| (idx, needle.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separate_header_splits_at_blank_line() {
        let buf = b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-9/100\r\n\r\nABCDEFGHIJ";
        let (header, body) = separate_header(buf).unwrap();
        assert!(header.ends_with(b"bytes 0-9/100"));
        assert_eq!(body, b"ABCDEFGHIJ");
    }

    #[test]
    fn separate_header_fails_without_boundary() {
        let buf = b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-9/100\r\n";
        assert!(matches!(
            separate_header(buf),
            Err(RangedlError::SeparateHeader)
        ));
    }

    #[test]
    fn separate_header_tolerates_crlf_inside_body() {
        let buf = b"HTTP/1.1 206 Partial Content\r\n\r\nline1\r\nline2";
        let (_, body) = separate_header(buf).unwrap();
        assert_eq!(body, b"line1\r\nline2");
    }

    #[test]
    fn check_status_accepts_206() {
        let header = b"HTTP/1.1 206 Partial Content\r\nContent-Length: 10";
        assert!(check_status(header).is_ok());
    }

    #[test]
    fn check_status_rejects_other_statuses() {
        let header = b"HTTP/1.1 416 Range Not Satisfiable\r\n";
        let err = check_status(header).unwrap_err();
        match err {
            RangedlError::HttpResponse { status_line } => {
                assert_eq!(status_line, "HTTP/1.1 416 Range Not Satisfiable");
            }
            other => panic!("wrong error variant: {other:?}"),
        }
    }

    #[test]
    fn get_order_reads_uppercase_field() {
        let header = b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 2000000-2999999/5000000";
        assert_eq!(get_order(header, 1_000_000).unwrap(), 2);
    }

    #[test]
    fn get_order_reads_lowercase_field() {
        let header = b"HTTP/1.1 206 Partial Content\r\ncontent-range: bytes 3000000-3999999/5000000";
        assert_eq!(get_order(header, 1_000_000).unwrap(), 3);
    }

    #[test]
    fn get_order_reads_mixed_case_field() {
        let header = b"HTTP/1.1 206 Partial Content\r\nCONTENT-RANGE: bytes 0-999999/5000000";
        assert_eq!(get_order(header, 1_000_000).unwrap(), 0);
    }

    #[test]
    fn get_order_fails_without_content_range() {
        let header = b"HTTP/1.1 206 Partial Content\r\nContent-Length: 10";
        assert!(matches!(
            get_order(header, 1_000_000),
            Err(RangedlError::GetOrder)
        ));
    }

    #[test]
    fn get_order_propagates_http_response_error() {
        let header = b"HTTP/1.1 404 Not Found\r\n";
        assert!(matches!(
            get_order(header, 1_000_000),
            Err(RangedlError::HttpResponse { .. })
        ));
    }

    #[test]
    fn get_order_rejects_malformed_range_value() {
        let header = b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes -999999/5000000";
        assert!(matches!(
            get_order(header, 1_000_000),
            Err(RangedlError::GetOrder)
        ));
    }
}
