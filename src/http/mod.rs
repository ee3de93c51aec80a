/*
 * rangedl - Parallel HTTP/1.1 range-based file downloader.
 * Copyright (C) 2025  compiledkernel-idk and rangedl contributors
 */

//! Byte-level HTTP/1.1 response framing.

pub mod framing;

pub use framing::{check_status, get_order, separate_header};
