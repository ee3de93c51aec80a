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

//! Ordered writer. Blocks complete out of order; this holds each completed
//! block's bytes in a sparse slot until every earlier block has also
//! arrived, then drains the contiguous prefix to disk in one write.

use crate::error::{RangedlError, Result};
use std::fs::File;
use std::io::Write;

/// Appends completed blocks to a file strictly in order, buffering
/// out-of-order arrivals in a sparse list.
pub struct OrderedWriter {
    file: File,
    write_list: Vec<Option<Vec<u8>>>,
    write_index: usize,
    /// Size, in bytes, of each drained batch (one entry per call to
    /// [`OrderedWriter::drain`] that actually wrote something), kept for
    /// the end-of-run summary.
    batch_sizes: Vec<u64>,
    total_bytes: u64,
}

impl OrderedWriter {
    pub fn new(file: File, total_blocks: usize) -> Self {
        let mut write_list = Vec::with_capacity(total_blocks);
        write_list.resize_with(total_blocks, || None);
        Self {
            file,
            write_list,
            write_index: 0,
            batch_sizes: Vec::new(),
            total_bytes: 0,
        }
    }

    /// Record a completed block's bytes. Out-of-range indices are a logic
    /// error in the caller (the engine never hands this a block index
    /// outside the plan), so this panics rather than returning a `Result`.
    pub fn submit(&mut self, index: usize, data: Vec<u8>) {
        assert!(
            index < self.write_list.len(),
            "block index {index} out of range for {} blocks",
            self.write_list.len()
        );
        self.write_list[index] = Some(data);
    }

    /// Drain the contiguous run of completed blocks starting at
    /// `write_index`, appending them to the file in one write and
    /// advancing `write_index` past them. Returns the number of bytes
    /// written this call (0 if the next block hasn't arrived yet).
    pub fn drain(&mut self) -> Result<u64> {
        let mut batch = Vec::new();
        while self.write_index < self.write_list.len() {
            match self.write_list[self.write_index].take() {
                Some(bytes) => {
                    batch.extend_from_slice(&bytes);
                    self.write_index += 1;
                }
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(0);
        }
        let len = batch.len() as u64;
        self.file
            .write_all(&batch)
            .map_err(|e| RangedlError::io("writing output file", e))?;
        self.batch_sizes.push(len);
        self.total_bytes += len;
        Ok(len)
    }

    pub fn is_complete(&self) -> bool {
        self.write_index >= self.write_list.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn batch_sizes(&self) -> &[u64] {
        &self.batch_sizes
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| RangedlError::io("flushing output file", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn scratch_file() -> (File, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        // Leak the tempdir so the file outlives this helper; tests clean
        // up via the OS's temp directory sweep.
        std::mem::forget(dir);
        (file, path)
    }

    #[test]
    fn drains_only_contiguous_prefix() {
        let (file, path) = scratch_file();
        let mut writer = OrderedWriter::new(file, 3);

        writer.submit(1, b"B".to_vec());
        assert_eq!(writer.drain().unwrap(), 0);
        assert!(!writer.is_complete());

        writer.submit(0, b"A".to_vec());
        assert_eq!(writer.drain().unwrap(), 2);

        writer.submit(2, b"C".to_vec());
        assert_eq!(writer.drain().unwrap(), 1);
        assert!(writer.is_complete());

        writer.flush().unwrap();
        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "ABC");
    }

    #[test]
    fn records_batch_sizes() {
        let (file, _path) = scratch_file();
        let mut writer = OrderedWriter::new(file, 2);
        writer.submit(0, vec![0u8; 10]);
        writer.drain().unwrap();
        writer.submit(1, vec![0u8; 5]);
        writer.drain().unwrap();
        assert_eq!(writer.batch_sizes(), &[10, 5]);
        assert_eq!(writer.total_bytes(), 15);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn submit_out_of_range_panics() {
        let (file, _path) = scratch_file();
        let mut writer = OrderedWriter::new(file, 1);
        writer.submit(5, vec![1]);
    }
}
