// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::io::ErrorKind as IoErrorKind;
use std::io::Read;

use crate::codec::SketchSlice;
use crate::config::SizingConfig;
use crate::error::Error;
use crate::trace::Request;

/// Width of one binary trace record:
/// `[timestamp:u32][key_hash:u64][value_size:u32][eviction_time:u32]`,
/// little-endian.
pub const RECORD_SIZE: usize = 20;

/// Largest admissible batch, in records. Batches are staged in a single
/// contiguous buffer whose byte length must stay below `i32::MAX`.
pub const MAX_BATCH_RECORDS: usize = i32::MAX as usize / RECORD_SIZE;

/// Streaming reader over a binary trace.
///
/// The reader owns the only handle on the underlying source; callers that
/// share one file across estimator threads serialize access externally.
/// A short read in the middle of a record is fatal: the trace is truncated
/// and the current file is abandoned.
pub struct TraceReader<R> {
    source: R,
    config: SizingConfig,
    records_read: u64,
}

impl<R: Read> TraceReader<R> {
    /// Wrap a byte source in a record reader.
    pub fn new(source: R, config: SizingConfig) -> Self {
        Self {
            source,
            config,
            records_read: 0,
        }
    }

    /// Total records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read up to `max_records` requests.
    ///
    /// Returns an empty batch at a clean end of stream. A stream that ends
    /// inside a record yields a [`TruncatedTrace`](crate::error::ErrorKind)
    /// error instead.
    pub fn read_batch(&mut self, max_records: usize) -> Result<Vec<Request>, Error> {
        assert!(
            max_records <= MAX_BATCH_RECORDS,
            "batch of {} records exceeds the {} record staging limit",
            max_records,
            MAX_BATCH_RECORDS
        );

        let mut buf = vec![0u8; max_records * RECORD_SIZE];
        let filled = self.fill(&mut buf)?;
        if filled % RECORD_SIZE != 0 {
            return Err(Error::truncated(format!(
                "stream ended {} bytes into a record",
                filled % RECORD_SIZE
            ))
            .with_context("records_read", self.records_read));
        }

        let mut cursor = SketchSlice::new(&buf[..filled]);
        let mut batch = Vec::with_capacity(filled / RECORD_SIZE);
        for _ in 0..filled / RECORD_SIZE {
            batch.push(self.decode_record(&mut cursor)?);
        }
        self.records_read += batch.len() as u64;
        Ok(batch)
    }

    fn decode_record(&self, cursor: &mut SketchSlice) -> Result<Request, Error> {
        let timestamp = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("timestamp"))?;
        let key_hash = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("key_hash"))?;
        let value_size = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("value_size"))?;
        let eviction_time = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("eviction_time"))?;

        Ok(Request::get(
            timestamp,
            key_hash,
            self.config.clamp_block(value_size),
            eviction_time,
        ))
    }

    /// Read until `buf` is full or the stream ends, tolerating partial
    /// `read` returns.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::truncated(format!("read failed: {e}"))
                        .with_context("records_read", self.records_read));
                }
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_record(ts: u32, key: u64, size: u32, evict: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_SIZE);
        out.extend_from_slice(&ts.to_le_bytes());
        out.extend_from_slice(&key.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&evict.to_le_bytes());
        out
    }

    #[test]
    fn test_reads_whole_batch() {
        let mut bytes = encode_record(1, 0xdead, 100, 60);
        bytes.extend(encode_record(2, 0xbeef, 200, 120));

        let mut reader = TraceReader::new(bytes.as_slice(), SizingConfig::default());
        let batch = reader.read_batch(16).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key_hash, 0xdead);
        assert_eq!(batch[1].timestamp, 2);
        assert_eq!(reader.records_read(), 2);

        let tail = reader.read_batch(16).unwrap();
        assert!(tail.is_empty(), "clean EOF must yield an empty batch");
    }

    #[test]
    fn test_sizes_clamped_on_ingestion() {
        let bytes = encode_record(1, 7, 3, 60);
        let config = SizingConfig {
            min_block: 16,
            max_block: 64,
            ..SizingConfig::default()
        };
        let mut reader = TraceReader::new(bytes.as_slice(), config);
        let batch = reader.read_batch(1).unwrap();
        assert_eq!(batch[0].value_size, 16);
    }

    #[test]
    fn test_truncated_record_is_fatal() {
        let mut bytes = encode_record(1, 7, 100, 60);
        bytes.truncate(RECORD_SIZE - 3);

        let mut reader = TraceReader::new(bytes.as_slice(), SizingConfig::default());
        let err = reader.read_batch(4).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TruncatedTrace);
    }

    #[test]
    fn test_batching_respects_limit() {
        let mut bytes = Vec::new();
        for i in 0..5u32 {
            bytes.extend(encode_record(i, i as u64, 100, i + 60));
        }
        let mut reader = TraceReader::new(bytes.as_slice(), SizingConfig::default());
        assert_eq!(reader.read_batch(2).unwrap().len(), 2);
        assert_eq!(reader.read_batch(2).unwrap().len(), 2);
        assert_eq!(reader.read_batch(2).unwrap().len(), 1);
    }
}
