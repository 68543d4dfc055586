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

//! Request records and the binary trace reader.
//!
//! A trace is a flat stream of fixed-width little-endian records sorted by
//! timestamp. The reader produces immutable [`Request`] batches; every
//! active estimator consumes the same batch independently.

mod reader;

pub use self::reader::TraceReader;
pub use self::reader::RECORD_SIZE;

/// The kind of a cache request.
///
/// Filtered traces carry only reads; the other kinds exist so unfiltered
/// sources can be represented and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A read. The only kind that participates in WSS/MRC analytics.
    Get,
    /// A write; ignored by all estimators.
    Put,
    /// A deletion; ignored by all estimators.
    Delete,
}

/// One immutable cache-access record.
///
/// Invariants enforced at ingestion: `eviction_time >= timestamp` and
/// `value_size` clamped into the configured block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Trace time in seconds; non-decreasing across a batch.
    pub timestamp: u32,
    /// Scrambled 64-bit key.
    pub key_hash: u64,
    /// Object size in bytes after clamping.
    pub value_size: u32,
    /// Absolute expiry in seconds (`timestamp + TTL`).
    pub eviction_time: u32,
    /// Request kind; only [`RequestKind::Get`] is analyzed.
    pub kind: RequestKind,
}

impl Request {
    /// Build a read request, raising `eviction_time` to `timestamp` if the
    /// record carries an expiry in the past.
    pub fn get(timestamp: u32, key_hash: u64, value_size: u32, eviction_time: u32) -> Self {
        Self {
            timestamp,
            key_hash,
            value_size,
            eviction_time: eviction_time.max(timestamp),
            kind: RequestKind::Get,
        }
    }

    /// Build a read request that never expires.
    pub fn get_no_ttl(timestamp: u32, key_hash: u64, value_size: u32) -> Self {
        Self::get(timestamp, key_hash, value_size, u32::MAX)
    }

    /// Whether this request participates in analytics.
    #[inline]
    pub fn is_analyzed(&self) -> bool {
        self.kind == RequestKind::Get
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_never_precedes_timestamp() {
        let r = Request::get(100, 1, 64, 5);
        assert_eq!(r.eviction_time, 100);

        let r = Request::get(100, 1, 64, 150);
        assert_eq!(r.eviction_time, 150);
    }

    #[test]
    fn test_no_ttl_request() {
        let r = Request::get_no_ttl(7, 42, 512);
        assert_eq!(r.eviction_time, u32::MAX);
        assert!(r.is_analyzed());
    }
}
