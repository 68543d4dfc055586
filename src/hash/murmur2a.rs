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

//! 64-bit MurmurHash2A variant.
//!
//! This is the scrambling hash applied to cache keys before they reach any
//! sketch. Register selection and rank extraction in the HLL family assume
//! uniformly distributed 64-bit outputs, which this function provides for
//! both byte-string keys and already-integer keys.
//!
//! The exact mixing sequence is load-bearing: persisted sketches store raw
//! hashes, so any implementation must stay bit-equivalent with this one.

use byteorder::ByteOrder;
use byteorder::LE;

/// Seed used when no explicit seed is supplied.
pub const DEFAULT_SEED: u64 = 0xe17a1465;

const M: u64 = 0xc6a4a7935bd1e995;
const R: u32 = 47;

/// Hash an arbitrary byte string to a 64-bit value.
///
/// # Examples
///
/// ```
/// # use cachesketch::hash::hash_bytes;
/// # use cachesketch::hash::DEFAULT_SEED;
/// let a = hash_bytes(b"object:1234", DEFAULT_SEED);
/// let b = hash_bytes(b"object:1234", DEFAULT_SEED);
/// assert_eq!(a, b);
/// ```
pub fn hash_bytes(data: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = LE::read_u64(chunk);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    // tail
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut buf = [0u8; 8];
        buf[..rem.len()].copy_from_slice(rem);
        h ^= LE::read_u64(&buf);
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Scramble an integer key with the default seed.
///
/// Trace records carry keys that have already been passed through this
/// function; estimators fed synthetic integer keys use it to reproduce the
/// same distribution.
#[inline]
pub fn scramble_key(key: u64) -> u64 {
    hash_bytes(&key.to_le_bytes(), DEFAULT_SEED)
}
