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

//! HyperLogLog sketches for TTL-aware cardinality estimation.
//!
//! # Overview
//!
//! Two sketch types share one register-extraction convention and one
//! estimator:
//!
//! - [`HllSketch`]: the baseline HyperLogLog. One byte per register, no
//!   notion of time. Used where TTLs are disabled.
//! - [`HllTtl`]: a TTL-aware HyperLogLog. Instead of one rank per register
//!   it stores, per `(register, rank)` cell, the latest absolute expiry
//!   observed for a hash landing there. Evicting everything that expired
//!   by time `t` and re-reading the register maxima yields the cardinality
//!   of the objects still live at `t`.
//!
//! Both sketches start in a **sparse** mode that stores raw material (hash
//! lists, `hash -> expiry` maps) and promote to a **dense** register form
//! on capacity overflow. Promotion is one-way and transparent; sparse and
//! dense estimates agree exactly below the promotion point.
//!
//! # Register extraction
//!
//! For a 64-bit scrambled hash and precision `b`:
//!
//! - register index: the top `b` bits, `hash >> (64 - b)`;
//! - rank: `min(trailing_zeros(hash) + 1, Z - 1)` with `Z = 64 - b`.
//!
//! The rank is taken from the trailing-zero side so that uniform integer
//! key hashes spread well even when their low bits carry most entropy.
//! This convention is load-bearing: persisted sketches are only readable
//! by implementations that extract registers identically.
//!
//! # Serialization
//!
//! See [`serialization`] for the length-prefixed binary forms: sparse,
//! static dense (full matrix), and dynamic dense (per-row run-length
//! pruned to the occupied ranks).

pub mod serialization;

mod estimator;
mod sketch;
mod ttl;

pub use self::estimator::NumStdDev;
pub use self::sketch::HllSketch;
pub use self::ttl::HllTtl;

pub(crate) use self::estimator::estimate_from_registers;
pub(crate) use self::estimator::lower_bound;
pub(crate) use self::estimator::upper_bound;

/// Number of registers for precision `b`.
#[inline]
pub(crate) fn num_registers(precision: u8) -> usize {
    1 << precision
}

/// Rank cap for precision `b`: ranks occupy `1..Z`, register columns `0..Z`.
#[inline]
pub(crate) fn rank_cap(precision: u8) -> u8 {
    64 - precision
}

/// Register index: top `b` bits of the hash.
#[inline]
pub(crate) fn register_index(hash: u64, precision: u8) -> usize {
    (hash >> (64 - precision)) as usize
}

/// Rank: trailing-zero count plus one, capped at `Z - 1`.
///
/// `trailing_zeros` of zero is 64, so the all-zero hash caps cleanly.
#[inline]
pub(crate) fn rank(hash: u64, z: u8) -> u8 {
    let tz = hash.trailing_zeros() as u8;
    (tz + 1).min(z - 1)
}

/// Sparse capacity in entries for an `m x Z` sketch: one sparse entry costs
/// 12 bytes (hash + expiry), the dense matrix costs `m * Z * 4`.
#[inline]
pub(crate) fn sparse_capacity(precision: u8) -> usize {
    let m = num_registers(precision);
    let z = rank_cap(precision) as usize;
    m * z * 4 / 12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_extraction() {
        let hash = 0xf000_0000_0000_0000u64;
        assert_eq!(register_index(hash, 4), 0xf);
        assert_eq!(register_index(hash, 12), 0xf00);
    }

    #[test]
    fn test_rank_counts_trailing_zeros() {
        let z = rank_cap(12);
        assert_eq!(rank(0b1, z), 1);
        assert_eq!(rank(0b1000, z), 4);
        // The zero hash has 64 trailing zeros and caps at Z - 1.
        assert_eq!(rank(0, z), z - 1);
    }

    #[test]
    fn test_sparse_capacity_formula() {
        // b = 12: m = 4096, Z = 52, 4096 * 52 * 4 / 12 = 70997 pairs.
        assert_eq!(sparse_capacity(12), 70997);
    }
}
