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

//! Baseline HyperLogLog without TTL awareness.

use tracing::debug;

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hll::NumStdDev;
use crate::hll::estimate_from_registers;
use crate::hll::num_registers;
use crate::hll::rank;
use crate::hll::rank_cap;
use crate::hll::register_index;
use crate::hll::serialization::*;

/// A plain HyperLogLog cardinality sketch.
///
/// Starts sparse (a deduplicated list of raw hashes) and promotes to one
/// byte-register per bucket when the list would outgrow the dense form.
/// There is no reverse transition.
///
/// # Examples
///
/// ```
/// # use cachesketch::hll::HllSketch;
/// # use cachesketch::hash::scramble_key;
/// let mut sketch = HllSketch::new(12, 4096);
/// for key in 0..100u64 {
///     sketch.add(scramble_key(key));
/// }
/// let count = sketch.count();
/// assert!((count - 100.0).abs() < 10.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch {
    precision: u8,
    block_size: u32,
    total_insertions: u64,
    mode: Mode,
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    /// Deduplicated raw hashes; cheaper than registers while short.
    Sparse { hashes: Vec<u64> },
    /// One rank maximum per register.
    Dense { registers: Box<[u8]> },
}

impl HllSketch {
    /// Create an empty sketch.
    ///
    /// `block_size` is carried as an attribute of the sketch (the byte
    /// size class it counts in a WSS bank) and serialized with it; it does
    /// not affect estimation.
    ///
    /// # Panics
    ///
    /// If `precision` is not in `[4, 16]`.
    pub fn new(precision: u8, block_size: u32) -> Self {
        assert!(
            (4..=16).contains(&precision),
            "precision must be in [4, 16], got {}",
            precision
        );
        Self {
            precision,
            block_size,
            total_insertions: 0,
            mode: Mode::Sparse { hashes: Vec::new() },
        }
    }

    /// The sketch precision `b`.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// The block-size class this sketch counts.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Total insertions, counting duplicates.
    pub fn total_insertions(&self) -> u64 {
        self.total_insertions
    }

    /// Whether the sketch is still in its sparse mode.
    pub fn is_sparse(&self) -> bool {
        matches!(self.mode, Mode::Sparse { .. })
    }

    /// Sparse capacity: at 8 bytes per raw hash the list breaks even with
    /// the `m`-byte register array at `m / 8` entries.
    fn sparse_limit(&self) -> usize {
        num_registers(self.precision) / 8
    }

    /// Insert a scrambled hash.
    pub fn add(&mut self, hash: u64) {
        self.total_insertions += 1;
        self.insert_hash(hash);
    }

    /// Route a hash into the current mode, promoting first on sparse
    /// overflow so the insertion never re-enters the capacity check.
    fn insert_hash(&mut self, hash: u64) {
        let limit = self.sparse_limit();
        if let Mode::Sparse { hashes } = &mut self.mode {
            if hashes.contains(&hash) {
                return;
            }
            if hashes.len() < limit {
                hashes.push(hash);
                return;
            }
            self.promote();
        }
        self.add_dense(hash);
    }

    fn add_dense(&mut self, hash: u64) {
        let i = register_index(hash, self.precision);
        let r = rank(hash, rank_cap(self.precision));
        if let Mode::Dense { registers } = &mut self.mode {
            if r > registers[i] {
                registers[i] = r;
            }
        }
    }

    /// Promote the sparse hash list into dense registers. One-way.
    fn promote(&mut self) {
        let Mode::Sparse { hashes } = &self.mode else {
            return;
        };
        let hashes = hashes.clone();
        debug!(
            precision = self.precision,
            entries = hashes.len(),
            "hll sparse list promoted to dense registers"
        );
        self.mode = Mode::Dense {
            registers: vec![0u8; num_registers(self.precision)].into_boxed_slice(),
        };
        for hash in hashes {
            self.add_dense(hash);
        }
    }

    /// Estimate the number of distinct hashes inserted.
    pub fn count(&self) -> f64 {
        match &self.mode {
            // Sparse entries are exact: the list is deduplicated.
            Mode::Sparse { hashes } => hashes.len() as f64,
            Mode::Dense { registers } => estimate_from_registers(registers, self.precision),
        }
    }

    /// Upper confidence bound on [`count`](Self::count).
    pub fn count_upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_sparse() {
            return self.count();
        }
        crate::hll::upper_bound(self.count(), self.precision, num_std_dev)
    }

    /// Lower confidence bound on [`count`](Self::count).
    pub fn count_lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_sparse() {
            return self.count();
        }
        crate::hll::lower_bound(self.count(), self.precision, num_std_dev)
    }

    /// Merge another sketch into this one by per-register maximum.
    ///
    /// Both sketches must share a precision. Total insertions accumulate.
    pub fn merge(&mut self, other: &HllSketch) {
        assert_eq!(
            self.precision, other.precision,
            "cannot merge sketches with different precisions"
        );
        self.total_insertions += other.total_insertions;
        match &other.mode {
            Mode::Sparse { hashes } => {
                for &hash in hashes {
                    // Bypass the insertion counter: these are not new inserts.
                    self.insert_hash(hash);
                }
            }
            Mode::Dense {
                registers: other_registers,
            } => {
                if self.is_sparse() {
                    self.promote();
                }
                if let Mode::Dense { registers } = &mut self.mode {
                    for (mine, theirs) in registers.iter_mut().zip(other_registers.iter()) {
                        if theirs > mine {
                            *mine = *theirs;
                        }
                    }
                }
            }
        }
    }

    /// Serialize to the length-prefixed plain-HLL binary form.
    ///
    /// Layout: `len:u32`, then the 15-byte header
    /// `[block_size:u32][total_insertions:u32][n_entries:u32][precision:u8][is_sparse:u8][is_static:u8]`,
    /// then either `n_entries` raw `u64` hashes (sparse) or `m` register
    /// bytes (dense).
    pub fn serialize(&self) -> Vec<u8> {
        let (is_sparse, n_entries, body_len) = match &self.mode {
            Mode::Sparse { hashes } => (1u8, hashes.len() as u32, hashes.len() * 8),
            Mode::Dense { registers } => (0u8, registers.len() as u32, registers.len()),
        };

        let mut bytes = SketchBytes::with_capacity(4 + PLAIN_HEADER_SIZE + body_len);
        bytes.write_u32_le((PLAIN_HEADER_SIZE + body_len) as u32);
        bytes.write_u32_le(self.block_size);
        bytes.write_u32_le(self.total_insertions as u32);
        bytes.write_u32_le(n_entries);
        bytes.write_u8(self.precision);
        bytes.write_u8(is_sparse);
        bytes.write_u8(STATIC_FORM);

        match &self.mode {
            Mode::Sparse { hashes } => {
                for &hash in hashes {
                    bytes.write_u64_le(hash);
                }
            }
            Mode::Dense { registers } => {
                for &r in registers.iter() {
                    bytes.write_u8(r);
                }
            }
        }
        bytes.into_bytes()
    }

    /// Reconstruct a sketch from [`serialize`](Self::serialize) output.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(data);
        let len = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("length prefix"))? as usize;
        if cursor.remaining() != len {
            return Err(Error::length_mismatch(len, cursor.remaining()));
        }

        let block_size = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("block_size"))?;
        let total_insertions = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("total_insertions"))?;
        let n_entries = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("n_entries"))? as usize;
        let precision = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("precision"))?;
        if !(4..=16).contains(&precision) {
            return Err(Error::invalid_precision(precision));
        }
        let is_sparse = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("is_sparse"))?;
        // Plain sketches have no dynamic form; the flag is reserved.
        let _ = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("is_static"))?;

        let mode = if is_sparse == 1 {
            let mut hashes = Vec::with_capacity(n_entries);
            for i in 0..n_entries {
                let hash = cursor.read_u64_le().map_err(|_| {
                    Error::insufficient_data(format!("expected {n_entries} hashes, failed at {i}"))
                })?;
                hashes.push(hash);
            }
            Mode::Sparse { hashes }
        } else {
            let m = num_registers(precision);
            if n_entries != m {
                return Err(Error::deserial(format!(
                    "dense register count {n_entries} does not match m = {m}"
                )));
            }
            let mut registers = vec![0u8; m];
            cursor
                .read_exact(&mut registers)
                .map_err(|_| Error::insufficient_data("register bytes"))?;
            Mode::Dense {
                registers: registers.into_boxed_slice(),
            }
        };

        Ok(Self {
            precision,
            block_size,
            total_insertions: total_insertions as u64,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::scramble_key;

    #[test]
    fn test_sparse_exact_below_limit() {
        let mut sketch = HllSketch::new(12, 0);
        for key in 0..100u64 {
            sketch.add(scramble_key(key));
        }
        assert!(sketch.is_sparse());
        assert_eq!(sketch.count(), 100.0);
        assert_eq!(sketch.total_insertions(), 100);
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let mut sketch = HllSketch::new(12, 0);
        for _ in 0..10 {
            for key in 0..50u64 {
                sketch.add(scramble_key(key));
            }
        }
        assert_eq!(sketch.count(), 50.0);
        assert_eq!(sketch.total_insertions(), 500);
    }

    #[test]
    fn test_promotion_keeps_estimate_close() {
        let mut sketch = HllSketch::new(10, 0);
        // Sparse limit at b = 10 is 128 entries; push well past it.
        for key in 0..2000u64 {
            sketch.add(scramble_key(key));
        }
        assert!(!sketch.is_sparse());
        let count = sketch.count();
        assert!(
            (count - 2000.0).abs() < 300.0,
            "estimate {} too far from 2000",
            count
        );
    }

    #[test]
    fn test_merge_covers_both_inputs() {
        let mut left = HllSketch::new(12, 0);
        let mut right = HllSketch::new(12, 0);
        for key in 0..80u64 {
            left.add(scramble_key(key));
        }
        for key in 40..120u64 {
            right.add(scramble_key(key));
        }
        left.merge(&right);
        assert_eq!(left.count(), 120.0);
        assert_eq!(left.total_insertions(), 160);
    }

    #[test]
    fn test_serialize_round_trip_sparse_and_dense() {
        let mut sparse = HllSketch::new(12, 4096);
        for key in 0..60u64 {
            sparse.add(scramble_key(key));
        }
        let restored = HllSketch::deserialize(&sparse.serialize()).unwrap();
        assert_eq!(restored, sparse);

        let mut dense = HllSketch::new(8, 4096);
        for key in 0..5000u64 {
            dense.add(scramble_key(key));
        }
        assert!(!dense.is_sparse());
        let restored = HllSketch::deserialize(&dense.serialize()).unwrap();
        assert_eq!(restored.count(), dense.count());
        assert_eq!(restored.block_size(), 4096);
    }

    #[test]
    fn test_deserialize_rejects_bad_length() {
        let mut bytes = HllSketch::new(12, 0).serialize();
        bytes.pop();
        assert!(HllSketch::deserialize(&bytes).is_err());
    }
}
