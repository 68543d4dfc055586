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

//! TTL-aware HyperLogLog.
//!
//! Estimates `|{ k : k observed and expiry(k) > now }|` in `O(m * Z)`
//! space. Where the baseline HLL keeps one rank maximum per register, this
//! sketch keeps, per `(register, rank)` cell, the latest absolute expiry
//! seen for any hash that maps there. The register maximum at time `t` is
//! then the highest rank whose cell holds an expiry beyond `t`, so the
//! standard estimator applies after expired cells are cleared.

use std::collections::HashMap;

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
use crate::hll::sparse_capacity;

/// A TTL-aware HyperLogLog cardinality sketch.
///
/// Starts sparse (a `hash -> expiry` map) and promotes to the dense
/// `m x Z` expiry matrix when the map outgrows it. Promotion is one-way.
///
/// Dense invariant, relied on by eviction and the dynamic serialization
/// form: for every register `i` with `top[i] > 0`, `cells[i][top[i]] != 0`
/// and every cell above `top[i]` is zero.
///
/// # Examples
///
/// ```
/// # use cachesketch::hll::HllTtl;
/// # use cachesketch::hash::scramble_key;
/// let mut sketch = HllTtl::new(12, 0);
/// sketch.add(scramble_key(1), 100);
/// sketch.add(scramble_key(2), 200);
/// assert_eq!(sketch.count_at(50).round(), 2.0);
/// assert_eq!(sketch.count_at(100).round(), 1.0);
/// assert_eq!(sketch.count_at(200).round(), 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct HllTtl {
    precision: u8,
    block_size: u32,
    state: State,
    /// Highest merge identifier already applied; see [`merge_count`](Self::merge_count).
    last_merge_sn: u64,
    cached_count: f64,
}

#[derive(Debug, Clone)]
enum State {
    /// `hash -> latest expiry`, exact while small.
    Sparse { entries: HashMap<u64, u32> },
    /// Row-major `m x Z` expiry matrix plus per-register occupancy high-water.
    Dense { cells: Box<[u32]>, top: Box<[u8]> },
}

impl HllTtl {
    /// Create an empty sketch.
    ///
    /// `block_size` tags the byte size class the sketch counts in a WSS
    /// bank; it is serialized with the sketch and does not affect
    /// estimation.
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
            state: State::Sparse {
                entries: HashMap::new(),
            },
            last_merge_sn: 0,
            cached_count: 0.0,
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

    /// Whether the sketch is still in its sparse mode.
    pub fn is_sparse(&self) -> bool {
        matches!(self.state, State::Sparse { .. })
    }

    /// Observe a scrambled hash with an absolute expiry.
    ///
    /// Re-observing a hash keeps the larger expiry. Expiry zero would
    /// collide with the empty-cell sentinel and is raised to one.
    pub fn add(&mut self, hash: u64, expiry: u32) {
        let expiry = expiry.max(1);
        let limit = sparse_capacity(self.precision);
        if let State::Sparse { entries } = &mut self.state {
            if let Some(e) = entries.get_mut(&hash) {
                if expiry > *e {
                    *e = expiry;
                }
                return;
            }
            if entries.len() < limit {
                entries.insert(hash, expiry);
                return;
            }
            // Promote first, insert after: the dense path has no capacity
            // check to re-enter.
            self.promote();
        }
        self.add_dense(hash, expiry);
    }

    fn add_dense(&mut self, hash: u64, expiry: u32) {
        let i = register_index(hash, self.precision);
        let r = rank(hash, rank_cap(self.precision));
        let z = rank_cap(self.precision) as usize;
        if let State::Dense { cells, top } = &mut self.state {
            let cell = &mut cells[i * z + r as usize];
            if expiry > *cell {
                *cell = expiry;
            }
            if r > top[i] {
                top[i] = r;
            }
        }
    }

    /// Rewrite the sparse map into the dense matrix. One-way.
    fn promote(&mut self) {
        let State::Sparse { entries } = &self.state else {
            return;
        };
        let entries = entries.clone();
        debug!(
            precision = self.precision,
            entries = entries.len(),
            "hll-ttl sparse map promoted to dense matrix"
        );
        let m = num_registers(self.precision);
        let z = rank_cap(self.precision) as usize;
        self.state = State::Dense {
            cells: vec![0u32; m * z].into_boxed_slice(),
            top: vec![0u8; m].into_boxed_slice(),
        };
        for (hash, expiry) in entries {
            self.add_dense(hash, expiry);
        }
    }

    /// Materialize the register maxima for the estimator.
    fn registers(&self) -> Vec<u8> {
        let m = num_registers(self.precision);
        match &self.state {
            State::Sparse { entries } => {
                let z = rank_cap(self.precision);
                let mut registers = vec![0u8; m];
                for &hash in entries.keys() {
                    let i = register_index(hash, self.precision);
                    let r = rank(hash, z);
                    if r > registers[i] {
                        registers[i] = r;
                    }
                }
                registers
            }
            State::Dense { top, .. } => top.to_vec(),
        }
    }

    /// Estimate the live cardinality as of the last eviction.
    pub fn count(&self) -> f64 {
        estimate_from_registers(&self.registers(), self.precision)
    }

    /// Upper confidence bound on [`count`](Self::count).
    pub fn count_upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        crate::hll::upper_bound(self.count(), self.precision, num_std_dev)
    }

    /// Lower confidence bound on [`count`](Self::count).
    pub fn count_lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        crate::hll::lower_bound(self.count(), self.precision, num_std_dev)
    }

    /// Drop everything whose expiry is at or before `now`, then count.
    ///
    /// Idempotent and time-monotone: for `t1 <= t2`, applying both in
    /// order yields `count(t2) <= count(t1)`.
    pub fn evict_expired_and_count(&mut self, now: u32) -> f64 {
        match &mut self.state {
            State::Sparse { entries } => {
                entries.retain(|_, expiry| *expiry > now);
            }
            State::Dense { cells, top } => {
                let m = num_registers(self.precision);
                let z = rank_cap(self.precision) as usize;
                for i in 0..m {
                    let row = &mut cells[i * z..(i + 1) * z];
                    let mut new_top = 0u8;
                    // Walk ranks top-down: clear dead cells, and let the
                    // first survivor (stale-`top` rows included) set the
                    // new high-water.
                    for r in (1..z).rev() {
                        if row[r] != 0 && row[r] <= now {
                            row[r] = 0;
                        }
                        if new_top == 0 && row[r] != 0 {
                            new_top = r as u8;
                        }
                    }
                    top[i] = new_top;
                }
            }
        }
        self.count()
    }

    /// Cardinality of objects still live at `now`.
    ///
    /// Alias of [`evict_expired_and_count`](Self::evict_expired_and_count);
    /// callers replaying a trace use non-decreasing `now` values.
    pub fn count_at(&mut self, now: u32) -> f64 {
        self.evict_expired_and_count(now)
    }

    /// Merge `other` into `self` by per-cell expiry maximum and return the
    /// post-merge count.
    ///
    /// `merge_sn` is a monotone identifier of the merge pass: if it is not
    /// larger than the last applied one the call is a no-op returning the
    /// cached count, unless `force` is set. This makes fan-out merges of
    /// one source into many sinks idempotent per epoch.
    ///
    /// # Panics
    ///
    /// If the precisions differ.
    pub fn merge_count(&mut self, other: &HllTtl, merge_sn: u64, force: bool) -> f64 {
        if merge_sn <= self.last_merge_sn && !force {
            return self.cached_count;
        }
        self.merge_from(other);
        self.last_merge_sn = self.last_merge_sn.max(merge_sn);
        self.cached_count = self.count();
        self.cached_count
    }

    fn merge_from(&mut self, other: &HllTtl) {
        assert_eq!(
            self.precision, other.precision,
            "cannot merge sketches with different precisions"
        );
        match &other.state {
            State::Sparse { entries } => {
                for (&hash, &expiry) in entries {
                    self.add(hash, expiry);
                }
            }
            State::Dense {
                cells: other_cells,
                top: other_top,
            } => {
                // Dense cells carry no hashes, so the sink must be dense too.
                if self.is_sparse() {
                    self.promote();
                }
                if let State::Dense { cells, top } = &mut self.state {
                    for (mine, theirs) in cells.iter_mut().zip(other_cells.iter()) {
                        if theirs > mine {
                            *mine = *theirs;
                        }
                    }
                    for (mine, theirs) in top.iter_mut().zip(other_top.iter()) {
                        if theirs > mine {
                            *mine = *theirs;
                        }
                    }
                }
            }
        }
    }

    /// Serialize to the length-prefixed HLL-TTL binary form.
    ///
    /// Sparse sketches always use the sparse body; dense sketches use the
    /// full-matrix static body when `static_form` is set and the per-row
    /// run-length dynamic body otherwise. Output is deterministic: sparse
    /// entries are sorted by hash.
    pub fn serialize(&self, static_form: bool) -> Vec<u8> {
        let m = num_registers(self.precision);
        let z = rank_cap(self.precision) as usize;

        let mut bytes = SketchBytes::with_capacity(4 + TTL_HEADER_SIZE);
        bytes.write_u32_le(0); // patched below
        bytes.write_u32_le(self.block_size);
        bytes.write_u8(self.precision);
        bytes.write_u8(if self.is_sparse() {
            SPARSE_FORM
        } else {
            DENSE_FORM
        });
        bytes.write_u8(if static_form { STATIC_FORM } else { DYNAMIC_FORM });

        match &self.state {
            State::Sparse { entries } => {
                let mut sorted: Vec<(u64, u32)> =
                    entries.iter().map(|(&h, &e)| (h, e)).collect();
                sorted.sort_unstable_by_key(|&(h, _)| h);
                bytes.write_u32_le(sorted.len() as u32);
                for (hash, expiry) in sorted {
                    bytes.write_u64_le(hash);
                    bytes.write_u32_le(expiry);
                }
            }
            State::Dense { cells, .. } if static_form => {
                for &cell in cells.iter() {
                    bytes.write_u32_le(cell);
                }
            }
            State::Dense { cells, top } => {
                for i in 0..m {
                    if top[i] == 0 {
                        continue;
                    }
                    let row = &cells[i * z..(i + 1) * z];
                    // No cell above top[i] is occupied, so the scan stops there.
                    let occupied: Vec<(u8, u32)> = (1..=top[i] as usize)
                        .filter(|&r| row[r] != 0)
                        .map(|r| (r as u8, row[r]))
                        .collect();
                    bytes.write_u32_le(i as u32);
                    bytes.write_u32_le(occupied.len() as u32);
                    for (r, expiry) in occupied {
                        bytes.write_u8(r);
                        bytes.write_u32_le(expiry);
                    }
                }
            }
        }

        let total = (bytes.len() - 4) as u32;
        let mut out = bytes;
        out.patch_u32_le(0, total);
        out.into_bytes()
    }

    /// Reconstruct a sketch from [`serialize`](Self::serialize) output.
    ///
    /// Merge bookkeeping (`merge_sn` guard, cached count) restarts from
    /// zero; future merge identifiers are strictly larger, so the guard
    /// stays correct.
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
        let precision = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("precision"))?;
        if !(4..=16).contains(&precision) {
            return Err(Error::invalid_precision(precision));
        }
        let is_sparse = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("is_sparse"))?;
        let is_static = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("is_static"))?;

        let m = num_registers(precision);
        let z = rank_cap(precision) as usize;

        let state = if is_sparse == SPARSE_FORM {
            let n = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("sparse entry count"))?
                as usize;
            let mut entries = HashMap::with_capacity(n);
            for i in 0..n {
                let hash = cursor.read_u64_le().map_err(|_| {
                    Error::insufficient_data(format!("expected {n} entries, failed at {i}"))
                })?;
                let expiry = cursor.read_u32_le().map_err(|_| {
                    Error::insufficient_data(format!("expected {n} entries, failed at {i}"))
                })?;
                entries.insert(hash, expiry);
            }
            State::Sparse { entries }
        } else if is_static == STATIC_FORM {
            let expected = m * z * 4;
            if cursor.remaining() != expected {
                return Err(Error::deserial(format!(
                    "static dense body of {} bytes does not match m * Z * 4 = {}",
                    cursor.remaining(),
                    expected
                )));
            }
            let mut cells = vec![0u32; m * z];
            for cell in cells.iter_mut() {
                *cell = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("dense cell"))?;
            }
            let top = recompute_top(&cells, m, z);
            State::Dense {
                cells: cells.into_boxed_slice(),
                top,
            }
        } else {
            let mut cells = vec![0u32; m * z];
            while cursor.remaining() > 0 {
                let row = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("dynamic row index"))?
                    as usize;
                if row >= m {
                    return Err(Error::deserial(format!(
                        "dynamic row index {row} out of range for m = {m}"
                    )));
                }
                let n_nonzero = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("dynamic cell count"))?
                    as usize;
                for _ in 0..n_nonzero {
                    let r = cursor
                        .read_u8()
                        .map_err(|_| Error::insufficient_data("dynamic rank"))?
                        as usize;
                    if r == 0 || r >= z {
                        return Err(Error::deserial(format!(
                            "dynamic rank {r} out of range for Z = {z}"
                        )));
                    }
                    let expiry = cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("dynamic expiry"))?;
                    cells[row * z + r] = expiry;
                }
            }
            let top = recompute_top(&cells, m, z);
            State::Dense {
                cells: cells.into_boxed_slice(),
                top,
            }
        };

        Ok(Self {
            precision,
            block_size,
            state,
            last_merge_sn: 0,
            cached_count: 0.0,
        })
    }
}

/// Rebuild the per-register occupancy high-water from raw cells.
fn recompute_top(cells: &[u32], m: usize, z: usize) -> Box<[u8]> {
    let mut top = vec![0u8; m];
    for i in 0..m {
        let row = &cells[i * z..(i + 1) * z];
        for r in (1..z).rev() {
            if row[r] != 0 {
                top[i] = r as u8;
                break;
            }
        }
    }
    top.into_boxed_slice()
}
