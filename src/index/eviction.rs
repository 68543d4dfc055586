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

//! Bulk TTL eviction index.
//!
//! A min-heap over the distinct absolute expiries currently pending, plus
//! a map from each expiry to the set of keys carrying it. When the heap
//! root falls at or before the current trace time, whole expiry buckets
//! pop at once.
//!
//! CounterStacks coarsens expiries to a rounding granularity and caps the
//! number of distinct pending epochs; on overflow the nearest 90% are
//! retained and the far tail is dropped (those objects simply stop being
//! TTL-tracked, which only overstates liveness).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;

/// Min-heap of expiry epochs with per-epoch key sets.
#[derive(Debug, Clone, Default)]
pub struct EvictionIndex {
    heap: BinaryHeap<Reverse<u32>>,
    buckets: HashMap<u32, HashSet<u64>>,
    /// Expiries are rounded up to a multiple of this; `1` disables.
    rounding: u32,
    /// Cap on distinct pending epochs; `0` disables.
    max_epochs: usize,
}

impl EvictionIndex {
    /// Create an index with exact (unrounded, uncapped) expiries.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            buckets: HashMap::new(),
            rounding: 1,
            max_epochs: 0,
        }
    }

    /// Create an index that rounds expiries up to `rounding_seconds` and
    /// keeps at most `max_epochs` distinct pending epochs.
    pub fn with_coarsening(rounding_seconds: u32, max_epochs: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            buckets: HashMap::new(),
            rounding: rounding_seconds.max(1),
            max_epochs,
        }
    }

    /// Number of distinct pending expiry epochs.
    pub fn pending_epochs(&self) -> usize {
        self.buckets.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The earliest pending expiry, if any.
    pub fn next_expiry(&self) -> Option<u32> {
        self.heap.peek().map(|Reverse(e)| *e)
    }

    /// Record that `key` expires at `expiry`.
    ///
    /// Expiries saturate rather than wrap when rounding pushes them past
    /// `u32::MAX`; a saturated epoch never fires.
    pub fn register(&mut self, expiry: u32, key: u64) {
        let epoch = self.round_up(expiry);
        match self.buckets.get_mut(&epoch) {
            Some(keys) => {
                keys.insert(key);
            }
            None => {
                let mut keys = HashSet::new();
                keys.insert(key);
                self.buckets.insert(epoch, keys);
                self.heap.push(Reverse(epoch));
                if self.max_epochs != 0 && self.buckets.len() > self.max_epochs {
                    self.shed_far_tail();
                }
            }
        }
    }

    /// Pop every epoch with `expiry <= now`, returning `(epoch, keys)`
    /// pairs in ascending epoch order.
    pub fn pop_expired(&mut self, now: u32) -> Vec<(u32, Vec<u64>)> {
        let mut fired = Vec::new();
        while let Some(&Reverse(epoch)) = self.heap.peek() {
            if epoch > now {
                break;
            }
            self.heap.pop();
            // Buckets shed on overflow may leave stale heap entries behind.
            if let Some(keys) = self.buckets.remove(&epoch) {
                let mut keys: Vec<u64> = keys.into_iter().collect();
                keys.sort_unstable();
                fired.push((epoch, keys));
            }
        }
        fired
    }

    #[inline]
    fn round_up(&self, expiry: u32) -> u32 {
        if self.rounding <= 1 {
            return expiry;
        }
        match expiry.checked_add(self.rounding - 1) {
            Some(bumped) => bumped / self.rounding * self.rounding,
            None => u32::MAX,
        }
    }

    /// Drop the latest 10% of pending epochs, keeping the nearest 90%.
    fn shed_far_tail(&mut self) {
        let keep = self.max_epochs * 9 / 10;
        let mut epochs: Vec<u32> = self.buckets.keys().copied().collect();
        epochs.sort_unstable();
        let dropped = epochs.split_off(keep);
        debug!(
            kept = keep,
            dropped = dropped.len(),
            "eviction index epoch cap exceeded, shedding far tail"
        );
        for epoch in &dropped {
            self.buckets.remove(epoch);
        }
        self.heap = epochs.into_iter().map(Reverse).collect();
    }
}
