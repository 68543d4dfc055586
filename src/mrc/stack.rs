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

//! The reuse-distance engine shared by Olken and fixed-rate SHARDS.
//!
//! Per access: TTL-evict everything that expired by the request timestamp,
//! then resolve the access against the order-statistic tree. A hit yields
//! the exact reuse distance (distinct keys seen since the previous access
//! of the same key, that access included); a miss registers the key. When
//! the tracked population hits its cap, the LRU key (the minimum sequence
//! number) is evicted to admit the newcomer.

use std::collections::HashMap;

use crate::index::EvictionIndex;
use crate::index::OrderStatTree;

/// Outcome of one tracked access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// The key was live; `distance` is its reuse distance, always >= 1.
    Hit {
        /// Distinct keys accessed since this key's previous access.
        distance: u64,
    },
    /// First sighting (or re-sighting after eviction).
    Miss,
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    sn: u64,
    expiry: u32,
}

/// Exact reuse-distance tracker over a (possibly sampled) key population.
#[derive(Debug, Clone)]
pub(crate) struct ReuseStack {
    tree: OrderStatTree,
    map: HashMap<u64, KeyState>,
    evictions: EvictionIndex,
    ttl_aware: bool,
    next_sn: u64,
    max_distinct: u64,
}

impl ReuseStack {
    pub(crate) fn new(ttl_aware: bool, max_distinct: u64) -> Self {
        Self {
            tree: OrderStatTree::new(),
            map: HashMap::new(),
            evictions: EvictionIndex::new(),
            ttl_aware,
            next_sn: 0,
            max_distinct,
        }
    }

    /// Number of currently tracked keys.
    pub(crate) fn live_keys(&self) -> usize {
        self.map.len()
    }

    /// Drop every tracked key whose expiry is at or before `now`.
    pub(crate) fn evict_expired(&mut self, now: u32) {
        for (_, keys) in self.evictions.pop_expired(now) {
            for key in keys {
                if let Some(state) = self.map.get(&key) {
                    // A later access may have pushed the expiry out; the
                    // stale heap entry then fires with nothing to do.
                    if state.expiry <= now {
                        self.tree.remove(state.sn);
                        self.map.remove(&key);
                    }
                }
            }
        }
    }

    /// Resolve one access.
    pub(crate) fn access(&mut self, key: u64, timestamp: u32, expiry: u32) -> Access {
        if self.ttl_aware {
            self.evict_expired(timestamp);
        }

        let previous = self.map.get(&key).copied();
        let outcome = match previous {
            Some(state) => {
                let distance = self.tree.rank_from_top(state.sn).unwrap_or_else(|| {
                    panic!("key {key:#x} tracked in the map but absent from the tree")
                });
                assert!(distance >= 1, "zero reuse distance on a hit");
                self.tree.remove(state.sn);
                Access::Hit { distance }
            }
            None => {
                if self.map.len() as u64 >= self.max_distinct {
                    if let Some((_, victim)) = self.tree.pop_min() {
                        self.map.remove(&victim);
                    }
                }
                Access::Miss
            }
        };

        let sn = self.next_sn;
        self.next_sn += 1;
        self.tree.insert(sn, key);

        let new_expiry = match previous {
            Some(state) => state.expiry.max(expiry),
            None => expiry,
        };
        self.map.insert(key, KeyState { sn, expiry: new_expiry });
        if self.ttl_aware && new_expiry != u32::MAX {
            self.evictions.register(new_expiry, key);
        }

        assert_eq!(
            self.tree.len(),
            self.map.len(),
            "order-statistic tree and key map diverged"
        );
        outcome
    }

    /// Forget a key entirely; used when a sampler sheds its sample set.
    pub(crate) fn discard(&mut self, key: u64) -> bool {
        match self.map.remove(&key) {
            Some(state) => {
                self.tree.remove(state.sn);
                true
            }
            None => false,
        }
    }
}
