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

//! Exact working-set calculator.

use std::collections::HashMap;

use tracing::warn;

use crate::config::SizingConfig;
use crate::trace::Request;

#[derive(Debug, Clone, Copy)]
struct Entry {
    expiry: u32,
    block: u32,
}

/// Sketch-free working-set calculator: every live object is held in a
/// `hash -> (expiry, block)` map.
///
/// Memory is bounded by `max_distinct_objects`; once the map is full, new
/// keys are silently dropped (counted, and logged once) while existing
/// keys keep refreshing. Eviction is lazy and guarded by the last eviction
/// time, so out-of-order eviction calls are idempotent.
#[derive(Debug, Clone, Default)]
pub struct ExactWss {
    entries: HashMap<u64, Entry>,
    max_distinct: u64,
    last_evict_time: u32,
    /// Sum of block sizes over live entries.
    live_bytes: u64,
    mean_block: f64,
    observed: u64,
    dropped: u64,
}

impl ExactWss {
    /// Create a calculator bounded by `config.max_distinct_objects`.
    pub fn new(config: &SizingConfig) -> Self {
        Self {
            max_distinct: config.max_distinct_objects,
            ..Self::default()
        }
    }

    /// Observe one request: insert the key or upgrade its expiry and block.
    pub fn add(&mut self, request: &Request) {
        if !request.is_analyzed() {
            return;
        }
        self.observed += 1;
        self.mean_block +=
            (request.value_size as f64 - self.mean_block) / self.observed as f64;

        if let Some(entry) = self.entries.get_mut(&request.key_hash) {
            if request.eviction_time > entry.expiry {
                entry.expiry = request.eviction_time;
            }
            if request.value_size != entry.block {
                self.live_bytes = self.live_bytes - entry.block as u64 + request.value_size as u64;
                entry.block = request.value_size;
            }
            return;
        }

        if self.entries.len() as u64 >= self.max_distinct {
            if self.dropped == 0 {
                warn!(
                    max_distinct = self.max_distinct,
                    "exact WSS map is full; new keys are no longer admitted"
                );
            }
            self.dropped += 1;
            return;
        }

        self.entries.insert(
            request.key_hash,
            Entry {
                expiry: request.eviction_time,
                block: request.value_size,
            },
        );
        self.live_bytes += request.value_size as u64;
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) {
        for request in requests {
            self.add(request);
        }
    }

    /// Remove every entry with `expiry <= now`.
    ///
    /// Guarded by the last eviction time: calls that move time backwards
    /// are no-ops, so replays and out-of-order callers cannot double-evict.
    pub fn evict(&mut self, now: u32) {
        if now <= self.last_evict_time {
            return;
        }
        self.last_evict_time = now;
        let live_bytes = &mut self.live_bytes;
        self.entries.retain(|_, entry| {
            if entry.expiry <= now {
                *live_bytes -= entry.block as u64;
                false
            } else {
                true
            }
        });
    }

    /// Number of live distinct objects.
    pub fn cardinality(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Sum of live block sizes in bytes: the exact WSS.
    pub fn total_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Live cardinality times the online mean block size.
    pub fn mean_product(&self) -> f64 {
        self.cardinality() as f64 * self.mean_block
    }

    /// Keys refused since the map filled.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: u64, size: u32, ts: u32, expiry: u32) -> Request {
        Request::get(ts, key, size, expiry)
    }

    #[test]
    fn test_exact_summaries() {
        let mut wss = ExactWss::new(&SizingConfig::default());
        wss.add(&request(1, 100, 0, 1000));
        wss.add(&request(2, 300, 0, 1000));
        wss.add(&request(1, 100, 1, 1000)); // repeat access

        assert_eq!(wss.cardinality(), 2);
        assert_eq!(wss.total_bytes(), 400);
        // Mean over three requests: (100 + 300 + 100) / 3.
        let expected_mean = 500.0 / 3.0;
        assert!((wss.mean_product() - 2.0 * expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_eviction_is_lazy_and_guarded() {
        let mut wss = ExactWss::new(&SizingConfig::default());
        wss.add(&request(1, 100, 0, 50));
        wss.add(&request(2, 100, 0, 150));

        wss.evict(100);
        assert_eq!(wss.cardinality(), 1);
        assert_eq!(wss.total_bytes(), 100);

        // Time moving backwards is a no-op.
        wss.evict(10);
        assert_eq!(wss.cardinality(), 1);

        wss.evict(150);
        assert_eq!(wss.cardinality(), 0);
        assert_eq!(wss.total_bytes(), 0);
    }

    #[test]
    fn test_readd_extends_lifetime() {
        let mut wss = ExactWss::new(&SizingConfig::default());
        wss.add(&request(1, 100, 0, 50));
        wss.add(&request(1, 100, 10, 500));
        wss.evict(100);
        assert_eq!(wss.cardinality(), 1, "refreshed expiry must survive");
    }

    #[test]
    fn test_capacity_cap_drops_new_keys() {
        let config = SizingConfig {
            max_distinct_objects: 2,
            ..SizingConfig::default()
        };
        let mut wss = ExactWss::new(&config);
        wss.add(&request(1, 100, 0, 1000));
        wss.add(&request(2, 100, 0, 1000));
        wss.add(&request(3, 100, 0, 1000)); // dropped
        wss.add(&request(1, 100, 1, 2000)); // refresh is still admitted

        assert_eq!(wss.cardinality(), 2);
        assert_eq!(wss.dropped(), 1);
        wss.evict(1500);
        assert_eq!(wss.cardinality(), 1, "key 1 was refreshed to 2000");
    }

    #[test]
    fn test_block_resize_adjusts_bytes() {
        let mut wss = ExactWss::new(&SizingConfig::default());
        wss.add(&request(1, 100, 0, 1000));
        wss.add(&request(1, 250, 1, 1000));
        assert_eq!(wss.total_bytes(), 250);
    }
}
