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

//! Fixed-size SHARDS: bounded-sample stack distances with an adaptive
//! threshold.
//!
//! The sampler starts with threshold `T = P` (everything sampled) and a
//! hard cap on tracked keys. When admitting a key would exceed the cap,
//! the least-promising sample, the one with the largest spatial hash
//! `Ti`, is shed; `T` shrinks to that `Ti`, and every sample tied at the
//! same `Ti` is discharged in the same pass. Histogram cells remember the
//! threshold at their last update, so earlier credits are retroactively
//! rescaled by `T_new / T_old` as the threshold tightens.
//!
//! Sample records live in a slab indexed by integer handles; both
//! priority queues (shed order by `Ti`, TTL order by expiry) carry only
//! `(priority, handle, generation)` triples and are cleaned lazily, so no
//! record ever references another.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use tracing::debug;

use crate::config::ShardsFixedSizeConfig;
use crate::config::SizingConfig;
use crate::error::Error;
use crate::index::OrderStatTree;
use crate::mrc::curve::MrcCurve;
use crate::mrc::histogram::StackDistanceHistogram;
use crate::mrc::histogram::ThresholdCounter;
use crate::mrc::histogram::ThresholdHistogram;
use crate::mrc::shards::SAMPLING_MODULUS;
use crate::trace::Request;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: u64,
    /// Spatial hash `Ti = hash & (P - 1)`; fixed per key.
    ti: u32,
    sn: u64,
    expiry: u32,
    /// Bumped on free so stale queue entries can be recognized.
    gen: u32,
    alive: bool,
}

/// Fixed-size SHARDS MRC generator.
#[derive(Debug, Clone)]
pub struct ShardsFixedSizeMrc {
    config: SizingConfig,
    sampling: ShardsFixedSizeConfig,
    ttl_aware: bool,
    threshold: u32,
    tree: OrderStatTree,
    map: HashMap<u64, u32>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Max-heap by `Ti`: the top is the least promising live sample.
    sample_pq: BinaryHeap<(u32, u32, u32)>,
    /// Min-heap by expiry, paired to the same slots.
    evict_pq: BinaryHeap<(Reverse<u32>, u32, u32)>,
    hist_fixed: ThresholdHistogram,
    hist_running: ThresholdHistogram,
    totals: ThresholdCounter,
    next_sn: u64,
    mean_block: f64,
    total_requests: u64,
}

impl ShardsFixedSizeMrc {
    /// Create a generator; `ttl_aware` enables expiry-driven eviction of
    /// sampled keys.
    pub fn new(
        config: &SizingConfig,
        sampling: &ShardsFixedSizeConfig,
        ttl_aware: bool,
    ) -> Result<Self, Error> {
        config.validate()?;
        sampling.validate()?;
        Ok(Self {
            config: *config,
            sampling: *sampling,
            ttl_aware,
            threshold: SAMPLING_MODULUS,
            tree: OrderStatTree::new(),
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            sample_pq: BinaryHeap::new(),
            evict_pq: BinaryHeap::new(),
            hist_fixed: ThresholdHistogram::new(config.bucket_count(), config.bucket_width_bytes),
            hist_running: ThresholdHistogram::new(
                config.bucket_count(),
                config.bucket_width_bytes,
            ),
            totals: ThresholdCounter::new(),
            next_sn: 0,
            mean_block: 0.0,
            total_requests: 0,
        })
    }

    /// The current sampling threshold `T`.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The current effective sampling rate `T / P`.
    pub fn sampling_rate(&self) -> f64 {
        self.threshold as f64 / SAMPLING_MODULUS as f64
    }

    /// Number of currently tracked sampled keys.
    pub fn sample_size(&self) -> usize {
        self.map.len()
    }

    /// Observe one request.
    pub fn add_request(&mut self, request: &Request) {
        if !request.is_analyzed() {
            return;
        }
        self.total_requests += 1;
        let block = self.config.clamp_block(request.value_size);
        self.mean_block += (block as f64 - self.mean_block) / self.total_requests as f64;

        let ti = request.key_hash as u32 & (SAMPLING_MODULUS - 1);
        if ti >= self.threshold {
            return;
        }

        if self.ttl_aware {
            self.evict_expired(request.timestamp);
        }
        self.totals.increment(self.threshold);

        match self.map.get(&request.key_hash).copied() {
            Some(handle) => self.record_hit(handle, request),
            None => self.admit(ti, request),
        }

        assert_eq!(
            self.tree.len(),
            self.map.len(),
            "order-statistic tree and sample map diverged"
        );
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) {
        for request in requests {
            self.add_request(request);
        }
    }

    fn record_hit(&mut self, handle: u32, request: &Request) {
        let (sn, old_expiry) = {
            let slot = &self.slots[handle as usize];
            (slot.sn, slot.expiry)
        };
        let distance = self.tree.rank_from_top(sn).unwrap_or_else(|| {
            panic!(
                "key {:#x} tracked in the sample map but absent from the tree",
                request.key_hash
            )
        });
        assert!(distance >= 1, "zero reuse distance on a hit");

        let expanded = distance as f64 / self.sampling_rate();
        self.hist_fixed.record(
            expanded * self.config.fixed_block_bytes as f64,
            self.threshold,
        );
        self.hist_running
            .record(expanded * self.mean_block, self.threshold);

        self.tree.remove(sn);
        let new_sn = self.next_sn;
        self.next_sn += 1;
        self.tree.insert(new_sn, request.key_hash);

        let slot = &mut self.slots[handle as usize];
        slot.sn = new_sn;
        if request.eviction_time > old_expiry {
            slot.expiry = request.eviction_time;
            if self.ttl_aware && slot.expiry != u32::MAX {
                let entry = (Reverse(slot.expiry), handle, slot.gen);
                self.evict_pq.push(entry);
            }
        }
    }

    fn admit(&mut self, ti: u32, request: &Request) {
        if self.map.len() >= self.sampling.sample_cap {
            self.shrink_threshold();
            // The newcomer may no longer qualify under the tightened
            // threshold.
            if ti >= self.threshold {
                return;
            }
        }

        let sn = self.next_sn;
        self.next_sn += 1;

        let handle = self.alloc(Slot {
            key: request.key_hash,
            ti,
            sn,
            expiry: request.eviction_time,
            gen: 0,
            alive: true,
        });
        self.tree.insert(sn, request.key_hash);
        self.map.insert(request.key_hash, handle);
        let gen = self.slots[handle as usize].gen;
        self.sample_pq.push((ti, handle, gen));
        if self.ttl_aware && request.eviction_time != u32::MAX {
            self.evict_pq
                .push((Reverse(request.eviction_time), handle, gen));
        }
    }

    /// Shed the least-promising sample(s) and tighten `T` to their `Ti`.
    fn shrink_threshold(&mut self) {
        let t_max = loop {
            let Some(&(ti, handle, gen)) = self.sample_pq.peek() else {
                return;
            };
            let slot = &self.slots[handle as usize];
            if !slot.alive || slot.gen != gen {
                self.sample_pq.pop();
                continue;
            }
            break ti;
        };

        // Discharge every live sample tied at t_max in one pass.
        let mut shed = 0usize;
        while let Some(&(ti, handle, gen)) = self.sample_pq.peek() {
            let stale = {
                let slot = &self.slots[handle as usize];
                !slot.alive || slot.gen != gen
            };
            if stale {
                self.sample_pq.pop();
                continue;
            }
            if ti < t_max {
                break;
            }
            self.sample_pq.pop();
            self.discard(handle);
            shed += 1;
        }

        self.threshold = t_max;
        debug!(
            threshold = self.threshold,
            shed, "sample cap reached, threshold tightened"
        );
    }

    fn discard(&mut self, handle: u32) {
        let (key, sn) = {
            let slot = &self.slots[handle as usize];
            (slot.key, slot.sn)
        };
        self.tree.remove(sn);
        self.map.remove(&key);
        self.release(handle);
    }

    fn evict_expired(&mut self, now: u32) {
        while let Some(&(Reverse(expiry), handle, gen)) = self.evict_pq.peek() {
            if expiry > now {
                break;
            }
            self.evict_pq.pop();
            let expired = {
                let slot = &self.slots[handle as usize];
                slot.alive && slot.gen == gen && slot.expiry <= now
            };
            if expired {
                self.discard(handle);
            }
        }
    }

    fn alloc(&mut self, mut slot: Slot) -> u32 {
        if let Some(handle) = self.free.pop() {
            // Keep the bumped generation of the recycled slot.
            slot.gen = self.slots[handle as usize].gen;
            self.slots[handle as usize] = slot;
            handle
        } else {
            self.slots.push(slot);
            (self.slots.len() - 1) as u32
        }
    }

    fn release(&mut self, handle: u32) {
        let slot = &mut self.slots[handle as usize];
        slot.alive = false;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(handle);
    }

    fn curve(&self, histogram: &ThresholdHistogram) -> MrcCurve {
        let flat: StackDistanceHistogram = histogram.finalize(self.threshold);
        let observed = self.totals.value_at(self.threshold);
        if self.sampling.adjusted {
            let expected = self.sampling_rate() * self.total_requests as f64;
            let diff = expected - observed;
            if diff != 0.0 {
                let mut corrected = flat.clone();
                corrected.add_to_bucket(1, diff);
                return MrcCurve::from_histogram(&corrected, expected);
            }
            MrcCurve::from_histogram(&flat, expected)
        } else {
            MrcCurve::from_histogram(&flat, observed)
        }
    }

    /// MRC with every hit billed `fixed_block_bytes`.
    pub fn mrc_fixed(&self) -> MrcCurve {
        self.curve(&self.hist_fixed)
    }

    /// MRC with every hit billed the running mean block size at hit time.
    pub fn mrc_running_avg(&self) -> MrcCurve {
        self.curve(&self.hist_running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::scramble_key;

    fn config() -> SizingConfig {
        SizingConfig {
            max_cache_bytes: 64 << 20,
            bucket_width_bytes: 64 << 10,
            fixed_block_bytes: 4096,
            ..SizingConfig::default()
        }
    }

    #[test]
    fn test_sample_never_exceeds_cap() {
        let sampling = ShardsFixedSizeConfig {
            sample_cap: 64,
            adjusted: false,
        };
        let mut shards = ShardsFixedSizeMrc::new(&config(), &sampling, false).unwrap();
        for key in 0..10_000u64 {
            shards.add_request(&Request::get_no_ttl(0, scramble_key(key), 4096));
        }
        assert!(shards.sample_size() <= 64);
        assert!(
            shards.threshold() < SAMPLING_MODULUS,
            "threshold must have tightened"
        );
    }

    #[test]
    fn test_threshold_only_tightens() {
        let sampling = ShardsFixedSizeConfig {
            sample_cap: 32,
            adjusted: false,
        };
        let mut shards = ShardsFixedSizeMrc::new(&config(), &sampling, false).unwrap();
        let mut last = shards.threshold();
        for key in 0..5_000u64 {
            shards.add_request(&Request::get_no_ttl(0, scramble_key(key), 4096));
            assert!(shards.threshold() <= last);
            last = shards.threshold();
        }
    }

    #[test]
    fn test_small_population_stays_exact() {
        // Below the cap no shedding happens: T stays at P and distances
        // are unscaled, so the curve matches exact Olken.
        use crate::mrc::olken::OlkenMrc;

        let sampling = ShardsFixedSizeConfig {
            sample_cap: 1024,
            adjusted: false,
        };
        let cfg = config();
        let mut shards = ShardsFixedSizeMrc::new(&cfg, &sampling, false).unwrap();
        let mut olken = OlkenMrc::new(&cfg, false).unwrap();
        for i in 0..3_000u64 {
            let request = Request::get_no_ttl(i as u32, scramble_key(i % 50), 4096);
            shards.add_request(&request);
            olken.add_request(&request);
        }
        assert_eq!(shards.threshold(), SAMPLING_MODULUS);
        assert_eq!(shards.mrc_fixed(), olken.mrc_fixed());
    }

    #[test]
    fn test_ttl_eviction_frees_sample_space() {
        let sampling = ShardsFixedSizeConfig {
            sample_cap: 1024,
            adjusted: false,
        };
        let mut shards = ShardsFixedSizeMrc::new(&config(), &sampling, true).unwrap();
        for key in 0..100u64 {
            shards.add_request(&Request::get(0, scramble_key(key), 4096, 50));
        }
        assert_eq!(shards.sample_size(), 100);

        // All expire by t = 50; the next access sweeps them out.
        shards.add_request(&Request::get(60, scramble_key(500), 4096, 120));
        assert_eq!(shards.sample_size(), 1);
    }

    #[test]
    fn test_expired_key_is_a_miss() {
        let sampling = ShardsFixedSizeConfig {
            sample_cap: 1024,
            adjusted: false,
        };
        let mut shards = ShardsFixedSizeMrc::new(&config(), &sampling, true).unwrap();
        let key = scramble_key(1);
        shards.add_request(&Request::get(0, key, 4096, 5));
        shards.add_request(&Request::get(10, key, 4096, 50));
        let curve = shards.mrc_fixed();
        assert_eq!(curve.points().len(), 1, "no hit may be credited");
    }

    #[test]
    fn test_shed_keys_are_rejected_afterwards() {
        let sampling = ShardsFixedSizeConfig {
            sample_cap: 8,
            adjusted: false,
        };
        let mut shards = ShardsFixedSizeMrc::new(&config(), &sampling, false).unwrap();
        for key in 0..1000u64 {
            shards.add_request(&Request::get_no_ttl(0, scramble_key(key), 4096));
        }
        let t = shards.threshold();
        // Every tracked key satisfies the tightened predicate.
        for slot in shards.slots.iter().filter(|s| s.alive) {
            assert!(slot.ti < t);
        }
    }
}
