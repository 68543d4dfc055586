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

//! CounterStacks: approximate MRCs from a bounded bank of TTL-aware
//! HyperLogLogs.
//!
//! Conceptually, column `j` of the counter matrix is the cardinality of
//! the union of all accesses from epoch `j` onward; only the previous and
//! current column vectors are kept. Fresh accesses flow into a dedicated
//! "new" counter. On every stack processing:
//!
//! 1. the new counter is counted and TTL-evicted;
//! 2. it is merged into every older counter (idempotently per trigger via
//!    the merge identifier, optionally fanned out over a worker pool;
//!    merges on distinct counters touch disjoint state);
//! 3. it is promoted to a live column and replaced by an empty counter;
//! 4. per-row hit counts derive from the column deltas and are credited
//!    at the older window's cardinality, the largest stack distance a
//!    reuse bounded by that epoch can have;
//! 5. counters whose counts have drawn too close are pruned, and if the
//!    bank is still full the closest pair sets the pruning delta.
//!
//! Processing triggers on any of: enough requests buffered (the
//! downsample interval, sized from the oldest counter's cardinality),
//! enough trace time elapsed, or a pending TTL expiry firing.

use rayon::prelude::*;
use tracing::debug;

use crate::config::CounterStacksConfig;
use crate::config::SizingConfig;
use crate::error::Error;
use crate::hll::HllTtl;
use crate::index::EvictionIndex;
use crate::mrc::curve::MrcCurve;
use crate::mrc::histogram::StackDistanceHistogram;
use crate::trace::Request;

/// Lower bound of the dynamic downsample interval, in requests.
const MIN_DOWNSAMPLE: u64 = 10_000;

/// Upper bound of the dynamic downsample interval, in requests.
const MAX_DOWNSAMPLE: u64 = 1_000_000;

/// High-water cap on distinct pending expiry epochs.
const EVICTION_EPOCH_CAP: usize = 8000;

/// CounterStacks MRC generator.
#[derive(Debug)]
pub struct CounterStacksMrc {
    config: SizingConfig,
    stacks: CounterStacksConfig,
    /// Live columns oldest-first; the final element is the "new" counter.
    counters: Vec<HllTtl>,
    /// Per live column, the count at the previous stack processing.
    prev: Vec<f64>,
    evictions: EvictionIndex,
    hist_fixed: StackDistanceHistogram,
    hist_running: StackDistanceHistogram,
    pool: Option<rayon::ThreadPool>,
    merge_sn: u64,
    pending: u64,
    downsample: u64,
    last_trigger_time: u32,
    started: bool,
    mean_block: f64,
    total_requests: u64,
}

impl CounterStacksMrc {
    /// Create a generator.
    pub fn new(config: &SizingConfig, stacks: &CounterStacksConfig) -> Result<Self, Error> {
        config.validate()?;
        stacks.validate()?;
        let pool = if stacks.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(stacks.workers)
                .build()
                .map_err(|e| {
                    Error::invalid_argument(format!("cannot build merge worker pool: {e}"))
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            config: *config,
            stacks: *stacks,
            counters: vec![HllTtl::new(config.precision, 0)],
            prev: Vec::new(),
            evictions: EvictionIndex::with_coarsening(
                stacks.fidelity.eviction_rounding_seconds(),
                EVICTION_EPOCH_CAP,
            ),
            hist_fixed: StackDistanceHistogram::new(
                config.bucket_count(),
                config.bucket_width_bytes,
            ),
            hist_running: StackDistanceHistogram::new(
                config.bucket_count(),
                config.bucket_width_bytes,
            ),
            pool,
            merge_sn: 0,
            pending: 0,
            downsample: MIN_DOWNSAMPLE,
            last_trigger_time: 0,
            started: false,
            mean_block: 0.0,
            total_requests: 0,
        })
    }

    /// Number of live columns, the "new" counter excluded.
    pub fn live_counters(&self) -> usize {
        self.counters.len() - 1
    }

    /// Stack processings performed so far.
    pub fn processed_stacks(&self) -> u64 {
        self.merge_sn
    }

    /// Observe one request.
    ///
    /// Fails only when the counter bank overflows and closest-pair pruning
    /// cannot free a slot; the estimator is invalid afterwards.
    pub fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        if !request.is_analyzed() {
            return Ok(());
        }
        self.total_requests += 1;
        let block = self.config.clamp_block(request.value_size);
        self.mean_block += (block as f64 - self.mean_block) / self.total_requests as f64;

        if !self.started {
            self.started = true;
            self.last_trigger_time = request.timestamp;
        }

        let new_counter = self.counters.last_mut().expect("counter bank is never empty");
        new_counter.add(request.key_hash, request.eviction_time);
        if request.eviction_time != u32::MAX {
            self.evictions.register(request.eviction_time, request.key_hash);
        }
        self.pending += 1;

        let period = self.stacks.fidelity.period_seconds();
        let ttl_fired = self
            .evictions
            .next_expiry()
            .is_some_and(|expiry| expiry <= request.timestamp);
        if self.pending >= self.downsample
            || request.timestamp.saturating_sub(self.last_trigger_time) >= period
            || ttl_fired
        {
            self.process_stack(request.timestamp)?;
        }
        Ok(())
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) -> Result<(), Error> {
        for request in requests {
            self.add_request(request)?;
        }
        Ok(())
    }

    /// Run one stack processing at trace time `now`.
    pub fn process_stack(&mut self, now: u32) -> Result<(), Error> {
        let pending = self.pending;
        self.pending = 0;
        self.last_trigger_time = now;
        // Fired epochs have served their purpose as a trigger; the counts
        // themselves shrink inside the sketches.
        self.evictions.pop_expired(now);

        self.merge_sn += 1;
        let merge_sn = self.merge_sn;

        let used = self.counters.len() - 1;
        let (live, rest) = self.counters.split_at_mut(used);
        let new_counter = &mut rest[0];
        let new_count_before = new_counter.count();
        let new_count_after = new_counter.evict_expired_and_count(now);
        let snapshot = new_counter.clone();

        // Merge the batch into every older window, then age each one.
        // Counters never alias, so the fan-out is embarrassingly parallel.
        let merge_and_age = |counter: &mut HllTtl| {
            counter.merge_count(&snapshot, merge_sn, false);
            counter.evict_expired_and_count(now)
        };
        let mut cur: Vec<f64> = match &self.pool {
            Some(pool) => pool.install(|| live.par_iter_mut().map(merge_and_age).collect()),
            None => live.iter_mut().map(merge_and_age).collect(),
        };

        // Promote the new counter; its successor starts empty.
        cur.push(new_count_after);
        self.prev.push(0.0);
        self.counters.push(HllTtl::new(self.config.precision, 0));

        self.credit_rows(&cur, pending, new_count_before, new_count_after);
        self.prune(&mut cur)?;

        self.downsample = (cur.first().copied().unwrap_or(0.0) as u64)
            .clamp(MIN_DOWNSAMPLE, MAX_DOWNSAMPLE);
        debug!(
            live = cur.len(),
            downsample = self.downsample,
            "stack processed"
        );

        self.prev = cur;
        Ok(())
    }

    /// Derive per-row hit counts from the column deltas and credit them.
    ///
    /// Row `j` covers reuses whose previous access fell between epochs `j`
    /// and `j + 1`: accesses new to window `j + 1` but not to window `j`.
    /// Their stack distance is bounded by the older window's cardinality
    /// `cur[j]`. The last row covers reuses inside the batch itself,
    /// bounded by the new counter's own cardinality.
    fn credit_rows(&mut self, cur: &[f64], pending: u64, batch_distinct: f64, batch_live: f64) {
        let fixed_block = self.config.fixed_block_bytes as f64;
        for j in 0..cur.len() - 1 {
            let hits = (cur[j + 1] - self.prev[j + 1]) - (cur[j] - self.prev[j]);
            if hits != 0.0 {
                let max_sd = cur[j];
                self.hist_fixed.record_scaled(max_sd * fixed_block, hits);
                self.hist_running
                    .record_scaled(max_sd * self.mean_block, hits);
            }
        }

        let batch_hits = pending as f64 - batch_distinct;
        if batch_hits != 0.0 {
            self.hist_fixed
                .record_scaled(batch_live * fixed_block, batch_hits);
            self.hist_running
                .record_scaled(batch_live * self.mean_block, batch_hits);
        }
    }

    /// Prune columns that no longer add resolution.
    ///
    /// A column survives only while its count is below `(1 - delta)` times
    /// the previous kept column's. When the bank is still over capacity
    /// afterwards, the closest pair of columns sets a pruning delta that
    /// is guaranteed to remove at least one of them.
    fn prune(&mut self, cur: &mut Vec<f64>) -> Result<(), Error> {
        self.prune_with_delta(cur, self.stacks.fidelity.prune_delta());

        if self.counters.len() > self.stacks.counter_capacity {
            let mut closest = f64::INFINITY;
            for k in 1..cur.len() {
                if cur[k - 1] > 0.0 {
                    closest = closest.min(1.0 - cur[k] / cur[k - 1]);
                }
            }
            // Nudge past rounding so the closest pair itself fails the
            // keep test.
            let delta = closest.max(0.0) + 1e-9;
            self.prune_with_delta(cur, delta);
            if self.counters.len() > self.stacks.counter_capacity {
                return Err(Error::capacity(
                    "counter bank full and closest-pair pruning freed no slot",
                )
                .with_context("capacity", self.stacks.counter_capacity));
            }
        }
        Ok(())
    }

    fn prune_with_delta(&mut self, cur: &mut Vec<f64>, delta: f64) {
        if cur.is_empty() {
            return;
        }
        let mut keep = vec![true; cur.len()];
        let mut last_kept = 0usize;
        for k in 1..cur.len() {
            if cur[k] < (1.0 - delta) * cur[last_kept] {
                last_kept = k;
            } else {
                keep[k] = false;
            }
        }
        if keep.iter().all(|&k| k) {
            return;
        }

        let pruned = keep.iter().filter(|&&k| !k).count();
        debug!(pruned, delta, "pruning redundant counters");

        let mut index = 0;
        self.counters.retain(|_| {
            // The trailing new counter is always kept.
            let kept = index >= keep.len() || keep[index];
            index += 1;
            kept
        });
        let mut index = 0;
        cur.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        let mut index = 0;
        self.prev.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
    }

    /// MRC with every hit billed `fixed_block_bytes`.
    pub fn mrc_fixed(&self) -> MrcCurve {
        MrcCurve::from_histogram(&self.hist_fixed, self.total_requests as f64)
    }

    /// MRC with every hit billed the running mean block size.
    pub fn mrc_running_avg(&self) -> MrcCurve {
        MrcCurve::from_histogram(&self.hist_running, self.total_requests as f64)
    }

    /// Serialize every internal counter, oldest first, the "new" counter
    /// included. The snapshot captures the counting state only; histograms
    /// and trigger bookkeeping live outside it.
    pub fn snapshot_counters(&self, static_form: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.counters.len() as u32).to_le_bytes());
        for counter in &self.counters {
            out.extend_from_slice(&counter.serialize(static_form));
        }
        out
    }

    /// Replace the internal counters from a
    /// [`snapshot_counters`](Self::snapshot_counters) image.
    ///
    /// The snapshot must hold exactly as many counters as the estimator
    /// currently does.
    pub fn restore_counters(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() < 4 {
            return Err(Error::insufficient_data("counter snapshot header"));
        }
        let n = u32::from_le_bytes(data[..4].try_into().expect("4-byte slice")) as usize;
        if n != self.counters.len() {
            return Err(Error::deserial(format!(
                "snapshot holds {} counters, estimator has {}",
                n,
                self.counters.len()
            )));
        }

        let mut restored = Vec::with_capacity(n);
        let mut offset = 4usize;
        for i in 0..n {
            if data.len() < offset + 4 {
                return Err(Error::insufficient_data(format!(
                    "length prefix of counter {i}"
                )));
            }
            let len =
                u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4-byte slice"))
                    as usize;
            let end = offset + 4 + len;
            if data.len() < end {
                return Err(Error::insufficient_data(format!("body of counter {i}")));
            }
            let counter = HllTtl::deserialize(&data[offset..end])?;
            if counter.precision() != self.config.precision {
                return Err(Error::deserial(format!(
                    "counter {i} has precision {}, expected {}",
                    counter.precision(),
                    self.config.precision
                )));
            }
            restored.push(counter);
            offset = end;
        }
        if offset != data.len() {
            return Err(Error::deserial(format!(
                "{} trailing bytes after the last counter",
                data.len() - offset
            )));
        }
        self.counters = restored;
        Ok(())
    }
}
