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

//! Immutable configuration records passed to estimator constructors.
//!
//! Every knob is fixed at construction time; there are no process-wide
//! singletons and no environment-variable lookups. An estimator that needs
//! different parameters is a different estimator.

use crate::error::Error;

/// Default largest cache size the MRC is evaluated at: 2 TiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 2 << 40;

/// Default histogram bucket width: 32 MiB.
pub const DEFAULT_BUCKET_WIDTH_BYTES: u64 = 32 << 20;

/// Default fixed block size: 4 KiB.
pub const DEFAULT_FIXED_BLOCK_BYTES: u32 = 4 << 10;

/// Default admission cap for exact (non-sketched) calculators.
pub const DEFAULT_MAX_DISTINCT_OBJECTS: u64 = 600_000_000;

/// Default HLL precision (`m = 2^12 = 4096` registers, ~1.6% relative error).
pub const DEFAULT_PRECISION: u8 = 12;

/// Sizing parameters shared by every estimator in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingConfig {
    /// Largest cache size the MRC is evaluated at.
    pub max_cache_bytes: u64,
    /// Width of one stack-distance histogram bucket.
    pub bucket_width_bytes: u64,
    /// Block size used by fixed-block WSS and MRC accounting.
    pub fixed_block_bytes: u32,
    /// Smallest admissible object size; smaller sizes are clamped up.
    pub min_block: u32,
    /// Largest admissible object size; larger sizes are clamped down.
    pub max_block: u32,
    /// HLL precision `b`; `m = 2^b` registers. Must be in `[4, 16]`.
    pub precision: u8,
    /// Admission cap for exact calculators; beyond it new keys are dropped.
    pub max_distinct_objects: u64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            bucket_width_bytes: DEFAULT_BUCKET_WIDTH_BYTES,
            fixed_block_bytes: DEFAULT_FIXED_BLOCK_BYTES,
            min_block: 1,
            max_block: 1 << 30,
            precision: DEFAULT_PRECISION,
            max_distinct_objects: DEFAULT_MAX_DISTINCT_OBJECTS,
        }
    }
}

impl SizingConfig {
    /// Check the parameter ranges this crate relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if !(4..=16).contains(&self.precision) {
            return Err(Error::invalid_argument("precision must be in [4, 16]")
                .with_context("precision", self.precision));
        }
        if self.min_block == 0 || self.min_block > self.max_block {
            return Err(
                Error::invalid_argument("block size range must satisfy 0 < min_block <= max_block")
                    .with_context("min_block", self.min_block)
                    .with_context("max_block", self.max_block),
            );
        }
        if self.bucket_width_bytes == 0 || self.bucket_width_bytes > self.max_cache_bytes {
            return Err(Error::invalid_argument(
                "bucket width must be non-zero and no larger than max_cache_bytes",
            )
            .with_context("bucket_width_bytes", self.bucket_width_bytes)
            .with_context("max_cache_bytes", self.max_cache_bytes));
        }
        if self.fixed_block_bytes == 0 {
            return Err(Error::invalid_argument("fixed block size must be non-zero"));
        }
        Ok(())
    }

    /// Number of histogram buckets: the last valid index is
    /// `max_cache_bytes / bucket_width_bytes`.
    pub fn bucket_count(&self) -> usize {
        (self.max_cache_bytes / self.bucket_width_bytes) as usize + 1
    }

    /// Clamp an object size into `[min_block, max_block]`.
    #[inline]
    pub fn clamp_block(&self, size: u32) -> u32 {
        size.clamp(self.min_block, self.max_block)
    }
}

/// Fixed-rate SHARDS parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardsFixedRateConfig {
    /// Spatial sampling rate `R`, in `(0, 1]`.
    pub sampling_rate: f64,
    /// When set, the difference between the expected and the observed
    /// sampled-request count is redistributed into bucket 1 at finalization.
    pub adjusted: bool,
}

impl Default for ShardsFixedRateConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 0.01,
            adjusted: true,
        }
    }
}

impl ShardsFixedRateConfig {
    /// Check the sampling rate is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.sampling_rate > 0.0 && self.sampling_rate <= 1.0) {
            return Err(Error::invalid_argument("sampling rate must be in (0, 1]")
                .with_context("sampling_rate", self.sampling_rate));
        }
        Ok(())
    }
}

/// Fixed-size SHARDS parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardsFixedSizeConfig {
    /// Maximum number of simultaneously tracked sampled keys (`S_max`).
    pub sample_cap: usize,
    /// When set, the expected/observed difference is folded into bucket 1.
    pub adjusted: bool,
}

impl Default for ShardsFixedSizeConfig {
    fn default() -> Self {
        Self {
            sample_cap: 8 << 10,
            adjusted: true,
        }
    }
}

impl ShardsFixedSizeConfig {
    /// Check the sample bound is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_cap == 0 {
            return Err(Error::invalid_argument("sample cap must be non-zero"));
        }
        Ok(())
    }
}

/// CounterStacks fidelity preset.
///
/// HiFi trades memory and CPU for resolution; LoFi is the coarse preset
/// for long traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// 60-second stack period, 2% pruning delta, 30-second expiry rounding.
    HiFi,
    /// 3600-second stack period, 10% pruning delta, 60-second expiry rounding.
    LoFi,
}

impl Fidelity {
    /// Trace-time seconds between forced stack processings.
    pub fn period_seconds(self) -> u32 {
        match self {
            Fidelity::HiFi => 60,
            Fidelity::LoFi => 3600,
        }
    }

    /// Pruning delta: a counter survives only while its count is below
    /// `(1 - delta)` times the previous kept counter's count.
    pub fn prune_delta(self) -> f64 {
        match self {
            Fidelity::HiFi => 0.02,
            Fidelity::LoFi => 0.1,
        }
    }

    /// Granularity the eviction index rounds absolute expiries to.
    pub fn eviction_rounding_seconds(self) -> u32 {
        match self {
            Fidelity::HiFi => 30,
            Fidelity::LoFi => 60,
        }
    }
}

/// CounterStacks parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStacksConfig {
    /// Maximum number of live HLL-TTL counters.
    pub counter_capacity: usize,
    /// Fidelity preset (period, pruning delta, expiry rounding).
    pub fidelity: Fidelity,
    /// Worker threads for the merge fan-out; `0` keeps merges on the
    /// caller's thread.
    pub workers: usize,
}

impl Default for CounterStacksConfig {
    fn default() -> Self {
        Self {
            counter_capacity: 64,
            fidelity: Fidelity::HiFi,
            workers: 0,
        }
    }
}

impl CounterStacksConfig {
    /// Check the counter bound is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.counter_capacity < 2 {
            return Err(
                Error::invalid_argument("counter capacity must hold at least two counters")
                    .with_context("counter_capacity", self.counter_capacity),
            );
        }
        Ok(())
    }
}
