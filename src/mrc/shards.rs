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

//! Fixed-rate SHARDS: spatially sampled stack distances.
//!
//! A key participates when `(hash & (P - 1)) < T` with modulus `P = 2^24`
//! and threshold `T = round(R * P)`. The hash is uniform, so a fixed
//! fraction `R` of the key space is tracked and a sampled reuse distance
//! `d` estimates a true distance of `d / R`. Hits are credited at the
//! expanded distance; in adjusted mode the difference between the expected
//! and observed sampled-request count is folded into bucket 1 at
//! finalization.

use crate::config::ShardsFixedRateConfig;
use crate::config::SizingConfig;
use crate::error::Error;
use crate::mrc::curve::MrcCurve;
use crate::mrc::histogram::StackDistanceHistogram;
use crate::mrc::stack::Access;
use crate::mrc::stack::ReuseStack;
use crate::trace::Request;

/// Spatial sampling modulus `P`; thresholds live in `[0, P)`.
pub const SAMPLING_MODULUS: u32 = 1 << 24;

/// Fixed-rate SHARDS MRC generator.
#[derive(Debug, Clone)]
pub struct ShardsFixedRateMrc {
    config: SizingConfig,
    sampling: ShardsFixedRateConfig,
    threshold: u32,
    stack: ReuseStack,
    hist_fixed: StackDistanceHistogram,
    hist_running: StackDistanceHistogram,
    mean_block: f64,
    total_requests: u64,
    sampled_requests: u64,
}

impl ShardsFixedRateMrc {
    /// Create a generator; `ttl_aware` enables expiry-driven eviction of
    /// sampled keys.
    pub fn new(
        config: &SizingConfig,
        sampling: &ShardsFixedRateConfig,
        ttl_aware: bool,
    ) -> Result<Self, Error> {
        config.validate()?;
        sampling.validate()?;
        let threshold = (sampling.sampling_rate * SAMPLING_MODULUS as f64).round() as u32;
        Ok(Self {
            config: *config,
            sampling: *sampling,
            threshold,
            stack: ReuseStack::new(ttl_aware, config.max_distinct_objects),
            hist_fixed: StackDistanceHistogram::new(
                config.bucket_count(),
                config.bucket_width_bytes,
            ),
            hist_running: StackDistanceHistogram::new(
                config.bucket_count(),
                config.bucket_width_bytes,
            ),
            mean_block: 0.0,
            total_requests: 0,
            sampled_requests: 0,
        })
    }

    /// The sampling threshold `T`.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether a key hash passes the spatial predicate.
    #[inline]
    pub fn is_sampled(&self, key_hash: u64) -> bool {
        (key_hash as u32 & (SAMPLING_MODULUS - 1)) < self.threshold
    }

    /// Observe one request.
    pub fn add_request(&mut self, request: &Request) {
        if !request.is_analyzed() {
            return;
        }
        self.total_requests += 1;
        let block = self.config.clamp_block(request.value_size);
        self.mean_block += (block as f64 - self.mean_block) / self.total_requests as f64;

        if !self.is_sampled(request.key_hash) {
            return;
        }
        self.sampled_requests += 1;

        let outcome = self
            .stack
            .access(request.key_hash, request.timestamp, request.eviction_time);
        if let Access::Hit { distance } = outcome {
            let expanded = distance as f64 / self.sampling.sampling_rate;
            self.hist_fixed
                .record_scaled(expanded * self.config.fixed_block_bytes as f64, 1.0);
            self.hist_running
                .record_scaled(expanded * self.mean_block, 1.0);
        }
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) {
        for request in requests {
            self.add_request(request);
        }
    }

    /// Sampled requests actually observed.
    pub fn sampled_requests(&self) -> u64 {
        self.sampled_requests
    }

    /// Sampled requests expected under the configured rate:
    /// `round(R * N_total)`.
    pub fn expected_sampled(&self) -> u64 {
        (self.sampling.sampling_rate * self.total_requests as f64).round() as u64
    }

    fn curve(&self, histogram: &StackDistanceHistogram) -> MrcCurve {
        if self.sampling.adjusted {
            let expected = self.expected_sampled() as f64;
            let diff = expected - self.sampled_requests as f64;
            if diff != 0.0 {
                let mut corrected = histogram.clone();
                corrected.add_to_bucket(1, diff);
                return MrcCurve::from_histogram(&corrected, expected);
            }
            MrcCurve::from_histogram(histogram, expected)
        } else {
            MrcCurve::from_histogram(histogram, self.sampled_requests as f64)
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
    fn test_threshold_from_rate() {
        let sampling = ShardsFixedRateConfig {
            sampling_rate: 0.25,
            adjusted: false,
        };
        let shards = ShardsFixedRateMrc::new(&config(), &sampling, false).unwrap();
        assert_eq!(shards.threshold(), SAMPLING_MODULUS / 4);
    }

    #[test]
    fn test_rate_one_matches_olken_exactly() {
        use crate::mrc::olken::OlkenMrc;

        let sampling = ShardsFixedRateConfig {
            sampling_rate: 1.0,
            adjusted: false,
        };
        let cfg = config();
        let mut shards = ShardsFixedRateMrc::new(&cfg, &sampling, false).unwrap();
        let mut olken = OlkenMrc::new(&cfg, false).unwrap();

        for i in 0..2000u64 {
            let request = Request::get_no_ttl(i as u32, scramble_key(i % 100), 4096);
            shards.add_request(&request);
            olken.add_request(&request);
        }
        assert_eq!(shards.sampled_requests(), 2000);
        assert_eq!(shards.mrc_fixed(), olken.mrc_fixed());
    }

    #[test]
    fn test_sampled_fraction_tracks_rate() {
        let sampling = ShardsFixedRateConfig {
            sampling_rate: 0.1,
            adjusted: true,
        };
        let mut shards = ShardsFixedRateMrc::new(&config(), &sampling, false).unwrap();
        for key in 0..50_000u64 {
            shards.add_request(&Request::get_no_ttl(0, scramble_key(key), 4096));
        }
        let observed = shards.sampled_requests() as f64;
        let expected = 5000.0;
        assert!(
            (observed - expected).abs() < expected * 0.1,
            "sampled {} of 50000 at rate 0.1",
            observed
        );
    }

    #[test]
    fn test_adjusted_mode_books_difference_into_bucket_one() {
        let sampling = ShardsFixedRateConfig {
            sampling_rate: 0.5,
            adjusted: true,
        };
        let cfg = config();
        let mut shards = ShardsFixedRateMrc::new(&cfg, &sampling, false).unwrap();
        // A handful of distinct keys: few or none sampled, all misses.
        for key in 0..10u64 {
            shards.add_request(&Request::get_no_ttl(0, scramble_key(key), 4096));
        }
        let curve = shards.mrc_fixed();
        // The correction fills bucket 1 with (expected - observed) misses
        // counted as hits at the smallest size, so the curve drops there.
        let expected = shards.expected_sampled() as f64;
        let observed = shards.sampled_requests() as f64;
        if expected > observed {
            let at_one_bucket = curve.miss_ratio_at(cfg.bucket_width_bytes);
            assert!(at_one_bucket < 1.0);
        }
    }

    #[test]
    fn test_ttl_eviction_applies_to_sampled_keys() {
        let sampling = ShardsFixedRateConfig {
            sampling_rate: 1.0,
            adjusted: false,
        };
        let mut shards = ShardsFixedRateMrc::new(&config(), &sampling, true).unwrap();
        let key = scramble_key(1);
        shards.add_request(&Request::get(0, key, 4096, 5));
        shards.add_request(&Request::get(10, key, 4096, 15));
        // Expired before the second access: no hit credited anywhere.
        assert!(shards.hist_fixed.buckets().iter().all(|&c| c == 0.0));
    }
}
