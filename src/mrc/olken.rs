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

//! Exact miss-ratio curves via per-access stack distances.
//!
//! Every request goes through the order-statistic tree, so the histogram
//! holds the exact reuse-distance distribution. Memory follows the number
//! of simultaneously live keys, bounded by `max_distinct_objects` with LRU
//! shedding past the cap.

use crate::config::SizingConfig;
use crate::error::Error;
use crate::mrc::curve::MrcCurve;
use crate::mrc::histogram::StackDistanceHistogram;
use crate::mrc::stack::Access;
use crate::mrc::stack::ReuseStack;
use crate::trace::Request;

/// Exact stack-distance MRC generator.
///
/// # Examples
///
/// ```
/// # use cachesketch::config::SizingConfig;
/// # use cachesketch::mrc::OlkenMrc;
/// # use cachesketch::trace::Request;
/// let config = SizingConfig::default();
/// let mut olken = OlkenMrc::new(&config, false).unwrap();
/// for &key in &[1u64, 2, 3, 1, 2, 3, 1] {
///     olken.add_request(&Request::get_no_ttl(0, key, 4096));
/// }
/// let curve = olken.mrc_fixed();
/// assert_eq!(curve.points()[0].miss_ratio, 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct OlkenMrc {
    config: SizingConfig,
    stack: ReuseStack,
    hist_fixed: StackDistanceHistogram,
    hist_running: StackDistanceHistogram,
    mean_block: f64,
    total_requests: u64,
}

impl OlkenMrc {
    /// Create a generator; `ttl_aware` enables expiry-driven eviction.
    pub fn new(config: &SizingConfig, ttl_aware: bool) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config: *config,
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
        })
    }

    /// Observe one request.
    pub fn add_request(&mut self, request: &Request) {
        if !request.is_analyzed() {
            return;
        }
        self.total_requests += 1;
        let block = self.config.clamp_block(request.value_size);
        self.mean_block += (block as f64 - self.mean_block) / self.total_requests as f64;

        let outcome = self
            .stack
            .access(request.key_hash, request.timestamp, request.eviction_time);
        if let Access::Hit { distance } = outcome {
            self.hist_fixed.record_bytes(
                distance * self.config.fixed_block_bytes as u64,
                1.0,
            );
            self.hist_running
                .record_scaled(distance as f64 * self.mean_block, 1.0);
        }
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) {
        for request in requests {
            self.add_request(request);
        }
    }

    /// MRC with every hit billed `fixed_block_bytes`.
    pub fn mrc_fixed(&self) -> MrcCurve {
        MrcCurve::from_histogram(&self.hist_fixed, self.total_requests as f64)
    }

    /// MRC with every hit billed the running mean block size at hit time.
    pub fn mrc_running_avg(&self) -> MrcCurve {
        MrcCurve::from_histogram(&self.hist_running, self.total_requests as f64)
    }

    /// The fixed-block stack-distance histogram.
    pub fn histogram(&self) -> &StackDistanceHistogram {
        &self.hist_fixed
    }

    /// Total analyzed requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Number of currently live tracked keys.
    pub fn live_keys(&self) -> usize {
        self.stack.live_keys()
    }
}
