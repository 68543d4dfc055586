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

//! Working-set size estimation.
//!
//! The sketched estimator keeps a geometric bank of HyperLogLogs, one per
//! power-of-two block-size class; an object of (clamped) size `s` lands in
//! the class of `next_pow2(s)` and is billed that many bytes. Three
//! accounting modes exist:
//!
//! - **fixed-block**: one sketch, WSS = `count * fixed_block_bytes`;
//! - **variable-block**: the full bank, WSS = sum over classes of
//!   `count_i * 2^(i+1)`;
//! - **running-average**: one sketch plus an online mean block size,
//!   WSS = `count * mean`.
//!
//! TTL-aware banks use [`HllTtl`] and answer "WSS of the objects still
//! live at `t`"; plain banks use [`HllSketch`].
//!
//! [`ExactWss`] is the sketch-free oracle with the same surface, bounded
//! by `max_distinct_objects`.

mod exact;

pub use self::exact::ExactWss;

use crate::config::SizingConfig;
use crate::error::Error;
use crate::hll::HllSketch;
use crate::hll::HllTtl;
use crate::trace::Request;

/// Accounting mode for the sketched WSS estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WssMode {
    /// Every object is billed `fixed_block_bytes`.
    FixedBlock,
    /// One sketch per power-of-two size class; objects billed their class.
    VariableBlock,
    /// Every object is billed the online mean block size.
    RunningAverage,
}

#[derive(Debug, Clone)]
enum BankSketch {
    Plain(HllSketch),
    Ttl(HllTtl),
}

impl BankSketch {
    fn new(ttl_aware: bool, precision: u8, block_size: u32) -> Self {
        if ttl_aware {
            BankSketch::Ttl(HllTtl::new(precision, block_size))
        } else {
            BankSketch::Plain(HllSketch::new(precision, block_size))
        }
    }

    fn add(&mut self, hash: u64, expiry: u32) {
        match self {
            BankSketch::Plain(sketch) => sketch.add(hash),
            BankSketch::Ttl(sketch) => sketch.add(hash, expiry),
        }
    }

    fn count(&self) -> f64 {
        match self {
            BankSketch::Plain(sketch) => sketch.count(),
            BankSketch::Ttl(sketch) => sketch.count(),
        }
    }

    fn count_at(&mut self, now: u32) -> f64 {
        match self {
            BankSketch::Plain(sketch) => sketch.count(),
            BankSketch::Ttl(sketch) => sketch.count_at(now),
        }
    }
}

/// Power-of-two size class of a block: class `i` covers
/// `next_pow2(block) = 2^(i+1)` and is billed `2^(i+1)` bytes.
///
/// Blocks below two bytes share class 0 with two-byte blocks.
#[inline]
fn block_class(block: u32) -> usize {
    let np2 = block.max(2).next_power_of_two();
    np2.trailing_zeros() as usize - 1
}

/// Bytes billed by size class `i`.
#[inline]
fn class_bytes(class: usize) -> u64 {
    1u64 << (class + 1)
}

/// Sketched working-set size estimator.
///
/// # Examples
///
/// ```
/// # use cachesketch::config::SizingConfig;
/// # use cachesketch::trace::Request;
/// # use cachesketch::wss::WssEstimator;
/// # use cachesketch::wss::WssMode;
/// # use cachesketch::hash::scramble_key;
/// let config = SizingConfig::default();
/// let mut wss = WssEstimator::new(&config, WssMode::FixedBlock, true).unwrap();
/// wss.add(&Request::get(0, scramble_key(1), 100, 300));
/// let bytes = wss.wss_at(0);
/// assert!(bytes >= config.fixed_block_bytes as f64);
/// ```
#[derive(Debug, Clone)]
pub struct WssEstimator {
    config: SizingConfig,
    mode: WssMode,
    /// One sketch in fixed/running-average modes; the class bank otherwise.
    bank: Vec<BankSketch>,
    /// Class index of `bank[0]` in variable-block mode.
    min_class: usize,
    mean_block: f64,
    observed: u64,
}

impl WssEstimator {
    /// Create an estimator. `ttl_aware` selects the sketch type for the
    /// whole bank.
    pub fn new(config: &SizingConfig, mode: WssMode, ttl_aware: bool) -> Result<Self, Error> {
        config.validate()?;
        let (bank, min_class) = match mode {
            WssMode::FixedBlock | WssMode::RunningAverage => (
                vec![BankSketch::new(
                    ttl_aware,
                    config.precision,
                    config.fixed_block_bytes,
                )],
                0,
            ),
            WssMode::VariableBlock => {
                let lo = block_class(config.min_block);
                let hi = block_class(config.max_block);
                let bank = (lo..=hi)
                    .map(|class| {
                        BankSketch::new(ttl_aware, config.precision, class_bytes(class) as u32)
                    })
                    .collect();
                (bank, lo)
            }
        };
        Ok(Self {
            config: *config,
            mode,
            bank,
            min_class,
            mean_block: 0.0,
            observed: 0,
        })
    }

    /// Number of size classes in the bank.
    pub fn bank_len(&self) -> usize {
        self.bank.len()
    }

    /// Observe one request.
    pub fn add(&mut self, request: &Request) {
        if !request.is_analyzed() {
            return;
        }
        let block = self.config.clamp_block(request.value_size);

        self.observed += 1;
        self.mean_block += (block as f64 - self.mean_block) / self.observed as f64;

        let slot = match self.mode {
            WssMode::FixedBlock | WssMode::RunningAverage => 0,
            WssMode::VariableBlock => block_class(block) - self.min_class,
        };
        self.bank[slot].add(request.key_hash, request.eviction_time);
    }

    /// Observe a batch of requests.
    pub fn add_requests(&mut self, requests: &[Request]) {
        for request in requests {
            self.add(request);
        }
    }

    /// Estimated working-set bytes, ignoring TTLs accrued since the last
    /// eviction.
    pub fn wss(&self) -> f64 {
        match self.mode {
            WssMode::FixedBlock => self.bank[0].count() * self.config.fixed_block_bytes as f64,
            WssMode::RunningAverage => self.bank[0].count() * self.mean_block,
            WssMode::VariableBlock => self
                .bank
                .iter()
                .enumerate()
                .map(|(i, sketch)| sketch.count() * class_bytes(i + self.min_class) as f64)
                .sum(),
        }
    }

    /// Estimated working-set bytes of the objects still live at `now`.
    ///
    /// On a TTL-aware bank this evicts before counting; plain banks ignore
    /// `now`.
    pub fn wss_at(&mut self, now: u32) -> f64 {
        match self.mode {
            WssMode::FixedBlock => {
                self.bank[0].count_at(now) * self.config.fixed_block_bytes as f64
            }
            WssMode::RunningAverage => self.bank[0].count_at(now) * self.mean_block,
            WssMode::VariableBlock => {
                let min_class = self.min_class;
                self.bank
                    .iter_mut()
                    .enumerate()
                    .map(|(i, sketch)| sketch.count_at(now) * class_bytes(i + min_class) as f64)
                    .sum()
            }
        }
    }

    /// The online mean block size over every request observed.
    pub fn mean_block(&self) -> f64 {
        self.mean_block
    }
}
