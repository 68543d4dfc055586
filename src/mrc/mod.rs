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

//! Miss-ratio curve generation.
//!
//! Four generators share one capability surface: feed requests in trace
//! order, then ask for the curve under fixed-block or running-mean block
//! accounting.
//!
//! | generator | method | error |
//! |---|---|---|
//! | [`OlkenMrc`] | exact stack distances | none |
//! | [`ShardsFixedRateMrc`] | spatial sampling at a constant rate | sampling noise |
//! | [`ShardsFixedSizeMrc`] | bounded sample, adaptive rate | sampling noise |
//! | [`CounterStacksMrc`] | HLL count matrix over epochs | sketch + epoch noise |
//!
//! [`MrcAlgorithm`] is the sum type over the four, dispatching the shared
//! [`MrcGenerator`] capability set without trait objects.

pub mod curve;
pub mod histogram;

mod counterstacks;
mod olken;
mod shards;
mod shards_fixed_size;
mod stack;

pub use self::counterstacks::CounterStacksMrc;
pub use self::curve::MrcCurve;
pub use self::curve::MrcPoint;
pub use self::olken::OlkenMrc;
pub use self::shards::SAMPLING_MODULUS;
pub use self::shards::ShardsFixedRateMrc;
pub use self::shards_fixed_size::ShardsFixedSizeMrc;

use crate::error::Error;
use crate::trace::Request;

/// The capability set every MRC generator exposes.
///
/// `add_request` is fallible only for generators with a hard capacity
/// failure mode (CounterStacks); the others never err.
pub trait MrcGenerator {
    /// Observe one request in trace order.
    fn add_request(&mut self, request: &Request) -> Result<(), Error>;

    /// Observe a batch of requests in trace order.
    fn add_requests(&mut self, requests: &[Request]) -> Result<(), Error> {
        for request in requests {
            self.add_request(request)?;
        }
        Ok(())
    }

    /// The curve under fixed-block accounting.
    fn mrc_fixed(&self) -> MrcCurve;

    /// The curve under running-mean block accounting.
    fn mrc_running_avg(&self) -> MrcCurve;
}

impl MrcGenerator for OlkenMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        OlkenMrc::add_request(self, request);
        Ok(())
    }

    fn mrc_fixed(&self) -> MrcCurve {
        OlkenMrc::mrc_fixed(self)
    }

    fn mrc_running_avg(&self) -> MrcCurve {
        OlkenMrc::mrc_running_avg(self)
    }
}

impl MrcGenerator for ShardsFixedRateMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        ShardsFixedRateMrc::add_request(self, request);
        Ok(())
    }

    fn mrc_fixed(&self) -> MrcCurve {
        ShardsFixedRateMrc::mrc_fixed(self)
    }

    fn mrc_running_avg(&self) -> MrcCurve {
        ShardsFixedRateMrc::mrc_running_avg(self)
    }
}

impl MrcGenerator for ShardsFixedSizeMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        ShardsFixedSizeMrc::add_request(self, request);
        Ok(())
    }

    fn mrc_fixed(&self) -> MrcCurve {
        ShardsFixedSizeMrc::mrc_fixed(self)
    }

    fn mrc_running_avg(&self) -> MrcCurve {
        ShardsFixedSizeMrc::mrc_running_avg(self)
    }
}

impl MrcGenerator for CounterStacksMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        CounterStacksMrc::add_request(self, request)
    }

    fn mrc_fixed(&self) -> MrcCurve {
        CounterStacksMrc::mrc_fixed(self)
    }

    fn mrc_running_avg(&self) -> MrcCurve {
        CounterStacksMrc::mrc_running_avg(self)
    }
}

/// Sum type over the four MRC generators.
///
/// Holding estimators as enum variants keeps collections homogeneous
/// (`Vec<MrcAlgorithm>`) with static dispatch.
#[derive(Debug)]
pub enum MrcAlgorithm {
    /// Exact stack distances.
    Olken(OlkenMrc),
    /// Fixed-rate spatial sampling.
    ShardsFixedRate(ShardsFixedRateMrc),
    /// Bounded-sample spatial sampling.
    ShardsFixedSize(ShardsFixedSizeMrc),
    /// Approximate count matrix over a counter bank.
    CounterStacks(CounterStacksMrc),
}

impl MrcGenerator for MrcAlgorithm {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        match self {
            MrcAlgorithm::Olken(inner) => MrcGenerator::add_request(inner, request),
            MrcAlgorithm::ShardsFixedRate(inner) => MrcGenerator::add_request(inner, request),
            MrcAlgorithm::ShardsFixedSize(inner) => MrcGenerator::add_request(inner, request),
            MrcAlgorithm::CounterStacks(inner) => MrcGenerator::add_request(inner, request),
        }
    }

    fn mrc_fixed(&self) -> MrcCurve {
        match self {
            MrcAlgorithm::Olken(inner) => inner.mrc_fixed(),
            MrcAlgorithm::ShardsFixedRate(inner) => inner.mrc_fixed(),
            MrcAlgorithm::ShardsFixedSize(inner) => inner.mrc_fixed(),
            MrcAlgorithm::CounterStacks(inner) => inner.mrc_fixed(),
        }
    }

    fn mrc_running_avg(&self) -> MrcCurve {
        match self {
            MrcAlgorithm::Olken(inner) => inner.mrc_running_avg(),
            MrcAlgorithm::ShardsFixedRate(inner) => inner.mrc_running_avg(),
            MrcAlgorithm::ShardsFixedSize(inner) => inner.mrc_running_avg(),
            MrcAlgorithm::CounterStacks(inner) => inner.mrc_running_avg(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardsFixedRateConfig;
    use crate::config::SizingConfig;

    #[test]
    fn test_enum_dispatch() {
        let config = SizingConfig::default();
        let sampling = ShardsFixedRateConfig {
            sampling_rate: 1.0,
            adjusted: false,
        };
        let mut algorithms = vec![
            MrcAlgorithm::Olken(OlkenMrc::new(&config, false).unwrap()),
            MrcAlgorithm::ShardsFixedRate(
                ShardsFixedRateMrc::new(&config, &sampling, false).unwrap(),
            ),
        ];
        let requests = [
            Request::get_no_ttl(0, 1, 4096),
            Request::get_no_ttl(1, 2, 4096),
            Request::get_no_ttl(2, 1, 4096),
        ];
        for algorithm in algorithms.iter_mut() {
            algorithm.add_requests(&requests).unwrap();
        }
        // Rate 1.0 sampling is exact: both curves agree.
        assert_eq!(algorithms[0].mrc_fixed(), algorithms[1].mrc_fixed());
    }
}
