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

use cachesketch::config::ShardsFixedRateConfig;
use cachesketch::config::SizingConfig;
use cachesketch::hash::scramble_key;
use cachesketch::mrc::MrcAlgorithm;
use cachesketch::mrc::MrcGenerator;
use cachesketch::mrc::OlkenMrc;
use cachesketch::mrc::ShardsFixedRateMrc;
use cachesketch::trace::Request;

fn main() {
    let config = SizingConfig {
        max_cache_bytes: 256 << 20,
        bucket_width_bytes: 1 << 20,
        ..SizingConfig::default()
    };
    let sampling = ShardsFixedRateConfig {
        sampling_rate: 0.1,
        adjusted: true,
    };

    // Exact and sampled generators behind the same dispatch surface.
    let mut algorithms = vec![
        MrcAlgorithm::Olken(OlkenMrc::new(&config, false).unwrap()),
        MrcAlgorithm::ShardsFixedRate(ShardsFixedRateMrc::new(&config, &sampling, false).unwrap()),
    ];

    println!("Replaying a skewed 200,000-access stream...");
    let mut state = 0x243f6a8885a308d3u64;
    for i in 0..200_000u32 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let rank = 1 + (state >> 33) % 20_000;
        let key = scramble_key(20_000 / rank);
        let request = Request::get_no_ttl(i / 1_000, key, 4_096);
        for algorithm in algorithms.iter_mut() {
            algorithm.add_request(&request).unwrap();
        }
    }

    for (name, algorithm) in ["olken", "shards-0.1"].iter().zip(algorithms.iter()) {
        let curve = algorithm.mrc_fixed();
        println!("\n{name}: {} curve points", curve.points().len());
        print!("{}", curve.to_csv());
    }
}
