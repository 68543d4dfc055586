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

use cachesketch::config::SizingConfig;
use cachesketch::hash::scramble_key;
use cachesketch::trace::Request;
use cachesketch::wss::ExactWss;
use cachesketch::wss::WssEstimator;
use cachesketch::wss::WssMode;

fn main() {
    let config = SizingConfig::default();

    // TTL-aware sketched estimator next to the exact oracle.
    let mut sketched = WssEstimator::new(&config, WssMode::FixedBlock, true).unwrap();
    let mut exact = ExactWss::new(&config);

    println!("Feeding 100,000 accesses over 40,000 objects with mixed TTLs...");
    for i in 0..100_000u64 {
        let key = scramble_key(i % 40_000);
        // Half the objects expire at t = 600, half at t = 1800.
        let expiry = if i % 2 == 0 { 600 } else { 1_800 };
        let request = Request::get(0, key, 4_096, expiry);
        sketched.add(&request);
        exact.add(&request);
    }

    for now in [0u32, 600, 1_800] {
        exact.evict(now);
        let exact_bytes = exact.cardinality() * config.fixed_block_bytes as u64;
        let sketched_bytes = sketched.wss_at(now);
        println!(
            "t = {:5}: exact WSS = {:>12} B, sketched WSS = {:>14.0} B",
            now, exact_bytes, sketched_bytes
        );
    }
}
