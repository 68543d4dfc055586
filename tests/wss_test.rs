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

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

fn config() -> SizingConfig {
    SizingConfig {
        min_block: 2,
        max_block: 1 << 20,
        ..SizingConfig::default()
    }
}

#[test]
fn test_variable_block_exact_geometric_sum() {
    // One object per power of two from 4 B to 1 MiB with infinite TTL:
    // the variable-block WSS is the exact sum of the sizes.
    let cfg = config();
    let mut wss = WssEstimator::new(&cfg, WssMode::VariableBlock, true).unwrap();

    let mut expected = 0u64;
    for (i, exp) in (2..=20u32).enumerate() {
        let block = 1u32 << exp;
        wss.add(&Request::get_no_ttl(0, scramble_key(i as u64), block));
        expected += block as u64;
    }
    // One entry per class sits deep in linear-counting territory, where
    // the estimate deviates from 1 by under 0.1%.
    let wss_bytes = wss.wss_at(1_000_000);
    let error = (wss_bytes - expected as f64).abs() / expected as f64;
    assert!(error < 0.01, "relative error {:.5} too large", error);
}

#[test]
fn test_ttl_wss_decays_to_zero() {
    let cfg = config();
    let mut wss = WssEstimator::new(&cfg, WssMode::FixedBlock, true).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    for key in 0..10_000u64 {
        let expiry = rng.gen_range(100..2_000u32);
        wss.add(&Request::get(0, scramble_key(key), 4096, expiry));
    }

    let mut last = f64::INFINITY;
    for now in (0..2_100u32).step_by(100) {
        let bytes = wss.wss_at(now);
        assert!(bytes <= last, "WSS grew from {} to {}", last, bytes);
        last = bytes;
    }
    assert_eq!(wss.wss_at(2_100), 0.0);
}

#[test]
fn test_sketched_tracks_exact_within_error() {
    let cfg = config();
    let mut sketched = WssEstimator::new(&cfg, WssMode::FixedBlock, true).unwrap();
    let mut exact = ExactWss::new(&cfg);

    let mut rng = StdRng::seed_from_u64(21);
    for i in 0..50_000u64 {
        let key = scramble_key(rng.gen_range(0..30_000u64));
        let expiry = 500 + (i % 1_000) as u32;
        let request = Request::get(0, key, 4096, expiry);
        sketched.add(&request);
        exact.add(&request);
    }

    exact.evict(800);
    let exact_bytes = exact.cardinality() as f64 * cfg.fixed_block_bytes as f64;
    let sketched_bytes = sketched.wss_at(800);
    let error = (sketched_bytes - exact_bytes).abs() / exact_bytes;
    assert!(error < 0.05, "relative error {:.4} too large", error);
}

#[test]
fn test_running_average_summary() {
    let cfg = config();
    let mut wss = WssEstimator::new(&cfg, WssMode::RunningAverage, false).unwrap();
    let mut exact = ExactWss::new(&cfg);

    // Sizes 100 and 300 across two distinct objects.
    for (key, size) in [(1u64, 100u32), (2, 300), (1, 100)] {
        let request = Request::get_no_ttl(0, scramble_key(key), size);
        wss.add(&request);
        exact.add(&request);
    }

    let expected_mean = (100.0 + 300.0 + 100.0) / 3.0;
    assert_eq!(wss.mean_block(), expected_mean);
    assert_eq!(exact.cardinality(), 2);
    assert_eq!(exact.total_bytes(), 400);
    assert!((exact.mean_product() - 2.0 * expected_mean).abs() < 1e-9);
    assert!((wss.wss() - 2.0 * expected_mean).abs() < expected_mean * 0.01);
}

#[test]
fn test_exact_wss_capacity_silent_drop() {
    let cfg = SizingConfig {
        max_distinct_objects: 100,
        ..config()
    };
    let mut exact = ExactWss::new(&cfg);
    for key in 0..500u64 {
        exact.add(&Request::get_no_ttl(0, scramble_key(key), 256));
    }
    assert_eq!(exact.cardinality(), 100);
    assert_eq!(exact.dropped(), 400);
    assert_eq!(exact.total_bytes(), 100 * 256);
}
