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

use std::collections::HashMap;
use std::collections::HashSet;

use cachesketch::config::SizingConfig;
use cachesketch::mrc::OlkenMrc;
use cachesketch::trace::Request;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

fn small_config() -> SizingConfig {
    SizingConfig {
        max_cache_bytes: 4 << 20,
        bucket_width_bytes: 4096,
        fixed_block_bytes: 4096,
        ..SizingConfig::default()
    }
}

#[test]
fn test_cyclic_scan_scenario() {
    // A B C A B C A: four misses, then three hits at stack distance 3.
    let mut olken = OlkenMrc::new(&small_config(), false).unwrap();
    for (i, &key) in [1u64, 2, 3, 1, 2, 3, 1].iter().enumerate() {
        olken.add_request(&Request::get_no_ttl(i as u32, key, 4096));
    }

    assert_eq!(olken.total_requests(), 7);
    assert_eq!(olken.histogram().buckets()[3], 3.0);
    let hits: f64 = olken.histogram().buckets().iter().sum();
    assert_eq!(hits, 3.0, "exactly three hits; the other four are misses");

    // A cache of three blocks captures every reuse: miss ratio 1 - 3/7.
    let curve = olken.mrc_fixed();
    let expected = 1.0 - 3.0 / 7.0;
    assert!((curve.miss_ratio_at(3 * 4096) - expected).abs() < 1e-12);
    assert!((curve.miss_ratio_at(1 << 30) - expected).abs() < 1e-12);
    assert_eq!(curve.miss_ratio_at(2 * 4096), 1.0);
}

#[test]
fn test_ttl_expiry_forces_miss() {
    // (A, ts=0, expiry=5), (A, ts=10, expiry=15): the second access must
    // be a miss because A expired at t = 5.
    let mut olken = OlkenMrc::new(&small_config(), true).unwrap();
    olken.add_request(&Request::get(0, 0xa, 4096, 5));
    olken.add_request(&Request::get(10, 0xa, 4096, 15));

    assert!(
        olken.histogram().buckets().iter().all(|&c| c == 0.0),
        "no hit may be recorded"
    );
    assert_eq!(olken.mrc_fixed().points().len(), 1);
}

#[test]
fn test_ttl_refresh_keeps_object_alive() {
    let mut olken = OlkenMrc::new(&small_config(), true).unwrap();
    olken.add_request(&Request::get(0, 0xa, 4096, 8));
    olken.add_request(&Request::get(5, 0xa, 4096, 20)); // hit, refreshes
    olken.add_request(&Request::get(10, 0xa, 4096, 30)); // still live: hit

    let hits: f64 = olken.histogram().buckets().iter().sum();
    assert_eq!(hits, 2.0);
}

#[test]
fn test_brute_force_oracle_agreement() {
    // Property: the Olken hit distance equals the number of distinct keys
    // observed since that key's previous access, oracle-computed.
    let mut rng = StdRng::seed_from_u64(7);
    let mut olken = OlkenMrc::new(&small_config(), false).unwrap();

    let mut trace = Vec::new();
    let mut last_access: HashMap<u64, usize> = HashMap::new();
    let mut oracle: HashMap<u64, u64> = HashMap::new();

    for i in 0..3_000usize {
        let key = rng.gen_range(0..150u64);
        if let Some(&pos) = last_access.get(&key) {
            let distinct: HashSet<u64> = trace[pos..].iter().copied().collect();
            *oracle.entry(distinct.len() as u64).or_insert(0) += 1;
        }
        last_access.insert(key, i);
        trace.push(key);
        olken.add_request(&Request::get_no_ttl(i as u32, key, 4096));
    }

    // Bucket k holds exactly the hits at distance k (block == width).
    for (&distance, &count) in &oracle {
        assert_eq!(
            olken.histogram().buckets()[distance as usize],
            count as f64,
            "oracle disagreement at distance {}",
            distance
        );
    }
    let hits: f64 = olken.histogram().buckets().iter().sum();
    let oracle_hits: u64 = oracle.values().sum();
    assert_eq!(hits, oracle_hits as f64);
}

#[test]
fn test_capacity_cap_sheds_lru() {
    let config = SizingConfig {
        max_distinct_objects: 3,
        ..small_config()
    };
    let mut olken = OlkenMrc::new(&config, false).unwrap();
    for key in [1u64, 2, 3, 4] {
        olken.add_request(&Request::get_no_ttl(0, key, 4096));
    }
    assert_eq!(olken.live_keys(), 3);

    // Key 1 was shed as LRU: accessing it again is a miss.
    olken.add_request(&Request::get_no_ttl(1, 1, 4096));
    let hits: f64 = olken.histogram().buckets().iter().sum();
    assert_eq!(hits, 0.0);

    // Key 4 survived: a hit.
    olken.add_request(&Request::get_no_ttl(2, 4, 4096));
    let hits: f64 = olken.histogram().buckets().iter().sum();
    assert_eq!(hits, 1.0);
}

#[test]
fn test_out_of_range_distance_folds_into_bucket_zero() {
    // max_cache of 8 buckets: a reuse spanning more distinct keys than
    // the histogram covers lands in bucket 0, not in the tail.
    let config = SizingConfig {
        max_cache_bytes: 8 * 4096,
        bucket_width_bytes: 4096,
        fixed_block_bytes: 4096,
        ..SizingConfig::default()
    };
    let mut olken = OlkenMrc::new(&config, false).unwrap();
    olken.add_request(&Request::get_no_ttl(0, 999, 4096));
    for key in 0..20u64 {
        olken.add_request(&Request::get_no_ttl(1, key, 4096));
    }
    olken.add_request(&Request::get_no_ttl(2, 999, 4096)); // distance 21

    assert_eq!(olken.histogram().buckets()[0], 1.0);
}

#[test]
fn test_mrc_monotonicity_on_random_stream() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut olken = OlkenMrc::new(&small_config(), false).unwrap();
    for i in 0..5_000u32 {
        let key = rng.gen_range(0..400u64);
        olken.add_request(&Request::get_no_ttl(i, key, 4096));
    }

    for curve in [olken.mrc_fixed(), olken.mrc_running_avg()] {
        assert_eq!(curve.points()[0].bytes, 0);
        assert_eq!(curve.points()[0].miss_ratio, 1.0);
        let mut last = f64::INFINITY;
        for point in curve.points() {
            assert!(point.miss_ratio <= last, "miss ratio increased");
            assert!((0.0..=1.0).contains(&point.miss_ratio));
            last = point.miss_ratio;
        }
    }
}
