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

use cachesketch::error::ErrorKind;
use cachesketch::hash::scramble_key;
use cachesketch::hll::serialization::PLAIN_HEADER_SIZE;
use cachesketch::hll::serialization::TTL_HEADER_SIZE;
use cachesketch::hll::HllSketch;
use cachesketch::hll::HllTtl;

use googletest::assert_that;
use googletest::prelude::eq;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

fn populated_ttl(precision: u8, entries: u64, seed: u64) -> HllTtl {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sketch = HllTtl::new(precision, 4096);
    for key in 0..entries {
        sketch.add(scramble_key(key ^ seed), rng.gen_range(100..10_000u32));
    }
    sketch
}

#[test]
fn test_ttl_static_round_trip_counts_agree_at_every_time() {
    let sketch = populated_ttl(8, 40_000, 1); // dense
    assert!(!sketch.is_sparse());

    let bytes = sketch.serialize(true);
    let restored = HllTtl::deserialize(&bytes).unwrap();
    assert_that!(restored.precision(), eq(sketch.precision()));
    assert_that!(restored.block_size(), eq(sketch.block_size()));

    for now in (0..11_000u32).step_by(500) {
        let expected = sketch.clone().count_at(now);
        let actual = restored.clone().count_at(now);
        assert_that!(actual, eq(expected));
    }
}

#[test]
fn test_ttl_dynamic_round_trip_matches_static() {
    let sketch = populated_ttl(8, 40_000, 2);

    let from_static = HllTtl::deserialize(&sketch.serialize(true)).unwrap();
    let from_dynamic = HllTtl::deserialize(&sketch.serialize(false)).unwrap();

    for now in (0..11_000u32).step_by(750) {
        let s = from_static.clone().count_at(now);
        let d = from_dynamic.clone().count_at(now);
        assert_that!(d, eq(s));
    }
}

#[test]
fn test_ttl_sparse_round_trip() {
    let sketch = populated_ttl(12, 200, 3); // well below sparse capacity
    assert!(sketch.is_sparse());

    let restored = HllTtl::deserialize(&sketch.serialize(true)).unwrap();
    assert!(restored.is_sparse());
    for now in (0..11_000u32).step_by(1000) {
        assert_that!(
            restored.clone().count_at(now),
            eq(sketch.clone().count_at(now))
        );
    }
}

#[test]
fn test_dynamic_form_is_smaller_on_sparse_matrices() {
    // A dense sketch whose registers are mostly empty: the run-length
    // dynamic form must undercut the full matrix.
    let mut sketch = HllTtl::new(12, 0);
    for key in 0..80_000u64 {
        sketch.add(scramble_key(key), 5_000);
    }
    assert!(!sketch.is_sparse());

    let static_len = sketch.serialize(true).len();
    let dynamic_len = sketch.serialize(false).len();
    assert!(
        dynamic_len < static_len,
        "dynamic {} >= static {}",
        dynamic_len,
        static_len
    );
}

#[test]
fn test_ttl_header_layout() {
    let sketch = populated_ttl(12, 50, 4);
    let bytes = sketch.serialize(true);

    // Length prefix covers header + body.
    let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
    assert_that!(bytes.len(), eq(4 + len));
    assert!(len >= TTL_HEADER_SIZE);

    // Header: block_size, precision, is_sparse, is_static.
    let block_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    assert_that!(block_size, eq(4096));
    assert_that!(bytes[8], eq(12u8));
    assert_that!(bytes[9], eq(1u8)); // sparse
    assert_that!(bytes[10], eq(1u8)); // static flag recorded as requested
}

#[test]
fn test_plain_hll_round_trip() {
    let mut sketch = HllSketch::new(10, 4096);
    for key in 0..50_000u64 {
        sketch.add(scramble_key(key));
    }
    assert!(!sketch.is_sparse());

    let bytes = sketch.serialize();
    let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
    assert_that!(bytes.len(), eq(4 + len));
    assert!(len >= PLAIN_HEADER_SIZE);

    let restored = HllSketch::deserialize(&bytes).unwrap();
    assert_that!(restored.count(), eq(sketch.count()));
    assert_that!(restored.block_size(), eq(4096));
    // The 32-bit insertion counter survives the trip.
    assert_that!(restored.total_insertions(), eq(50_000u64));
}

#[test]
fn test_plain_hll_sparse_round_trip_is_exact() {
    let mut sketch = HllSketch::new(12, 0);
    for key in 0..100u64 {
        sketch.add(scramble_key(key));
    }
    let restored = HllSketch::deserialize(&sketch.serialize()).unwrap();
    assert_that!(restored, eq(&sketch));
}

#[test]
fn test_deserialize_rejects_corruption() {
    let sketch = populated_ttl(8, 40_000, 5);
    let bytes = sketch.serialize(true);

    // Truncation.
    let err = HllTtl::deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::InvalidData));

    // Length prefix mismatch.
    let mut longer = bytes.clone();
    longer.push(0);
    assert!(HllTtl::deserialize(&longer).is_err());

    // Precision out of range.
    let mut bad = bytes.clone();
    bad[8] = 2;
    assert!(HllTtl::deserialize(&bad).is_err());

    // Empty input.
    assert!(HllTtl::deserialize(&[]).is_err());
    assert!(HllSketch::deserialize(&[0, 1]).is_err());
}
