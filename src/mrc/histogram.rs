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

//! Stack-distance histograms.
//!
//! A hit at reuse distance `d` with block size `s` is credited to bucket
//! `ceil(d * s / bucket_width)`. A distance that lands past the last
//! bucket folds into bucket 0. Folding the overflow into bucket 0 is a
//! deliberate, known-lossy policy of this histogram family: it surfaces
//! as a small spike at the head of the reported MRC and MUST be kept for
//! result compatibility with existing curves.
//!
//! [`ThresholdHistogram`] is the SHARDS fixed-size variant: each bucket
//! remembers the sampling threshold at its last update so that counts can
//! be retroactively rescaled when the threshold shrinks.

/// Plain stack-distance histogram with fractional counts.
///
/// Counts are `f64`: sampled estimators credit scaled weights, and
/// CounterStacks can credit small negative corrections.
#[derive(Debug, Clone)]
pub struct StackDistanceHistogram {
    buckets: Vec<f64>,
    bucket_width: u64,
}

impl StackDistanceHistogram {
    /// Create a histogram of `bucket_count` buckets of `bucket_width`
    /// bytes each.
    pub fn new(bucket_count: usize, bucket_width: u64) -> Self {
        assert!(bucket_count > 0, "histogram needs at least bucket 0");
        assert!(bucket_width > 0, "bucket width must be non-zero");
        Self {
            buckets: vec![0.0; bucket_count],
            bucket_width,
        }
    }

    /// Bucket width in bytes.
    pub fn bucket_width(&self) -> u64 {
        self.bucket_width
    }

    /// The raw bucket counts.
    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    /// Bucket index for a byte-weighted distance; out-of-range folds to 0.
    #[inline]
    fn index_for(&self, weighted_bytes: u64) -> usize {
        let index = (weighted_bytes.div_ceil(self.bucket_width)) as usize;
        if index < self.buckets.len() {
            index
        } else {
            0
        }
    }

    /// Credit `count` hits at an exact byte-weighted distance.
    pub fn record_bytes(&mut self, weighted_bytes: u64, count: f64) {
        let index = self.index_for(weighted_bytes);
        self.buckets[index] += count;
    }

    /// Credit `count` hits at a fractional byte-weighted distance, as
    /// produced by sampled and sketched estimators.
    pub fn record_scaled(&mut self, weighted_bytes: f64, count: f64) {
        let index = if weighted_bytes <= 0.0 {
            0
        } else {
            let i = (weighted_bytes / self.bucket_width as f64).ceil() as u64;
            if (i as usize) < self.buckets.len() {
                i as usize
            } else {
                0
            }
        };
        self.buckets[index] += count;
    }

    /// Add directly into a bucket; used by the adjusted SHARDS correction.
    pub fn add_to_bucket(&mut self, index: usize, count: f64) {
        self.buckets[index] += count;
    }
}

/// A histogram whose cells carry the sampling threshold at their last
/// update, enabling retroactive rescaling as the threshold shrinks.
#[derive(Debug, Clone)]
pub struct ThresholdHistogram {
    cells: Vec<Cell>,
    bucket_width: u64,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    count: f64,
    /// Threshold in force when `count` was last touched; 0 = never touched.
    threshold: u32,
}

impl ThresholdHistogram {
    /// Create a histogram of `bucket_count` cells of `bucket_width` bytes.
    pub fn new(bucket_count: usize, bucket_width: u64) -> Self {
        assert!(bucket_count > 0, "histogram needs at least bucket 0");
        assert!(bucket_width > 0, "bucket width must be non-zero");
        Self {
            cells: vec![
                Cell {
                    count: 0.0,
                    threshold: 0,
                };
                bucket_count
            ],
            bucket_width,
        }
    }

    /// Credit one hit at a fractional byte-weighted distance under the
    /// current threshold, rescaling the cell's past credit first.
    pub fn record(&mut self, weighted_bytes: f64, threshold: u32) {
        let index = if weighted_bytes <= 0.0 {
            0
        } else {
            let i = (weighted_bytes / self.bucket_width as f64).ceil() as u64;
            if (i as usize) < self.cells.len() {
                i as usize
            } else {
                0
            }
        };
        let cell = &mut self.cells[index];
        rescale(cell, threshold);
        cell.count += 1.0;
    }

    /// Flatten into plain counts, rescaling every cell to `threshold`.
    pub fn finalize(&self, threshold: u32) -> StackDistanceHistogram {
        let mut out = StackDistanceHistogram::new(self.cells.len(), self.bucket_width);
        for (index, cell) in self.cells.iter().enumerate() {
            if cell.threshold == 0 {
                continue;
            }
            let scale = threshold as f64 / cell.threshold as f64;
            out.add_to_bucket(index, cell.count * scale);
        }
        out
    }
}

/// Scale a cell's count from its recorded threshold to `threshold`.
///
/// Counts credited under a looser (larger) threshold represent fewer real
/// hits per sample once the threshold tightens, hence the `new / old`
/// factor.
fn rescale(cell: &mut Cell, threshold: u32) {
    if cell.threshold == 0 {
        cell.threshold = threshold;
        return;
    }
    if cell.threshold != threshold {
        cell.count *= threshold as f64 / cell.threshold as f64;
        cell.threshold = threshold;
    }
}

/// A standalone threshold-scaled scalar; the fixed-size sampler uses one
/// for its request total.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdCounter {
    count: f64,
    threshold: u32,
}

impl ThresholdCounter {
    /// A zero counter.
    pub fn new() -> Self {
        Self {
            count: 0.0,
            threshold: 0,
        }
    }

    /// Add one under the current threshold.
    pub fn increment(&mut self, threshold: u32) {
        let mut cell = Cell {
            count: self.count,
            threshold: self.threshold,
        };
        rescale(&mut cell, threshold);
        self.count = cell.count + 1.0;
        self.threshold = cell.threshold;
    }

    /// The count rescaled to `threshold`.
    pub fn value_at(&self, threshold: u32) -> f64 {
        if self.threshold == 0 {
            return 0.0;
        }
        self.count * threshold as f64 / self.threshold as f64
    }
}

impl Default for ThresholdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_indexing() {
        let mut hist = StackDistanceHistogram::new(8, 100);
        hist.record_bytes(1, 1.0); // ceil(1/100) = 1
        hist.record_bytes(100, 1.0); // exactly one bucket width
        hist.record_bytes(101, 1.0); // spills into bucket 2
        hist.record_bytes(700, 1.0); // last valid index
        assert_eq!(hist.buckets()[1], 2.0);
        assert_eq!(hist.buckets()[2], 1.0);
        assert_eq!(hist.buckets()[7], 1.0);
    }

    #[test]
    fn test_out_of_range_folds_to_bucket_zero() {
        let mut hist = StackDistanceHistogram::new(4, 100);
        hist.record_bytes(401, 1.0);
        hist.record_scaled(1e12, 2.5);
        assert_eq!(hist.buckets()[0], 3.5);
    }

    #[test]
    fn test_threshold_rescale_on_touch() {
        let mut hist = ThresholdHistogram::new(8, 100);
        hist.record(150.0, 1000); // bucket 2, count 1 @ 1000
        hist.record(150.0, 500); // rescale to 0.5, then +1 = 1.5 @ 500

        let flat = hist.finalize(500);
        assert!((flat.buckets()[2] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_finalize_rescales_untouched_cells() {
        let mut hist = ThresholdHistogram::new(8, 100);
        hist.record(50.0, 1000); // bucket 1, count 1 @ 1000
        let flat = hist.finalize(250);
        assert!((flat.buckets()[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_counter() {
        let mut total = ThresholdCounter::new();
        total.increment(1000);
        total.increment(1000);
        total.increment(500); // past 2 become 1, then +1 = 2 @ 500
        assert!((total.value_at(500) - 2.0).abs() < 1e-12);
        assert!((total.value_at(250) - 1.0).abs() < 1e-12);
    }
}
