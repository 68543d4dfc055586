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

//! Miss-ratio curve construction.
//!
//! A curve is built from a stack-distance histogram and the request total:
//! scanning buckets in order, the cumulative hit count at bucket `i` gives
//! the hit ratio of a cache of `i * bucket_width` bytes, and the curve
//! emits a point whenever that cumulative strictly increases. The first
//! point is always `(0, 1.000000)`.

use std::io;
use std::io::Write;

use crate::mrc::histogram::StackDistanceHistogram;

/// One `(cache size, miss ratio)` sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MrcPoint {
    /// Cache size in bytes.
    pub bytes: u64,
    /// Estimated miss ratio at that size, in `[0, 1]`.
    pub miss_ratio: f64,
}

/// A miss-ratio curve: a non-increasing step function over cache sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcCurve {
    points: Vec<MrcPoint>,
}

impl MrcCurve {
    /// Build a curve from a histogram and the total request count.
    ///
    /// `total_requests` is the denominator: the exact generators pass the
    /// full request count, sampled generators their (adjusted) sampled
    /// totals. A zero denominator yields the trivial all-miss curve.
    pub fn from_histogram(histogram: &StackDistanceHistogram, total_requests: f64) -> Self {
        let mut points = vec![MrcPoint {
            bytes: 0,
            miss_ratio: 1.0,
        }];
        if total_requests <= 0.0 {
            return Self { points };
        }

        let buckets = histogram.buckets();
        let last_nonzero = match buckets.iter().rposition(|&c| c != 0.0) {
            Some(i) => i,
            None => return Self { points },
        };

        let mut total = 0.0;
        for (i, &count) in buckets.iter().enumerate().take(last_nonzero + 1) {
            let before = total;
            total += count;
            if total > before {
                let miss_ratio = (1.0 - total / total_requests).clamp(0.0, 1.0);
                points.push(MrcPoint {
                    bytes: i as u64 * histogram.bucket_width(),
                    miss_ratio,
                });
            }
        }
        Self { points }
    }

    /// The emitted points in cache-size order.
    pub fn points(&self) -> &[MrcPoint] {
        &self.points
    }

    /// Step-function lookup: the miss ratio of the largest emitted size
    /// not exceeding `bytes`.
    pub fn miss_ratio_at(&self, bytes: u64) -> f64 {
        let mut ratio = 1.0;
        for point in &self.points {
            if point.bytes > bytes {
                break;
            }
            ratio = point.miss_ratio;
        }
        ratio
    }

    /// Render as CSV: one `size_bytes,miss_ratio` pair per line, six
    /// decimals, newline-terminated, no trailing whitespace.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for point in &self.points {
            out.push_str(&format!("{},{:.6}\n", point.bytes, point.miss_ratio));
        }
        out
    }

    /// Write the CSV rendering to `writer`.
    pub fn write_csv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.to_csv().as_bytes())
    }
}
