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

//! Register-vector cardinality estimator shared by both sketch types.
//!
//! The input is a vector of register maxima (0 = register never hit).
//! Estimation follows the bias-corrected scheme: the harmonic-mean raw
//! estimate with the `alpha(m)` correction factor, replaced by linear
//! counting while the trace is small enough that empty registers carry
//! more information than occupied ones.

/// Estimate cardinality from a register vector of length `m = 2^precision`.
pub(crate) fn estimate_from_registers(registers: &[u8], precision: u8) -> f64 {
    let m = registers.len();
    debug_assert_eq!(m, 1usize << precision);

    let mut inv_sum = 0.0;
    let mut zeros = 0usize;
    for &r in registers {
        inv_sum += inv_pow2(r);
        if r == 0 {
            zeros += 1;
        }
    }

    // Linear counting while empty registers remain informative.
    if zeros != 0 {
        let m_f = m as f64;
        let lin = m_f * (m_f / zeros as f64).ln();
        if lin <= linear_counting_threshold(precision) {
            return lin;
        }
    }

    alpha(m) * (m as f64) * (m as f64) / inv_sum
}

/// Bias-correction factor for the raw harmonic-mean estimate.
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

/// Compute 1 / 2^value (inverse power of 2)
#[inline]
fn inv_pow2(value: u8) -> f64 {
    if value == 0 {
        1.0
    } else if value <= 63 {
        1.0 / (1u64 << value) as f64
    } else {
        f64::exp2(-(value as f64))
    }
}

/// Number of standard deviations for confidence bounds.
///
/// Higher values widen the interval around the estimate in exchange for
/// greater certainty that the true cardinality falls inside it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumStdDev {
    /// One standard deviation (\~68% confidence interval).
    One = 1,
    /// Two standard deviations (\~95% confidence interval).
    Two = 2,
    /// Three standard deviations (\~99.7% confidence interval).
    Three = 3,
}

/// Relative standard error of the raw estimator for a given precision.
///
/// `sqrt(3 ln 2 - 1) / sqrt(m)`, the non-historical factor: register
/// maxima here can come from merges and evictions in any order.
pub(crate) fn relative_standard_error(precision: u8) -> f64 {
    const RSE_FACTOR: f64 = 1.03896;
    let m = (1u64 << precision) as f64;
    RSE_FACTOR / m.sqrt()
}

/// Upper confidence bound for an estimate at the given confidence width.
pub(crate) fn upper_bound(estimate: f64, precision: u8, num_std_dev: NumStdDev) -> f64 {
    let rse = relative_standard_error(precision);
    // A negative relative error in the denominator pushes the bound up.
    estimate / (1.0 - (num_std_dev as u8 as f64) * rse)
}

/// Lower confidence bound for an estimate at the given confidence width.
pub(crate) fn lower_bound(estimate: f64, precision: u8, num_std_dev: NumStdDev) -> f64 {
    let rse = relative_standard_error(precision);
    estimate / (1.0 + (num_std_dev as u8 as f64) * rse)
}

/// Crossover below which linear counting beats the corrected raw estimate.
///
/// Empirically measured per precision; index is `precision - 4`.
fn linear_counting_threshold(precision: u8) -> f64 {
    debug_assert!((4..=16).contains(&precision));
    LINEAR_COUNTING_THRESHOLDS[(precision - 4) as usize]
}

/// Linear-counting crossover thresholds for precision 4-16.
const LINEAR_COUNTING_THRESHOLDS: [f64; 13] = [
    10.0,     // 4
    20.0,     // 5
    40.0,     // 6
    80.0,     // 7
    220.0,    // 8
    400.0,    // 9
    900.0,    // 10
    1800.0,   // 11
    3100.0,   // 12
    6500.0,   // 13
    11500.0,  // 14
    20000.0,  // 15
    50000.0,  // 16
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registers_estimate_zero() {
        let registers = vec![0u8; 1 << 12];
        assert_eq!(estimate_from_registers(&registers, 12), 0.0);
    }

    #[test]
    fn test_linear_counting_small_range() {
        // Three occupied registers out of 4096: linear counting territory,
        // and ln(m / (m - 3)) * m is within rounding of 3.
        let mut registers = vec![0u8; 1 << 12];
        registers[1] = 3;
        registers[77] = 1;
        registers[4000] = 9;
        let est = estimate_from_registers(&registers, 12);
        assert!((est - 3.0).abs() < 0.1, "estimate {} too far from 3", est);
    }

    #[test]
    fn test_saturated_registers_use_raw_estimate() {
        // All registers at rank 1: raw estimate ~ alpha * m^2 / (m/2) = 2*alpha*m.
        let m = 1usize << 12;
        let registers = vec![1u8; m];
        let est = estimate_from_registers(&registers, 12);
        let expected = alpha(m) * 2.0 * m as f64;
        assert!((est - expected).abs() < 1e-6);
    }

    #[test]
    fn test_inv_pow2_extremes() {
        assert_eq!(inv_pow2(0), 1.0);
        assert_eq!(inv_pow2(1), 0.5);
        assert!(inv_pow2(64) > 0.0);
    }

    #[test]
    fn test_bounds_bracket_the_estimate() {
        let est = 10_000.0;
        for &n in &[NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            assert!(upper_bound(est, 12, n) > est);
            assert!(lower_bound(est, 12, n) < est);
        }
        // Wider intervals for more standard deviations.
        assert!(upper_bound(est, 12, NumStdDev::Three) > upper_bound(est, 12, NumStdDev::One));
        assert!(lower_bound(est, 12, NumStdDev::Three) < lower_bound(est, 12, NumStdDev::One));
    }
}
