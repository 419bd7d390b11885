//! AVX2 gather kernel for lookup-table GEMM.
//!
//! Core strategy, 8 reduction elements per step:
//! - Load 8 weight codes and 8 activation codes (u8) into the low half of XMM
//! - Zero-extend both to 8 × i32 lanes
//! - Form table indices `w * stride + a` in-register
//! - One `vpgatherdd` pulls the 8 products
//! - Horizontal-sum the lanes into the scalar accumulator
//!
//! The tail (`k mod 8`) goes through the scalar reference, and all adds wrap,
//! so results are bit-identical to `scalar::lut_dot`.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "x86_64")]
use super::scalar;

/// AVX2 version of [`scalar::lut_dot`].
///
/// # Safety
/// Requires AVX2. Every `w[i] * stride + a[i]` must be a valid index into
/// `table` and `table.len()` must fit in i32. `w` and `a` must have equal
/// length.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub unsafe fn lut_dot_avx2(table: &[i32], stride: usize, w: &[u8], a: &[u8]) -> i32 {
    debug_assert_eq!(w.len(), a.len());
    let k = w.len();
    let base = table.as_ptr();
    let vstride = _mm256_set1_epi32(stride as i32);

    let mut acc = 0i32;
    let mut i = 0usize;
    while i + 8 <= k {
        let w8 = _mm_loadl_epi64(w.as_ptr().add(i) as *const __m128i);
        let a8 = _mm_loadl_epi64(a.as_ptr().add(i) as *const __m128i);
        let w32 = _mm256_cvtepu8_epi32(w8);
        let a32 = _mm256_cvtepu8_epi32(a8);
        let idx = _mm256_add_epi32(_mm256_mullo_epi32(w32, vstride), a32);
        let vals = _mm256_i32gather_epi32::<4>(base, idx);
        acc = acc.wrapping_add(hsum_epi32(vals));
        i += 8;
    }

    acc.wrapping_add(scalar::lut_dot(table, stride, &w[i..], &a[i..]))
}

// ── AVX2 utility ────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn hsum_epi32(v: __m256i) -> i32 {
    let lo = _mm256_castsi256_si128(v);
    let hi = _mm256_extracti128_si256::<1>(v);
    let sum = _mm_add_epi32(lo, hi);
    let sum = _mm_hadd_epi32(sum, sum);
    let sum = _mm_hadd_epi32(sum, sum);
    _mm_cvtsi128_si32(sum)
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::lut::Int4Lut;

    #[test]
    fn test_hsum_wraps_like_scalar() {
        if !is_x86_feature_detected!("avx2") {
            eprintln!("Skipping: AVX2 not available");
            return;
        }
        let lanes = [i32::MAX, 1, 2, 3, -4, i32::MIN, 7, 100];
        let expected = lanes.iter().fold(0i32, |acc, &v| acc.wrapping_add(v));
        let got = unsafe {
            let v = _mm256_loadu_si256(lanes.as_ptr() as *const __m256i);
            hsum_epi32(v)
        };
        assert_eq!(got, expected);
    }

    #[test]
    fn test_avx2_matches_scalar_all_tail_lengths() {
        if !is_x86_feature_detected!("avx2") {
            eprintln!("Skipping: AVX2 not available");
            return;
        }
        let lut = Int4Lut::int4().unwrap();
        let table = lut.as_slice();
        let stride = lut.row_stride();
        for k in 0..=40usize {
            let w: Vec<u8> = (0..k).map(|i| ((i * 7 + 3) % 16) as u8).collect();
            let a: Vec<u8> = (0..k).map(|i| ((i * 5 + 11) % 16) as u8).collect();
            let fast = unsafe { lut_dot_avx2(table, stride, &w, &a) };
            let reference = scalar::lut_dot(table, stride, &w, &a);
            assert_eq!(fast, reference, "k={k}");
        }
    }
}
