//! Scalar lookup-table dot product: the semantic reference for every
//! vectorized path.

/// `Σ table[w[k] * stride + a[k]]` over `k`, with wrapping i32 adds.
///
/// Wrapping matches lane arithmetic in the SIMD paths, so both produce the
/// same bits even when a long reduction overflows.
#[inline]
pub fn lut_dot(table: &[i32], stride: usize, w: &[u8], a: &[u8]) -> i32 {
    debug_assert_eq!(w.len(), a.len());
    let mut acc = 0i32;
    for (&wk, &ak) in w.iter().zip(a) {
        acc = acc.wrapping_add(table[wk as usize * stride + ak as usize]);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_dot_identity_table() {
        // stride 8, table[w][a] = w * a
        let table: Vec<i32> = (0..4).flat_map(|w| (0..8).map(move |a| w * a)).collect();
        let w = [1u8, 2, 3, 0, 3];
        let a = [7u8, 1, 2, 5, 1];
        assert_eq!(lut_dot(&table, 8, &w, &a), 7 + 2 + 6 + 0 + 3);
        assert_eq!(lut_dot(&table, 8, &[], &[]), 0);
    }

    #[test]
    fn test_lut_dot_wraps() {
        let table = vec![i32::MAX; 8];
        assert_eq!(lut_dot(&table, 8, &[0, 0], &[0, 1]), i32::MAX.wrapping_mul(2));
    }
}
