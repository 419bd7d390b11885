//! Signed-product lookup table for low-bit GEMM.
//!
//! Replaces `w * a` with one read of `table[w * stride + a]`. For 4-bit
//! weights against 4-bit activations the whole table is 16 × 16 products and
//! stays in L1.
//!
//! Layout: `weight_levels` rows, each padded to `stride` entries where
//! `stride` is the next multiple of 8 ≥ `activation_range`, so one 8-lane
//! gather never crosses into the next row's bookkeeping. The buffer is
//! 64-byte aligned and zero-initialised, so padding entries read as 0.

pub mod aligned;

use crate::error::{GemmError, Result};
use aligned::{AlignedBuf, Pod};
use std::marker::PhantomData;

/// Destination type of a table entry. Products are computed in i64 and
/// saturated to `[MIN, MAX]` before narrowing.
pub trait Product: Pod + std::fmt::Debug + PartialEq {
    const MIN: i64;
    const MAX: i64;

    /// Narrow an already-saturated value.
    fn from_i64(v: i64) -> Self;
    fn to_i64(self) -> i64;

    #[inline]
    fn saturate(v: i64) -> Self {
        Self::from_i64(v.clamp(Self::MIN, Self::MAX))
    }
}

impl Product for i16 {
    const MIN: i64 = i16::MIN as i64;
    const MAX: i64 = i16::MAX as i64;

    #[inline]
    fn from_i64(v: i64) -> Self {
        v as i16
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }
}

impl Product for i32 {
    const MIN: i64 = i32::MIN as i64;
    const MAX: i64 = i32::MAX as i64;

    #[inline]
    fn from_i64(v: i64) -> Self {
        v as i32
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }
}

/// Activation operand type.
///
/// `u8` values are low-bit codes and use the two's-complement mapping
/// (`code >= levels / 2` means `code - levels`); wider signed types are taken
/// as raw values.
pub trait ActivationCode: Copy + Send + Sync + 'static {
    /// Signed value of an activation held in a buffer.
    fn signed_value(self, levels: usize) -> i64;

    /// Signed value when the table index itself is the activation.
    fn index_value(index: usize, levels: usize) -> i64;
}

#[inline]
fn twos_complement(raw: usize, levels: usize) -> i64 {
    if raw < levels / 2 {
        raw as i64
    } else {
        raw as i64 - levels as i64
    }
}

impl ActivationCode for u8 {
    #[inline]
    fn signed_value(self, levels: usize) -> i64 {
        twos_complement(self as usize, levels)
    }

    #[inline]
    fn index_value(index: usize, levels: usize) -> i64 {
        twos_complement(index, levels)
    }
}

macro_rules! raw_activation {
    ($($t:ty),*) => {$(
        impl ActivationCode for $t {
            #[inline]
            fn signed_value(self, _levels: usize) -> i64 {
                self as i64
            }

            #[inline]
            fn index_value(index: usize, _levels: usize) -> i64 {
                index as i64
            }
        }
    )*};
}

raw_activation!(i8, i16, i32);

/// Table of saturated products indexed by (weight code, activation index).
pub struct ProductLookupTable<A = u8, P = i32>
where
    A: ActivationCode,
    P: Product,
{
    weight_levels: usize,
    activation_range: usize,
    stride: usize,
    table: AlignedBuf<P>,
    _act: PhantomData<fn(A)>,
}

/// 4-bit × 4-bit table with i32 products, the form the gather kernels consume.
pub type Int4Lut = ProductLookupTable<u8, i32>;

impl Int4Lut {
    /// 16 × 16 signed-nibble product table.
    pub fn int4() -> Result<Self> {
        Self::new(16, 16)
    }
}

impl<A, P> ProductLookupTable<A, P>
where
    A: ActivationCode,
    P: Product,
{
    /// Build a table treating each activation index as the raw code.
    ///
    /// Fails with `Allocation` if the aligned buffer cannot be obtained; no
    /// partially built table is ever returned.
    pub fn new(weight_levels: usize, activation_range: usize) -> Result<Self> {
        if weight_levels == 0 || activation_range == 0 {
            return Err(GemmError::Configuration(format!(
                "lookup table needs non-zero extents, got {weight_levels} × {activation_range}"
            )));
        }
        let stride = activation_range
            .checked_next_multiple_of(8)
            .ok_or_else(|| GemmError::Allocation("activation range overflows".into()))?;
        let len = weight_levels
            .checked_mul(stride)
            .ok_or_else(|| GemmError::Allocation("table size overflows".into()))?;
        let table = AlignedBuf::zeroed(len)?;

        let mut lut = ProductLookupTable {
            weight_levels,
            activation_range,
            stride,
            table,
            _act: PhantomData,
        };
        let levels = weight_levels;
        lut.fill_with(|a| A::index_value(a, levels));
        Ok(lut)
    }

    /// Rebuild every weight row from actual activation values.
    ///
    /// Entry `(w, a)` becomes `sign(w) × act_row[a]`, so one reduction slice of
    /// activations can be reused across all weights touching it. Rewrites the
    /// existing buffer in place.
    pub fn fill_from_activation(&mut self, act_row: &[A]) -> Result<()> {
        if act_row.len() < self.activation_range {
            return Err(GemmError::dims(
                "activation row",
                self.activation_range,
                act_row.len(),
            ));
        }
        let levels = self.weight_levels;
        self.fill_with(|a| act_row[a].signed_value(levels));
        Ok(())
    }

    fn fill_with(&mut self, act: impl Fn(usize) -> i64) {
        let levels = self.weight_levels;
        let range = self.activation_range;
        let stride = self.stride;
        let table = self.table.as_mut_slice();
        for w in 0..levels {
            let signed_w = twos_complement(w, levels);
            let row = &mut table[w * stride..w * stride + range];
            for (a, slot) in row.iter_mut().enumerate() {
                *slot = P::saturate(signed_w.saturating_mul(act(a)));
            }
        }
    }

    #[inline(always)]
    pub fn get(&self, w: usize, a: usize) -> P {
        debug_assert!(w < self.weight_levels && a < self.stride);
        self.table.as_slice()[w * self.stride + a]
    }

    /// One padded weight row (`row_stride()` entries).
    #[inline]
    pub fn get_row(&self, w: usize) -> &[P] {
        &self.table.as_slice()[w * self.stride..(w + 1) * self.stride]
    }

    /// Flat table, `weight_levels × row_stride` entries.
    #[inline]
    pub fn as_slice(&self) -> &[P] {
        self.table.as_slice()
    }

    #[inline]
    pub fn row_stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn weight_levels(&self) -> usize {
        self.weight_levels
    }

    #[inline]
    pub fn activation_range(&self) -> usize {
        self.activation_range
    }

    pub fn size_bytes(&self) -> usize {
        self.table.len() * std::mem::size_of::<P>()
    }
}
