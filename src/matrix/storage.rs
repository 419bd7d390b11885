//! Storage policies: linear offset to physical unit + sub-unit slot.
//!
//! `Plain<T>` stores one element per unit. `Int4Packed` stores two 4-bit
//! codes per byte: even offsets in the low nibble, odd offsets in the high
//! nibble. The byte-array helpers at the bottom expose the same packing
//! without a matrix around it.

use std::marker::PhantomData;

/// Maps a linear element offset onto physical storage units.
pub trait Storage: Copy + Default + Send + Sync + 'static {
    /// Logical element type returned by `get`.
    type Elem: Copy;
    /// Physical unit held in the matrix buffer.
    type Unit: Copy + Default + Send + Sync;

    const ENTRIES_PER_UNIT: usize;

    fn get(unit: &Self::Unit, slot: usize) -> Self::Elem;
    fn set(unit: &mut Self::Unit, value: Self::Elem, slot: usize);

    /// Units needed to hold `n` elements.
    #[inline]
    fn units_for(n: usize) -> usize {
        n.div_ceil(Self::ENTRIES_PER_UNIT)
    }
}

/// One value per unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain<T>(PhantomData<T>);

impl<T> Storage for Plain<T>
where
    T: Copy + Default + Send + Sync + 'static,
{
    type Elem = T;
    type Unit = T;

    const ENTRIES_PER_UNIT: usize = 1;

    #[inline(always)]
    fn get(unit: &T, _slot: usize) -> T {
        *unit
    }

    #[inline(always)]
    fn set(unit: &mut T, value: T, _slot: usize) {
        *unit = value;
    }
}

/// Two 4-bit codes per byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int4Packed;

impl Storage for Int4Packed {
    type Elem = u8;
    type Unit = u8;

    const ENTRIES_PER_UNIT: usize = 2;

    #[inline(always)]
    fn get(unit: &u8, slot: usize) -> u8 {
        if slot == 0 {
            unit & 0x0F
        } else {
            (unit >> 4) & 0x0F
        }
    }

    #[inline(always)]
    fn set(unit: &mut u8, value: u8, slot: usize) {
        if slot == 0 {
            *unit = (*unit & 0xF0) | (value & 0x0F);
        } else {
            *unit = (*unit & 0x0F) | ((value & 0x0F) << 4);
        }
    }
}

/// Pack one-code-per-byte values into nibble pairs (values masked to 4 bits).
pub fn pack_int4(codes: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; Int4Packed::units_for(codes.len())];
    for (pos, &code) in codes.iter().enumerate() {
        Int4Packed::set(&mut packed[pos / 2], code, pos % 2);
    }
    packed
}

/// Expand the first `n` nibbles of `packed` into one byte each.
pub fn unpack_nibbles(packed: &[u8], n: usize) -> Vec<u8> {
    debug_assert!(packed.len() >= Int4Packed::units_for(n));
    let mut out = Vec::with_capacity(n);
    for &byte in &packed[..n / 2] {
        out.push(byte & 0x0F);
        out.push(byte >> 4);
    }
    if n % 2 == 1 {
        out.push(packed[n / 2] & 0x0F);
    }
    out
}
