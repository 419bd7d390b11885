//! Float ↔ 4-bit code conversion.
//!
//! Two code spaces are in use:
//! - unsigned with zero point: `q = clamp(round(v / scale) + zp, 0, 15)`
//! - signed two's complement: `round(v / scale)` clamped to [-8, 7] and
//!   stored as its low nibble (codes 8..=15 are negative)
//!
//! The signed form is what the lookup-table kernels consume.

pub const INT4_LEVELS: usize = 16;
pub const INT4_MIN: i32 = -8;
pub const INT4_MAX: i32 = 7;

/// Signed value of a two's-complement 4-bit code (high bits ignored).
#[inline(always)]
pub fn sign4(code: u8) -> i8 {
    let c = (code & 0x0F) as i8;
    if c < 8 {
        c
    } else {
        c - 16
    }
}

/// Nibble code for a signed value already inside [-8, 7].
#[inline(always)]
pub fn code4(value: i8) -> u8 {
    (value as u8) & 0x0F
}

/// Quantize to an unsigned code in [0, 15]. NaN maps to `zero_point`.
pub fn quantize_int4(v: f32, scale: f32, zero_point: i32) -> u8 {
    let q = (v / scale).round();
    let q = if q.is_nan() { 0 } else { q as i32 }; // `as` saturates ±inf
    q.saturating_add(zero_point).clamp(0, 15) as u8
}

pub fn dequantize_int4(q: u8, scale: f32, zero_point: i32) -> f32 {
    (q as i32 - zero_point) as f32 * scale
}

/// Quantize to a signed two's-complement nibble code.
///
/// Values outside [-8, 7] after scaling are clamped, never wrapped.
pub fn quantize_signed4(v: f32, scale: f32) -> u8 {
    let q = (v / scale).round();
    let q = if q.is_nan() { 0 } else { q as i32 };
    code4(q.clamp(INT4_MIN, INT4_MAX) as i8)
}

pub fn dequantize_signed4(code: u8, scale: f32) -> f32 {
    sign4(code) as f32 * scale
}

/// Quantize a buffer into signed nibble codes.
pub fn quantize_signed4_slice(values: &[f32], scale: f32) -> Vec<u8> {
    values.iter().map(|&v| quantize_signed4(v, scale)).collect()
}
