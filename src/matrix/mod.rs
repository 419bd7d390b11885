//! Generic matrix container composed from a layout and a storage policy.
//!
//! `Matrix<T, L, S>` owns a flat buffer of `S::Unit` sized to
//! `ceil(rows * cols / S::ENTRIES_PER_UNIT)`. Dimensions are fixed at
//! construction. Indexing resolves at compile time through the policy types,
//! so `Matrix<u8, RowMajor, Int4Packed>` and `Matrix<i32, ColMajor>` share one
//! implementation with no runtime dispatch.

pub mod layout;
pub mod storage;

pub use layout::{ColMajor, Layout, RowMajor};
pub use storage::{pack_int4, unpack_nibbles, Int4Packed, Plain, Storage};

use crate::error::{GemmError, Result};
use std::fmt;
use std::marker::PhantomData;

/// Packed 4-bit code matrix.
pub type Int4Matrix<L = RowMajor> = Matrix<u8, L, Int4Packed>;

pub struct Matrix<T, L = RowMajor, S = Plain<T>>
where
    L: Layout,
    S: Storage<Elem = T>,
{
    rows: usize,
    cols: usize,
    data: Vec<S::Unit>,
    _marker: PhantomData<(T, L)>,
}

impl<T, L, S> Matrix<T, L, S>
where
    T: Copy,
    L: Layout,
    S: Storage<Elem = T>,
{
    /// Allocate a zeroed `rows × cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![S::Unit::default(); S::units_for(rows * cols)],
            _marker: PhantomData,
        }
    }

    /// Build a matrix by evaluating `f(row, col)` for every position.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut m = Self::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, f(r, c));
            }
        }
        m
    }

    /// Build a matrix from a row-major slice of logical values.
    pub fn from_row_major(rows: usize, cols: usize, values: &[T]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(GemmError::dims("matrix values", rows * cols, values.len()));
        }
        Ok(Self::from_fn(rows, cols, |r, c| values[r * cols + c]))
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of logical elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw storage units (packed bytes for `Int4Packed`).
    #[inline]
    pub fn as_units(&self) -> &[S::Unit] {
        &self.data
    }

    #[inline(always)]
    fn locate(&self, row: usize, col: usize) -> (usize, usize) {
        debug_assert!(
            row < self.rows && col < self.cols,
            "({row}, {col}) out of bounds for {}×{}",
            self.rows,
            self.cols,
        );
        let off = L::index(row, col, self.rows, self.cols);
        (off / S::ENTRIES_PER_UNIT, off % S::ENTRIES_PER_UNIT)
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> T {
        let (unit, slot) = self.locate(row, col);
        S::get(&self.data[unit], slot)
    }

    /// Write one element; packed storage keeps only the low 4 bits.
    #[inline(always)]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let (unit, slot) = self.locate(row, col);
        S::set(&mut self.data[unit], value, slot);
    }

    /// Logical contents in row-major order, independent of `L`.
    pub fn to_row_major_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.push(self.get(r, c));
            }
        }
        out
    }
}

impl<T, L, S> Clone for Matrix<T, L, S>
where
    L: Layout,
    S: Storage<Elem = T>,
{
    fn clone(&self) -> Self {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, L, S> PartialEq for Matrix<T, L, S>
where
    T: Copy + PartialEq,
    L: Layout,
    S: Storage<Elem = T>,
{
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && (0..self.rows)
                .all(|r| (0..self.cols).all(|c| self.get(r, c) == other.get(r, c)))
    }
}

impl<T, L, S> fmt::Debug for Matrix<T, L, S>
where
    T: Copy + fmt::Debug,
    L: Layout,
    S: Storage<Elem = T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Matrix {}×{}", self.rows, self.cols)?;
        for r in 0..self.rows {
            let row: Vec<T> = (0..self.cols).map(|c| self.get(r, c)).collect();
            writeln!(f, "  {row:?}")?;
        }
        Ok(())
    }
}

/// Expand a packed 4-bit matrix into one byte per element, row-major.
///
/// Called once before a GEMM so the hot loop never extracts nibbles.
pub fn unpack_int4<L: Layout>(m: &Int4Matrix<L>) -> Vec<u8> {
    if L::ROW_MAJOR {
        return unpack_nibbles(m.as_units(), m.len());
    }
    m.to_row_major_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sizing() {
        let m: Matrix<i32> = Matrix::new(3, 5);
        assert_eq!(m.as_units().len(), 15);

        let p: Int4Matrix = Int4Matrix::new(3, 5);
        assert_eq!(p.as_units().len(), 8); // ceil(15 / 2)

        let e: Int4Matrix<ColMajor> = Int4Matrix::new(0, 7);
        assert!(e.is_empty());
        assert_eq!(e.as_units().len(), 0);
    }

    #[test]
    fn test_get_set_both_layouts() {
        let mut r: Matrix<i32, RowMajor> = Matrix::new(2, 3);
        let mut c: Matrix<i32, ColMajor> = Matrix::new(2, 3);
        for i in 0..2 {
            for j in 0..3 {
                r.set(i, j, (i * 10 + j) as i32);
                c.set(i, j, (i * 10 + j) as i32);
            }
        }
        assert_eq!(r.as_units(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(c.as_units(), &[0, 10, 1, 11, 2, 12]);
        assert_eq!(r.to_row_major_vec(), c.to_row_major_vec());
    }

    #[test]
    fn test_packed_nibble_placement() {
        let mut m: Int4Matrix = Int4Matrix::new(1, 3);
        m.set(0, 0, 0x5);
        m.set(0, 1, 0xC);
        m.set(0, 2, 0x1F); // truncated to 0xF
        assert_eq!(m.as_units(), &[0xC5, 0x0F]);
        assert_eq!(m.get(0, 2), 0xF);
    }

    #[test]
    fn test_unpack_int4_col_major_is_row_major_order() {
        let m: Int4Matrix<ColMajor> = Int4Matrix::from_fn(3, 2, |r, c| (r * 2 + c) as u8);
        assert_eq!(unpack_int4(&m), vec![0, 1, 2, 3, 4, 5]);

        let rm: Int4Matrix = Int4Matrix::from_fn(3, 3, |r, c| (r * 3 + c) as u8);
        assert_eq!(unpack_int4(&rm), (0..9).collect::<Vec<u8>>());
    }

    #[test]
    fn test_from_row_major_length_check() {
        let err = Matrix::<f32>::from_row_major(2, 2, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, GemmError::DimensionMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of bounds")]
    fn test_debug_bounds_check() {
        let m: Matrix<i32> = Matrix::new(2, 2);
        // (0, 2) maps to offset 2, inside the buffer; only the assertion catches it.
        let _ = m.get(0, 2);
    }
}
