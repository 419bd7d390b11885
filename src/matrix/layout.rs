//! Layout policies: logical (row, col) to linear offset.

/// Maps a logical position to a linear element offset.
///
/// Implementors are zero-sized and stateless; the matrix supplies its own
/// extents on every call.
pub trait Layout: Copy + Default + Send + Sync + 'static {
    /// True when consecutive columns of one row are adjacent offsets.
    const ROW_MAJOR: bool;

    fn index(row: usize, col: usize, nrows: usize, ncols: usize) -> usize;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowMajor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColMajor;

impl Layout for RowMajor {
    const ROW_MAJOR: bool = true;

    #[inline(always)]
    fn index(row: usize, col: usize, _nrows: usize, ncols: usize) -> usize {
        row * ncols + col
    }
}

impl Layout for ColMajor {
    const ROW_MAJOR: bool = false;

    #[inline(always)]
    fn index(row: usize, col: usize, nrows: usize, _ncols: usize) -> usize {
        col * nrows + row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_index() {
        // 3×4: (1,2) → 1*4 + 2
        assert_eq!(RowMajor::index(1, 2, 3, 4), 6);
        assert_eq!(RowMajor::index(2, 3, 3, 4), 11);
    }

    #[test]
    fn test_col_major_index() {
        // 3×4: (1,2) → 2*3 + 1
        assert_eq!(ColMajor::index(1, 2, 3, 4), 7);
        assert_eq!(ColMajor::index(2, 3, 3, 4), 11);
        assert_eq!(ColMajor::index(2, 0, 3, 4), 2);
    }
}
