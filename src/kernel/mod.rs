//! GEMM kernels: naive reference, lookup-table kernels, ISA dispatch.
//!
//! All lookup-table kernels take pre-unpacked, one-byte-per-code, row-major
//! operands: `au` is M×K weight codes, `bu` is K×N activation codes. B is
//! transposed once per call into a K-contiguous N×K panel so both operands
//! of every dot product are contiguous along the reduction dimension.
//!
//! Every variant accumulates with wrapping i32 adds, so the single-thread,
//! cache-blocked, weight-stationary, AVX2 and scalar paths all return the
//! same bits for the same inputs.

pub mod avx2;
pub mod scalar;

use crate::error::{GemmError, Result};
use crate::lut::{Int4Lut, ProductLookupTable};
use crate::matrix::{Layout, Matrix, Plain, RowMajor, Storage};
use crate::pool::WorkerPool;
use crate::quant::INT4_LEVELS;
use std::ops::{Add, Mul};
use std::sync::OnceLock;

// ── ISA selection ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPath {
    Scalar,
    Avx2,
}

static DETECTED_PATH: OnceLock<KernelPath> = OnceLock::new();

impl KernelPath {
    /// Best path supported by this CPU (detected once).
    pub fn detect() -> Self {
        *DETECTED_PATH.get_or_init(|| {
            let path = detect_isa();
            log::info!("LUT kernel path: {path:?}");
            path
        })
    }

    pub fn is_available(self) -> bool {
        match self {
            KernelPath::Scalar => true,
            KernelPath::Avx2 => detect_isa() == KernelPath::Avx2,
        }
    }

    /// `self` if the CPU supports it, otherwise the scalar reference.
    pub fn resolve(self) -> Self {
        if self.is_available() {
            self
        } else {
            log::debug!("{self:?} unavailable, using scalar LUT kernel");
            KernelPath::Scalar
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_isa() -> KernelPath {
    if is_x86_feature_detected!("avx2") {
        KernelPath::Avx2
    } else {
        KernelPath::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_isa() -> KernelPath {
    KernelPath::Scalar
}

/// Dot product dispatch. `path` must already be resolved.
#[inline]
fn lut_dot(path: KernelPath, table: &[i32], stride: usize, w: &[u8], a: &[u8]) -> i32 {
    match path {
        #[cfg(target_arch = "x86_64")]
        KernelPath::Avx2 => {
            // SAFETY: path was resolved against CPU features and operands were
            // validated against the table extents by `check_lut_operands`.
            unsafe { avx2::lut_dot_avx2(table, stride, w, a) }
        }
        _ => scalar::lut_dot(table, stride, w, a),
    }
}

// ── Blocking ────────────────────────────────────────────────────────

/// Tile extents for the cache-blocked kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    pub rows: usize,
    pub cols: usize,
    pub depth: usize,
}

impl Default for BlockSizes {
    fn default() -> Self {
        BlockSizes { rows: 32, cols: 64, depth: 256 }
    }
}

impl BlockSizes {
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 || self.depth == 0 {
            return Err(GemmError::Configuration(format!(
                "block sizes must be non-zero, got {self:?}"
            )));
        }
        Ok(())
    }
}

// ── Naive reference ─────────────────────────────────────────────────

/// Element types usable by the naive reference kernel.
pub trait Numeric:
    Copy + Default + Send + Sync + 'static + Add<Output = Self> + Mul<Output = Self>
{
}

impl<T> Numeric for T where
    T: Copy + Default + Send + Sync + 'static + Add<Output = T> + Mul<Output = T>
{
}

/// Reference triple loop, `C[i,j] += A[i,k] * B[k,j]` in i, k, j order.
///
/// Operands may use any layout/storage; the result is row-major plain.
pub fn matmul_naive<T, LA, SA, LB, SB>(
    a: &Matrix<T, LA, SA>,
    b: &Matrix<T, LB, SB>,
) -> Result<Matrix<T, RowMajor, Plain<T>>>
where
    T: Numeric,
    LA: Layout,
    SA: Storage<Elem = T>,
    LB: Layout,
    SB: Storage<Elem = T>,
{
    if a.cols() != b.rows() {
        return Err(GemmError::dims("inner dimension", a.cols(), b.rows()));
    }
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    output_len(m, n)?;
    let mut c: Matrix<T> = Matrix::new(m, n);
    for i in 0..m {
        for kk in 0..k {
            let aik = a.get(i, kk);
            for j in 0..n {
                c.set(i, j, c.get(i, j) + aik * b.get(kk, j));
            }
        }
    }
    Ok(c)
}

// ── Lookup-table kernels ────────────────────────────────────────────

/// Element count of an M×N output, or an error if it overflows usize.
///
/// With K = 0 both operands are empty for any M and N, so the output size
/// has to be checked on its own.
pub(crate) fn output_len(m: usize, n: usize) -> Result<usize> {
    m.checked_mul(n)
        .ok_or_else(|| GemmError::Allocation(format!("output {m}×{n} overflows usize")))
}

/// Validate buffer shapes and that every code stays inside the table.
/// Returns the output length M×N.
fn check_lut_operands(
    au: &[u8],
    bu: &[u8],
    m: usize,
    k: usize,
    n: usize,
    weight_levels: usize,
    activation_range: usize,
) -> Result<usize> {
    let a_len = m
        .checked_mul(k)
        .ok_or_else(|| GemmError::dims("M×K", usize::MAX, au.len()))?;
    let b_len = k
        .checked_mul(n)
        .ok_or_else(|| GemmError::dims("K×N", usize::MAX, bu.len()))?;
    let c_len = output_len(m, n)?;
    if au.len() != a_len {
        return Err(GemmError::dims("weight codes (M×K)", a_len, au.len()));
    }
    if bu.len() != b_len {
        return Err(GemmError::dims("activation codes (K×N)", b_len, bu.len()));
    }
    if let Some(&code) = au.iter().find(|&&c| c as usize >= weight_levels) {
        return Err(GemmError::InvalidCode { code: code as usize, limit: weight_levels });
    }
    if let Some(&code) = bu.iter().find(|&&c| c as usize >= activation_range) {
        return Err(GemmError::InvalidCode { code: code as usize, limit: activation_range });
    }
    Ok(c_len)
}

fn check_table(lut: &Int4Lut) -> Result<()> {
    if lut.as_slice().len() > i32::MAX as usize {
        return Err(GemmError::Configuration(format!(
            "table of {} entries exceeds 32-bit gather indexing",
            lut.as_slice().len()
        )));
    }
    Ok(())
}

/// K×N row-major → N×K (each output column's codes contiguous along K).
fn transpose_codes(bu: &[u8], k: usize, n: usize) -> Vec<u8> {
    let mut bt = vec![0u8; k * n];
    for kk in 0..k {
        let row = &bu[kk * n..(kk + 1) * n];
        for (j, &v) in row.iter().enumerate() {
            bt[j * k + kk] = v;
        }
    }
    bt
}

/// Single-threaded LUT GEMM on the best available path.
pub fn matmul_lut(
    au: &[u8],
    bu: &[u8],
    m: usize,
    k: usize,
    n: usize,
    lut: &Int4Lut,
) -> Result<Vec<i32>> {
    matmul_lut_with_path(au, bu, m, k, n, lut, KernelPath::detect())
}

/// Single-threaded LUT GEMM on a requested path (falls back to scalar if
/// the CPU lacks it).
pub fn matmul_lut_with_path(
    au: &[u8],
    bu: &[u8],
    m: usize,
    k: usize,
    n: usize,
    lut: &Int4Lut,
    path: KernelPath,
) -> Result<Vec<i32>> {
    let c_len = check_lut_operands(au, bu, m, k, n, lut.weight_levels(), lut.activation_range())?;
    check_table(lut)?;
    let path = path.resolve();
    let table = lut.as_slice();
    let stride = lut.row_stride();
    let bt = transpose_codes(bu, k, n);

    let mut out = vec![0i32; c_len];
    if k == 0 {
        return Ok(out);
    }
    for (i, out_row) in out.chunks_exact_mut(n.max(1)).enumerate().take(m) {
        let row_a = &au[i * k..(i + 1) * k];
        for (j, cell) in out_row.iter_mut().enumerate() {
            *cell = lut_dot(path, table, stride, row_a, &bt[j * k..(j + 1) * k]);
        }
    }
    Ok(out)
}

/// Cache-blocked multi-threaded LUT GEMM.
///
/// The output is split into disjoint row bands, one per task. Each task tiles
/// its rows, the output columns and K by `blocks`, and writes only its own
/// band, so there is no shared accumulation buffer and no merge.
#[allow(clippy::too_many_arguments)]
pub fn matmul_lut_blocked(
    au: &[u8],
    bu: &[u8],
    m: usize,
    k: usize,
    n: usize,
    lut: &Int4Lut,
    pool: &WorkerPool,
    blocks: BlockSizes,
    path: KernelPath,
) -> Result<Vec<i32>> {
    let c_len = check_lut_operands(au, bu, m, k, n, lut.weight_levels(), lut.activation_range())?;
    check_table(lut)?;
    blocks.validate()?;
    let path = path.resolve();

    let mut out = vec![0i32; c_len];
    if out.is_empty() || k == 0 {
        return Ok(out);
    }
    let bt = transpose_codes(bu, k, n);
    let band_rows = pool.band_rows(m);
    let table = lut.as_slice();
    let stride = lut.row_stride();

    let start = std::time::Instant::now();
    pool.for_each_band(&mut out, band_rows * n, |band, c| {
        let row0 = band * band_rows;
        let rows = c.len() / n;
        let a = &au[row0 * k..(row0 + rows) * k];
        accumulate_band(c, a, &bt, rows, k, n, table, stride, blocks, path);
        Ok(())
    })?;
    log::debug!(
        "LUT blocked {m}×{k}×{n} on {} workers ({path:?}): {} μs",
        pool.num_threads(),
        start.elapsed().as_micros(),
    );
    Ok(out)
}

/// One band: `c` is rows×N, `a` is rows×K, `bt` is the full N×K panel.
#[allow(clippy::too_many_arguments)]
fn accumulate_band(
    c: &mut [i32],
    a: &[u8],
    bt: &[u8],
    rows: usize,
    k: usize,
    n: usize,
    table: &[i32],
    stride: usize,
    blocks: BlockSizes,
    path: KernelPath,
) {
    for i0 in (0..rows).step_by(blocks.rows) {
        let i1 = (i0 + blocks.rows).min(rows);
        for j0 in (0..n).step_by(blocks.cols) {
            let j1 = (j0 + blocks.cols).min(n);
            for k0 in (0..k).step_by(blocks.depth) {
                let k1 = (k0 + blocks.depth).min(k);
                for i in i0..i1 {
                    let wa = &a[i * k + k0..i * k + k1];
                    for j in j0..j1 {
                        let partial = lut_dot(path, table, stride, wa, &bt[j * k + k0..j * k + k1]);
                        let cell = &mut c[i * n + j];
                        *cell = cell.wrapping_add(partial);
                    }
                }
            }
        }
    }
}

/// Weight-stationary LUT GEMM with per-worker tables.
///
/// For each reduction index `kk`, a worker refills its own 16 × N table from
/// activation row `kk`, so entry `(w, j)` is `sign(w) × sign(B[kk, j])`, then
/// adds row `au[i, kk]` of that table to every output row it owns. Tables are
/// never shared between workers.
pub fn matmul_lut_weight_stationary(
    au: &[u8],
    bu: &[u8],
    m: usize,
    k: usize,
    n: usize,
    pool: &WorkerPool,
) -> Result<Vec<i32>> {
    let c_len = check_lut_operands(au, bu, m, k, n, INT4_LEVELS, INT4_LEVELS)?;

    let mut out = vec![0i32; c_len];
    if out.is_empty() || k == 0 {
        return Ok(out);
    }
    let band_rows = pool.band_rows(m);

    pool.for_each_band(&mut out, band_rows * n, |band, c| {
        let row0 = band * band_rows;
        let mut lut = ProductLookupTable::<u8, i32>::new(INT4_LEVELS, n)?;
        for kk in 0..k {
            lut.fill_from_activation(&bu[kk * n..(kk + 1) * n])?;
            for (i, c_row) in c.chunks_exact_mut(n).enumerate() {
                let w = au[(row0 + i) * k + kk] as usize;
                for (cell, &p) in c_row.iter_mut().zip(lut.get_row(w)) {
                    *cell = cell.wrapping_add(p);
                }
            }
        }
        Ok(())
    })?;
    Ok(out)
}
