//! GEMM engine: backend selection and the public matmul entry point.
//!
//! Usage:
//! ```no_run
//! use mpgemm::{Activation, GemmEngine};
//!
//! let mut engine = GemmEngine::new("lut")?;
//! engine.generate_lut(4)?;
//! let c = engine.matmul(&[1, 2, 3, 4], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2)?;
//! let c = engine.add_bias(&c, 2, 2, &[0.5, -0.5])?;
//! let c = engine.apply_activation(&c, 2, 2, Activation::Relu)?;
//! # Ok::<(), mpgemm::GemmError>(())
//! ```

use crate::config::EngineConfig;
use crate::error::{GemmError, Result};
use crate::kernel::{self, KernelPath};
use crate::lut::Int4Lut;
use crate::matrix::{unpack_int4, Int4Matrix, Matrix, RowMajor};
use crate::pool::WorkerPool;
use crate::post::{self, Activation};
use crate::quant::{quantize_signed4_slice, sign4, INT4_LEVELS};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Naive,
    Lut,
    Blas,
}

impl FromStr for Backend {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(Backend::Naive),
            "lut" => Ok(Backend::Lut),
            "blas" | "mkl" => Ok(Backend::Blas),
            _ => Err(GemmError::Configuration(format!("unknown backend '{s}'"))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Naive => "naive",
            Backend::Lut => "lut",
            Backend::Blas => "blas",
        })
    }
}

/// Single-precision GEMM supplied by a vendor BLAS.
///
/// `a` is M×K, `b` is K×N, both row-major; returns row-major M×N.
pub trait ExternalBlas: Send + Sync {
    fn sgemm(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;
}

pub struct GemmEngine {
    backend: Backend,
    config: EngineConfig,
    lut: Option<Int4Lut>,
    /// Only built for the LUT backend.
    pool: Option<WorkerPool>,
    blas: Option<Box<dyn ExternalBlas>>,
}

impl GemmEngine {
    /// Engine with default settings for the named backend.
    pub fn new(backend: &str) -> Result<Self> {
        Self::with_config(EngineConfig::with_backend(backend))
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Engine backed by an external BLAS provider (any backend name accepted,
    /// but the provider is only used by `blas`).
    pub fn with_blas(config: EngineConfig, blas: Box<dyn ExternalBlas>) -> Result<Self> {
        Self::build(config, Some(blas))
    }

    fn build(config: EngineConfig, blas: Option<Box<dyn ExternalBlas>>) -> Result<Self> {
        config.validate()?;
        let backend: Backend = config.backend.parse()?;
        if backend == Backend::Blas && blas.is_none() {
            return Err(GemmError::Configuration(
                "blas backend selected but no BLAS provider supplied".into(),
            ));
        }
        let pool = match backend {
            Backend::Lut => Some(WorkerPool::new(config.threads, config.pin_threads)?),
            _ => None,
        };
        log::info!(
            "GEMM engine: backend={backend}, threads={}, force_scalar={}",
            pool.as_ref().map_or(1, WorkerPool::num_threads),
            config.force_scalar,
        );
        Ok(GemmEngine {
            backend,
            config,
            lut: None,
            pool,
            blas,
        })
    }

    /// Build the signed product table. Only the LUT backend has one, and
    /// only 4-bit codes are supported.
    pub fn generate_lut(&mut self, bit_width: u32) -> Result<()> {
        if self.backend != Backend::Lut {
            return Err(GemmError::Precondition(format!(
                "generate_lut requires the lut backend, engine uses {}",
                self.backend
            )));
        }
        if bit_width != 4 {
            return Err(GemmError::Configuration(format!(
                "unsupported LUT bit width {bit_width} (only 4 is supported)"
            )));
        }
        let lut = Int4Lut::int4()?;
        log::info!(
            "Generated INT4 LUT: {}×{} (stride {}), {} bytes",
            lut.weight_levels(),
            lut.activation_range(),
            lut.row_stride(),
            lut.size_bytes(),
        );
        self.lut = Some(lut);
        Ok(())
    }

    /// `weights` are M×K 4-bit codes (one per byte, signed two's complement),
    /// `activations` are K×N f32, both row-major. Returns row-major M×N.
    pub fn matmul(
        &self,
        weights: &[u8],
        activations: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        let a_len = m
            .checked_mul(k)
            .ok_or_else(|| GemmError::dims("M×K", usize::MAX, weights.len()))?;
        let b_len = k
            .checked_mul(n)
            .ok_or_else(|| GemmError::dims("K×N", usize::MAX, activations.len()))?;
        kernel::output_len(m, n)?;
        if weights.len() != a_len {
            return Err(GemmError::dims("weights (M×K)", a_len, weights.len()));
        }
        if activations.len() != b_len {
            return Err(GemmError::dims("activations (K×N)", b_len, activations.len()));
        }
        if let Some(&code) = weights.iter().find(|&&w| w as usize >= INT4_LEVELS) {
            return Err(GemmError::InvalidCode { code: code as usize, limit: INT4_LEVELS });
        }

        match self.backend {
            Backend::Naive => self.matmul_naive(weights, activations, m, k, n),
            Backend::Lut => self.matmul_lut(weights, activations, m, k, n),
            Backend::Blas => self.matmul_blas(weights, activations, m, k, n),
        }
    }

    fn matmul_naive(
        &self,
        weights: &[u8],
        activations: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        let packed = Int4Matrix::<RowMajor>::from_row_major(m, k, weights)?;
        // f64 keeps every integer product exact
        let a = Matrix::<f64>::from_fn(m, k, |i, kk| sign4(packed.get(i, kk)) as f64);
        let b = Matrix::<f64>::from_fn(k, n, |kk, j| activations[kk * n + j].round() as f64);
        let c = kernel::matmul_naive(&a, &b)?;
        Ok(c.to_row_major_vec().into_iter().map(|x| x as f32).collect())
    }

    fn matmul_lut(
        &self,
        weights: &[u8],
        activations: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        let lut = self.lut.as_ref().ok_or_else(|| {
            GemmError::Precondition("LUT not generated; call generate_lut(4) first".into())
        })?;
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| GemmError::Precondition("LUT backend has no worker pool".into()))?;

        let au = unpack_int4(&Int4Matrix::<RowMajor>::from_row_major(m, k, weights)?);
        let scale = self.config.activation_scale;
        let bu = quantize_signed4_slice(activations, scale);
        let path = self.kernel_path();

        let sums = if pool.num_threads() <= 1 {
            kernel::matmul_lut_with_path(&au, &bu, m, k, n, lut, path)?
        } else {
            let blocks = self.config.block_sizes();
            kernel::matmul_lut_blocked(&au, &bu, m, k, n, lut, pool, blocks, path)?
        };
        Ok(sums.into_iter().map(|s| s as f32 * scale).collect())
    }

    fn matmul_blas(
        &self,
        weights: &[u8],
        activations: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        let blas = self
            .blas
            .as_ref()
            .ok_or_else(|| GemmError::Configuration("no BLAS provider".into()))?;
        let a: Vec<f32> = weights.iter().map(|&w| sign4(w) as f32).collect();
        let c = blas.sgemm(&a, activations, m, k, n)?;
        if c.len() != m * n {
            return Err(GemmError::dims("BLAS output (M×N)", m * n, c.len()));
        }
        Ok(c)
    }

    fn kernel_path(&self) -> KernelPath {
        if self.config.force_scalar {
            KernelPath::Scalar
        } else {
            KernelPath::detect()
        }
    }

    pub fn add_bias(&self, c: &[f32], m: usize, n: usize, bias: &[f32]) -> Result<Vec<f32>> {
        post::add_bias(c, m, n, bias)
    }

    pub fn apply_activation(
        &self,
        c: &[f32],
        m: usize,
        n: usize,
        act: Activation,
    ) -> Result<Vec<f32>> {
        post::apply_activation(c, m, n, act)
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn has_lut(&self) -> bool {
        self.lut.is_some()
    }

    pub fn lut(&self) -> Option<&Int4Lut> {
        self.lut.as_ref()
    }

    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, WorkerPool::num_threads)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::code4;

    /// Reference provider: plain triple loop in f32.
    struct LoopBlas;

    impl ExternalBlas for LoopBlas {
        fn sgemm(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
            let mut c = vec![0.0f32; m * n];
            for i in 0..m {
                for kk in 0..k {
                    for j in 0..n {
                        c[i * n + j] += a[i * k + kk] * b[kk * n + j];
                    }
                }
            }
            Ok(c)
        }
    }

    struct ShortBlas;

    impl ExternalBlas for ShortBlas {
        fn sgemm(&self, _: &[f32], _: &[f32], _: usize, _: usize, _: usize) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    fn lut_engine(threads: usize) -> GemmEngine {
        let config = EngineConfig {
            threads,
            ..EngineConfig::with_backend("lut")
        };
        let mut engine = GemmEngine::with_config(config).unwrap();
        engine.generate_lut(4).unwrap();
        engine
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("naive".parse::<Backend>().unwrap(), Backend::Naive);
        assert_eq!("LUT".parse::<Backend>().unwrap(), Backend::Lut);
        assert_eq!("mkl".parse::<Backend>().unwrap(), Backend::Blas);
        assert!(matches!(GemmEngine::new("cuda"), Err(GemmError::Configuration(_))));
    }

    #[test]
    fn test_blas_requires_provider() {
        assert!(matches!(GemmEngine::new("blas"), Err(GemmError::Configuration(_))));
    }

    #[test]
    fn test_unsupported_bit_width() {
        let mut engine = GemmEngine::new("lut").unwrap();
        assert!(matches!(engine.generate_lut(5), Err(GemmError::Configuration(_))));
        assert!(!engine.has_lut());
    }

    #[test]
    fn test_matmul_before_generate_lut() {
        let engine = GemmEngine::new("lut").unwrap();
        let err = engine.matmul(&[1, 2, 3, 4], &[1.0, 0.0, 0.0, 1.0], 2, 2, 2).unwrap_err();
        assert!(matches!(err, GemmError::Precondition(_)));
    }

    #[test]
    fn test_generate_lut_wrong_backend() {
        let mut engine = GemmEngine::new("naive").unwrap();
        assert!(matches!(engine.generate_lut(4), Err(GemmError::Precondition(_))));
    }

    #[test]
    fn test_generate_lut_builds_table() {
        let engine = lut_engine(1);
        let lut = engine.lut().unwrap();
        assert_eq!(lut.weight_levels(), 16);
        assert_eq!(lut.activation_range(), 16);
        assert_eq!(lut.row_stride() % 8, 0);
        assert_eq!(lut.get(7, 8), -56);
        assert_eq!(lut.get(15, 15), 1);
        assert_eq!(engine.num_threads(), 1);
    }

    #[test]
    fn test_naive_backend() {
        let engine = GemmEngine::new("naive").unwrap();
        // Signed weights [[1,2],[3,-4]]; activations rounded to integers.
        let w = [1, 2, 3, code4(-4)];
        let c = engine.matmul(&w, &[5.2, 6.0, 6.6, 8.4], 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, -13.0, -14.0]);
        assert_eq!(engine.num_threads(), 1);
    }

    #[test]
    fn test_lut_backend_matches_naive() {
        let naive = GemmEngine::new("naive").unwrap();
        let (m, k, n) = (9, 21, 5);
        let w: Vec<u8> = (0..m * k).map(|i| ((i * 13 + 5) % 16) as u8).collect();
        let act: Vec<f32> = (0..k * n).map(|i| ((i * 7) % 16) as f32 - 8.0).collect();
        let expected = naive.matmul(&w, &act, m, k, n).unwrap();
        for threads in [1, 3] {
            let got = lut_engine(threads).matmul(&w, &act, m, k, n).unwrap();
            assert_eq!(got, expected, "threads={threads}");
        }
    }

    #[test]
    fn test_lut_backend_scaled_activations() {
        let config = EngineConfig {
            threads: 2,
            force_scalar: true,
            activation_scale: 0.5,
            ..EngineConfig::with_backend("lut")
        };
        let mut engine = GemmEngine::with_config(config).unwrap();
        engine.generate_lut(4).unwrap();
        // 0.5 → 1 step, -1.5 → -3 steps, 3.5 → 7 steps, 10.0 clamps to 7 steps
        let c = engine.matmul(&[2, code4(-1)], &[0.5, -1.5, 3.5, 10.0], 1, 2, 2).unwrap();
        assert_eq!(c, vec![(2.0 * 1.0 - 7.0) * 0.5, (2.0 * -3.0 - 7.0) * 0.5]);
    }

    #[test]
    fn test_blas_backend_uses_provider() {
        let engine =
            GemmEngine::with_blas(EngineConfig::with_backend("mkl"), Box::new(LoopBlas)).unwrap();
        assert_eq!(engine.backend(), Backend::Blas);
        let c = engine.matmul(&[1, 15], &[0.5, 2.0, 3.0, 4.0], 1, 2, 2).unwrap();
        assert_eq!(c, vec![-2.5, -2.0]);

        let bad =
            GemmEngine::with_blas(EngineConfig::with_backend("blas"), Box::new(ShortBlas)).unwrap();
        assert!(matches!(
            bad.matmul(&[1, 2], &[1.0, 2.0, 3.0, 4.0], 1, 2, 2),
            Err(GemmError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_matmul_validates_inputs() {
        let engine = lut_engine(1);
        assert!(matches!(
            engine.matmul(&[1, 2, 3], &[1.0; 4], 2, 2, 2),
            Err(GemmError::DimensionMismatch { expected: 4, actual: 3, .. })
        ));
        assert!(matches!(
            engine.matmul(&[1, 2, 3, 4], &[1.0; 3], 2, 2, 2),
            Err(GemmError::DimensionMismatch { expected: 4, actual: 3, .. })
        ));
        assert!(matches!(
            engine.matmul(&[1, 2, 3, 16], &[1.0; 4], 2, 2, 2),
            Err(GemmError::InvalidCode { code: 16, limit: 16 })
        ));
    }

    #[test]
    fn test_overflowing_output_size_rejected() {
        // K = 0 passes the operand length checks for any M and N.
        let n = usize::MAX / 2 + 1;
        for engine in [lut_engine(2), GemmEngine::new("naive").unwrap()] {
            let err = engine.matmul(&[], &[], 2, 0, n).unwrap_err();
            assert!(matches!(err, GemmError::Allocation(_)), "{err:?}");
        }
        // Representable sizes with K = 0 are all zeros.
        assert_eq!(lut_engine(1).matmul(&[], &[], 2, 0, 3).unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_end_to_end_pipeline() {
        let engine = lut_engine(2);
        let c = engine.matmul(&[1, 2, 3, 4], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2).unwrap();
        // Activations quantize with scale 1 and clamp to 7: [[5,6],[7,7]]
        assert_eq!(c, vec![19.0, 20.0, 43.0, 46.0]);
        let c = engine.add_bias(&c, 2, 2, &[1.0, -50.0]).unwrap();
        assert_eq!(c, vec![20.0, -30.0, 44.0, -4.0]);
        let c = engine.apply_activation(&c, 2, 2, Activation::Relu).unwrap();
        assert_eq!(c, vec![20.0, 0.0, 44.0, 0.0]);
    }
}
