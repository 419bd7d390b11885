//! mpgemm: mixed-precision GEMM with an INT4 lookup-table engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod lut;
pub mod matrix;
pub mod pool;
pub mod post;
pub mod quant;

pub use config::EngineConfig;
pub use engine::{Backend, ExternalBlas, GemmEngine};
pub use error::{GemmError, Result};
pub use lut::{Int4Lut, ProductLookupTable};
pub use matrix::{ColMajor, Int4Matrix, Int4Packed, Matrix, Plain, RowMajor};
pub use post::{measure_error, Activation, ErrorStats};

/// Install `env_logger` (filtered by `RUST_LOG`). Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
