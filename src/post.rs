//! Post-processing over row-major M×N f32 outputs, plus accuracy helpers.

use crate::error::{GemmError, Result};
use std::fmt;
use std::str::FromStr;

/// Element-wise activation applied after the GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}

impl FromStr for Activation {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" | "identity" | "none" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            other => Err(GemmError::Configuration(format!("unknown activation '{other}'"))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        };
        f.write_str(name)
    }
}

fn check_output(c: &[f32], m: usize, n: usize) -> Result<()> {
    let expected = m
        .checked_mul(n)
        .ok_or_else(|| GemmError::dims("output (M×N)", usize::MAX, c.len()))?;
    if c.len() != expected {
        return Err(GemmError::dims("output (M×N)", expected, c.len()));
    }
    Ok(())
}

/// Add `bias[j]` to every element of column `j`.
pub fn add_bias(c: &[f32], m: usize, n: usize, bias: &[f32]) -> Result<Vec<f32>> {
    check_output(c, m, n)?;
    if bias.len() != n {
        return Err(GemmError::dims("bias", n, bias.len()));
    }
    let mut out = c.to_vec();
    if n > 0 {
        for row in out.chunks_exact_mut(n) {
            for (x, &b) in row.iter_mut().zip(bias) {
                *x += b;
            }
        }
    }
    Ok(out)
}

pub fn apply_activation(c: &[f32], m: usize, n: usize, act: Activation) -> Result<Vec<f32>> {
    check_output(c, m, n)?;
    Ok(c.iter().map(|&x| act.apply(x)).collect())
}

/// Error statistics between a reference and an approximation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub mse: f64,
    pub max_error: f64,
}

/// Mean squared error and max absolute error; both zero for empty input.
pub fn measure_error(reference: &[f32], approx: &[f32]) -> Result<ErrorStats> {
    if reference.len() != approx.len() {
        return Err(GemmError::dims("error measurement", reference.len(), approx.len()));
    }
    if reference.is_empty() {
        return Ok(ErrorStats { mse: 0.0, max_error: 0.0 });
    }
    let mut sq = 0.0f64;
    let mut max_error = 0.0f64;
    for (&r, &a) in reference.iter().zip(approx) {
        let d = (r as f64 - a as f64).abs();
        sq += d * d;
        max_error = max_error.max(d);
    }
    Ok(ErrorStats {
        mse: sq / reference.len() as f64,
        max_error,
    })
}
