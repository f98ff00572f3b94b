//! Kernel trait definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or running a kernel
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("cannot open library '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("cannot resolve symbol '{symbol}': {reason}")]
    Symbol { symbol: String, reason: String },

    #[error("matrix {rows}x{cols} is outside the routine's index range")]
    TooLarge { rows: usize, cols: usize },

    #[error("kernel failed: {0}")]
    Failed(String),
}

/// Result of running a kernel over a matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelOutput {
    /// Routine specific return code (0 on success for LAPACK routines)
    pub info: i32,
    /// Auxiliary output, e.g. the Householder scalars of a QR factorization
    pub values: Vec<f64>,
}

/// Numeric routine run in place against a Float64 matrix slot
///
/// `data` is the slot buffer in row-major order with `rows * cols`
/// elements. Implementations must not retain it past the call.
pub trait Kernel: Send + Sync {
    /// Human readable routine name, used in logs
    fn name(&self) -> &str;

    fn execute(&self, rows: usize, cols: usize, data: &mut [f64]) -> Result<KernelOutput, KernelError>;
}
