//! Utility functions and types for the XAE system

use std::fs;
use std::path::Path;

use candle_core::Tensor;

use crate::error::Result;

/// Weighted running mean of per-batch values
///
/// Each appended value is weighted by the number of samples it was averaged over,
/// so the epoch average is exact even when the last batch is short.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncrementalAverage {
    sum: f64,
    count: usize,
}

impl IncrementalAverage {
    /// Create an empty average
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` measured on `n` samples
    pub fn append(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.count += n;
    }

    /// Current average, 0 when nothing has been appended
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Number of samples seen
    pub fn count(&self) -> usize {
        self.count
    }

    /// Clear the accumulator
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Tensor helpers shared by the models
pub mod tensor {
    use super::*;

    /// `mu + exp(0.5 * logvar) * eps` with `eps ~ N(0, 1)`
    pub fn reparameterize(mu: &Tensor, logvar: &Tensor) -> candle_core::Result<Tensor> {
        let std = (logvar * 0.5)?.exp()?;
        let eps = std.randn_like(0.0, 1.0)?;
        mu + std * eps
    }

    /// Map values from [-1, 1] to [0, 1]
    pub fn to_unit_interval(x: &Tensor) -> candle_core::Result<Tensor> {
        x.affine(0.5, 0.5)
    }

    /// Scalar value of a rank-0 (or single element) tensor
    pub fn scalar(x: &Tensor) -> candle_core::Result<f64> {
        x.flatten_all()?
            .to_dtype(candle_core::DType::F64)?
            .get(0)?
            .to_scalar::<f64>()
    }
}

/// Mathematical utilities
pub mod math {
    const LANCZOS_G: f64 = 7.0;
    const LANCZOS_COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    /// Natural log of the gamma function (Lanczos approximation)
    pub fn ln_gamma(x: f64) -> f64 {
        if x < 0.5 {
            // reflection
            let pi = std::f64::consts::PI;
            (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x)
        } else {
            let x = x - 1.0;
            let mut a = LANCZOS_COEFFS[0];
            for (i, c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
                a += c / (x + i as f64);
            }
            let t = x + LANCZOS_G + 0.5;
            0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
        }
    }
}

/// File I/O utilities
pub mod io {
    use super::*;

    /// Ensure directory exists
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Ensure the parent directory of a file exists
    pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        match path.as_ref().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
            _ => Ok(()),
        }
    }

    /// Safe file write with atomic operation
    pub fn write_file_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let temp_path = path.with_extension("tmp");

        fs::write(&temp_path, content)?;
        fs::rename(temp_path, path)?;

        Ok(())
    }
}
