//! Kernel statistics: IMQ maximum mean discrepancy and HSIC

use candle_core::{Tensor, D};

use crate::utils::math::ln_gamma;

/// Scales of the inverse multiquadratic kernel mixture
pub const IMQ_SCALES: [f64; 7] = [0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Pairwise squared euclidean distances, `[n_x, n_y]`
pub fn squared_distances(x: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
    let x_sq = x.sqr()?.sum_keepdim(1)?;
    let y_sq = y.sqr()?.sum_keepdim(1)?.t()?;
    let cross = x.matmul(&y.t()?)?;
    // rounding can push the diagonal slightly negative
    x_sq.broadcast_add(&y_sq)?
        .broadcast_sub(&(cross * 2.0)?)?
        .relu()
}

/// Sum of the multi-scale IMQ kernel over all pairs
///
/// Each scale contributes `C / (C + ||x - y||^2)` with `C = 2 * dim * 2 * scale`.
/// With `exclude_diagonal` the `i == j` entries are left out, which only makes
/// sense for `imq_kernel_sum(x, x, ..)`.
pub fn imq_kernel_sum(
    x: &Tensor,
    y: &Tensor,
    dim: usize,
    exclude_diagonal: bool,
) -> candle_core::Result<Tensor> {
    let dist = squared_distances(x, y)?;
    let mask = if exclude_diagonal {
        let n = dist.dim(0)?;
        let eye = Tensor::eye(n, dist.dtype(), dist.device())?;
        Some(eye.ones_like()?.sub(&eye)?)
    } else {
        None
    };

    let mut stat = Tensor::zeros((), dist.dtype(), dist.device())?;
    for scale in IMQ_SCALES {
        let c = scale * 2.0 * dim as f64 * 2.0;
        let mut kernel = (dist.affine(1.0, c)?.recip()? * c)?;
        if let Some(mask) = &mask {
            kernel = (kernel * mask)?;
        }
        stat = (stat + kernel.sum_all()?)?;
    }
    Ok(stat)
}

/// MMD between encoded latents `q` and prior samples `p` (`n` rows each)
pub fn mmd_penalty(q: &Tensor, p: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let n = q.dim(0)?;
    if n < 2 {
        return Err(candle_core::Error::Msg(format!(
            "mmd needs at least 2 samples, got {}",
            n
        )));
    }
    let n = n as f64;
    let within = (imq_kernel_sum(q, q, dim, true)? + imq_kernel_sum(p, p, dim, true)?)?;
    let across = imq_kernel_sum(q, p, dim, false)?;
    within.affine(1.0 / (n * (n - 1.0)), 0.0)? - across.affine(2.0 / (n * n), 0.0)?
}

/// Gaussian kernel bandwidth for `d` dimensional inputs
///
/// `1 / (2 g^2)` with `g = 2 Γ((d + 1) / 2) / Γ(d / 2)`.
pub fn bandwidth(d: usize) -> f64 {
    let d = d as f64;
    let g = 2.0 * (ln_gamma(0.5 * (d + 1.0)) - ln_gamma(0.5 * d)).exp();
    1.0 / (2.0 * g * g)
}

/// Gaussian kernel matrix `exp(-gamma * ||x_i - y_j||^2)`
pub fn gaussian_kernel(x: &Tensor, y: &Tensor, gamma: f64) -> candle_core::Result<Tensor> {
    squared_distances(x, y)?.affine(-gamma, 0.0)?.exp()
}

/// Hilbert-Schmidt independence criterion between the rows of `x` and `y`
pub fn hsic(x: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
    let xx = gaussian_kernel(x, x, bandwidth(x.dim(1)?))?;
    let yy = gaussian_kernel(y, y, bandwidth(y.dim(1)?))?;

    let joint = (&xx * &yy)?.mean_all()?;
    let marginals = (xx.mean_all()? * yy.mean_all()?)?;
    let cross = (xx.mean(D::Minus1)? * yy.mean(D::Minus1)?)?.mean_all()?;

    ((joint + marginals)? - (cross * 2.0)?)?
        .maximum(1e-16)?
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device};

    fn value(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_squared_distances() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[0.0f32, 0.0], [3.0, 4.0]], &device).unwrap();
        let d = squared_distances(&x, &x).unwrap().to_vec2::<f32>().unwrap();
        assert_relative_eq!(d[0][1], 25.0, epsilon = 1e-4);
        assert_relative_eq!(d[1][0], 25.0, epsilon = 1e-4);
        assert_relative_eq!(d[0][0], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_kernel_of_identical_points() {
        let device = Device::Cpu;
        let x = Tensor::zeros((3, 2), DType::F32, &device).unwrap();
        // every entry is 1 per scale
        let full = imq_kernel_sum(&x, &x, 2, false).unwrap();
        let off = imq_kernel_sum(&x, &x, 2, true).unwrap();
        assert_relative_eq!(value(&full), 9.0 * 7.0, epsilon = 1e-4);
        assert_relative_eq!(value(&off), 6.0 * 7.0, epsilon = 1e-4);
    }

    #[test]
    fn test_mmd_identical_samples_is_near_zero_or_negative() {
        let device = Device::Cpu;
        let q = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0], [-1.0, 0.5], [0.2, -0.3]], &device)
            .unwrap();
        let mmd = value(&mmd_penalty(&q, &q, 2).unwrap());
        // unbiased within-terms exclude the diagonal, the cross term does not
        assert!(mmd <= 0.0);
    }

    #[test]
    fn test_mmd_detects_shift() {
        let device = Device::Cpu;
        let p = Tensor::new(&[[0.0f32, 0.0], [0.1, -0.1], [-0.1, 0.1], [0.05, 0.0]], &device)
            .unwrap();
        let q = (&p + 5.0).unwrap();
        assert!(value(&mmd_penalty(&q, &p, 2).unwrap()) > 0.0);
    }

    #[test]
    fn test_mmd_needs_two_samples() {
        let x = Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(mmd_penalty(&x, &x, 2).is_err());
    }

    #[test]
    fn test_bandwidth_one_dimension() {
        // g = 2 Γ(1) / Γ(1/2) = 2 / sqrt(pi)
        let g = 2.0 / std::f64::consts::PI.sqrt();
        assert_relative_eq!(bandwidth(1), 1.0 / (2.0 * g * g), epsilon = 1e-10);
    }

    #[test]
    fn test_hsic_of_constant_is_floor() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[1.0f32], [2.0], [3.0], [4.0]], &device).unwrap();
        let c = Tensor::ones((4, 2), DType::F32, &device).unwrap();
        let h = value(&hsic(&x, &c).unwrap());
        assert!(h < 1e-3);
    }

    #[test]
    fn test_hsic_dependent_exceeds_independent() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[-2.0f32], [-1.0], [0.0], [1.0], [2.0], [3.0]], &device).unwrap();
        let y_dep = (&x * 2.0).unwrap();
        let y_ind = Tensor::new(&[[0.5f32], [0.5], [0.5], [0.5], [0.5], [0.5]], &device).unwrap();
        let dep = value(&hsic(&x, &y_dep).unwrap());
        let ind = value(&hsic(&x, &y_ind).unwrap());
        assert!(dep > ind);
    }
}
