//! Reconstruction and classification losses

use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::log_softmax;

use super::ReductionMethod;

/// Mean squared error
pub fn mse_loss(pred: &Tensor, target: &Tensor) -> candle_core::Result<Tensor> {
    (pred - target)?.sqr()?.mean_all()
}

/// Binary cross-entropy on logits
///
/// Uses `max(x, 0) - x * t + log(1 + exp(-|x|))` which never overflows.
pub fn bce_with_logits(
    logits: &Tensor,
    target: &Tensor,
    reduction: ReductionMethod,
) -> candle_core::Result<Tensor> {
    let softplus_neg_abs = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = ((logits.relu()? - (logits * target)?)? + softplus_neg_abs)?;
    reduction.apply(loss)
}

/// Cross-entropy with probability (one-hot) targets
///
/// `-mean_i sum_c w_c * y_ic * log_softmax(logits)_ic`. Weights, when given,
/// have one entry per class.
pub fn cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    weights: Option<&Tensor>,
) -> candle_core::Result<Tensor> {
    let log_probs = log_softmax(logits, D::Minus1)?;
    let mut weighted = (targets * log_probs)?;
    if let Some(w) = weights {
        weighted = weighted.broadcast_mul(&w.unsqueeze(0)?)?;
    }
    weighted.sum(1)?.mean_all()?.neg()
}

/// Class weights `[1, ..., 1, w]` that reweight the last ("unknown") class
pub fn class_weights(
    num_classes: usize,
    unknown_weight: Option<f64>,
    device: &Device,
) -> candle_core::Result<Option<Tensor>> {
    match unknown_weight {
        None => Ok(None),
        Some(w) if num_classes > 0 => {
            let mut values = vec![1.0f32; num_classes];
            values[num_classes - 1] = w as f32;
            Ok(Some(Tensor::from_vec(values, num_classes, device)?.to_dtype(DType::F32)?))
        }
        Some(_) => Ok(None),
    }
}
