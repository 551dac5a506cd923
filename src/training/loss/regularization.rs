//! Latent regularizers: KL divergence and GAN penalties

use candle_core::Tensor;

use super::reconstruction::bce_with_logits;
use super::ReductionMethod;

/// KL divergence of `N(mu, exp(logvar))` from `N(0, I)`, averaged over the batch
pub fn kl_penalty(mu: &Tensor, logvar: &Tensor) -> candle_core::Result<Tensor> {
    let inner = ((logvar.affine(1.0, 1.0)? - mu.sqr()?)? - logvar.exp()?)?;
    (inner.sum(1)? * -0.5)?.mean_all()
}

/// Generator side GAN penalty: `BCE(D(q), 1)`
pub fn gan_generator_penalty(d_q: &Tensor) -> candle_core::Result<Tensor> {
    bce_with_logits(d_q, &d_q.ones_like()?, ReductionMethod::Mean)
}

/// Discriminator loss: `BCE(D(p), 1) + BCE(D(q), 0)`
pub fn gan_discriminator_loss(d_p: &Tensor, d_q: &Tensor) -> candle_core::Result<Tensor> {
    let real = bce_with_logits(d_p, &d_p.ones_like()?, ReductionMethod::Mean)?;
    let fake = bce_with_logits(d_q, &d_q.zeros_like()?, ReductionMethod::Mean)?;
    real + fake
}
