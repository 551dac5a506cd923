//! Variational autoencoders, plain and label-conditioned

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

use super::{require_labels, ModelName, ModelSettings, TrainBatch, XaeModel};
use crate::error::{Error, Result};
use crate::networks::{Activation, Mlp};
use crate::training::data::Batch;
use crate::training::loss::{bce_with_logits, kl_penalty, LossTerm, LossTerms, ReductionMethod};
use crate::utils::tensor::{reparameterize, to_unit_interval};

/// VAE / CVAE
///
/// The encoder emits `[mu | logvar]`; the decoder emits logits and
/// [`XaeModel::decode`] squashes them with `tanh` into data range.
pub struct Vae {
    settings: ModelSettings,
    conditional: bool,
    vars: VarMap,
    enc: Mlp,
    dec: Mlp,
}

impl Vae {
    /// Build encoder and decoder
    pub fn new(settings: ModelSettings, device: &Device) -> Result<Self> {
        let conditional = settings.name.is_conditional();
        if conditional && settings.y_dim == 0 {
            return Err(Error::config(format!("{} needs y_dim > 0", settings.name)));
        }
        let net = &settings.network;
        let y_dim = if conditional { settings.y_dim } else { 0 };

        let vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
        let enc = Mlp::new(
            vb.pp("enc"),
            net.x_dim + y_dim,
            &net.hidden()?,
            2 * settings.z_dim,
            net.batch_norm,
            net.activation,
            Activation::Identity,
        )?;
        let dec = Mlp::new(
            vb.pp("dec"),
            settings.z_dim + y_dim,
            &net.decoder_hidden()?,
            net.x_dim,
            net.batch_norm,
            net.activation,
            Activation::Identity,
        )?;

        Ok(Self {
            settings,
            conditional,
            vars,
            enc,
            dec,
        })
    }

    fn mu_and_logvar(&self, x: &Tensor, y: Option<&Tensor>, train: bool) -> Result<(Tensor, Tensor)> {
        let input = match y {
            Some(y) => Tensor::cat(&[x, y], 1)?,
            None => x.clone(),
        };
        let h = self.enc.forward_t(&input, train)?;
        let z_dim = self.settings.z_dim;
        Ok((h.narrow(1, 0, z_dim)?, h.narrow(1, z_dim, z_dim)?))
    }

    fn logits(&self, z: &Tensor, y: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let input = match y {
            Some(y) => Tensor::cat(&[z, y], 1)?,
            None => z.clone(),
        };
        Ok(self.dec.forward_t(&input, train)?)
    }

    fn loss(&self, batch: &Batch, train: bool) -> Result<LossTerms> {
        let y = if self.conditional {
            Some(require_labels(batch, self.settings.name)?)
        } else {
            None
        };
        let (mu, logvar) = self.mu_and_logvar(&batch.x, y, train)?;
        let recon = self.logits(&reparameterize(&mu, &logvar)?, y, train)?;

        // summed BCE on [0, 1] rescaled data, per sample
        let main = (bce_with_logits(
            &to_unit_interval(&recon)?,
            &to_unit_interval(&batch.x)?,
            ReductionMethod::Sum,
        )? / batch.len as f64)?;

        if self.settings.lamb > 0.0 {
            let penalty = kl_penalty(&mu, &logvar)?;
            let objective = (&main + (&penalty * self.settings.lamb)?)?;
            Ok(LossTerms::new(objective)
                .with(LossTerm::Main, &main)?
                .with(LossTerm::Penalty, &penalty)?)
        } else {
            Ok(LossTerms::new(main.clone()).with(LossTerm::Main, &main)?)
        }
    }
}

impl XaeModel for Vae {
    fn name(&self) -> ModelName {
        self.settings.name
    }

    fn main_vars(&self) -> &VarMap {
        &self.vars
    }

    fn penalty_weight(&self) -> f64 {
        self.settings.lamb
    }

    /// KL is analytic, no prior sample needed
    fn prior(&self, _n: usize, _rng: &mut StdRng) -> Result<Option<Tensor>> {
        Ok(None)
    }

    fn training_loss(&self, batch: TrainBatch<'_>, _prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch.single(self.settings.name)?, true)
    }

    fn validation_loss(&self, batch: &Batch, _prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch, false)
    }

    /// Reparameterized latent sample
    fn encode(&self, x: &Tensor, y: Option<&Tensor>) -> Result<Tensor> {
        let y = if self.conditional { y } else { None };
        let (mu, logvar) = self.mu_and_logvar(x, y, false)?;
        Ok(reparameterize(&mu, &logvar)?)
    }

    fn decode(&self, z: &Tensor, y: Option<&Tensor>) -> Result<Tensor> {
        let y = if self.conditional { y } else { None };
        Ok(self.logits(z, y, false)?.tanh()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests_support::{batch, rng, settings};
    use approx::assert_relative_eq;

    #[test]
    fn test_vae_loss_terms() {
        let device = Device::Cpu;
        let model = Vae::new(settings(ModelName::Vae), &device).unwrap();
        let batch = batch(8, false, &device);

        assert!(model.prior(8, &mut rng()).unwrap().is_none());
        let terms = model.training_loss(TrainBatch::Single(&batch), None).unwrap();
        let main = terms.get(LossTerm::Main).unwrap();
        let kl = terms.get(LossTerm::Penalty).unwrap();
        assert!(main > 0.0);
        assert!(kl >= 0.0);
        assert_relative_eq!(terms.objective_value().unwrap(), main + kl, epsilon = 1e-4);
    }

    #[test]
    fn test_decode_stays_in_data_range() {
        let device = Device::Cpu;
        let model = Vae::new(settings(ModelName::Vae), &device).unwrap();
        let z = Tensor::randn(0f32, 5.0, (6, 2), &device).unwrap();
        let x = model.decode(&z, None).unwrap();
        assert_eq!(x.dims(), &[6, 4]);
        let values = x.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_cvae_conditions_on_labels() {
        let device = Device::Cpu;
        let model = Vae::new(settings(ModelName::Cvae), &device).unwrap();
        let labeled = batch(4, true, &device);
        let terms = model.validation_loss(&labeled, None).unwrap();
        assert!(terms.get(LossTerm::Main).unwrap().is_finite());

        let y = labeled.y.as_ref().unwrap();
        let z = model.encode(&labeled.x, Some(y)).unwrap();
        assert_eq!(z.dims(), &[4, 2]);
        assert!(model.validation_loss(&batch(4, false, &device), None).is_err());
    }
}
