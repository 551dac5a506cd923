//! Wasserstein autoencoders, plain and label-conditioned
//!
//! The latent penalty is either the IMQ MMD statistic against a prior sample
//! or the generator side of a latent GAN. Conditional variants feed
//! `cat(x, y)` to the encoder and `cat(z, y)` to the decoder; the penalty only
//! sees `z`.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

use super::{require_labels, require_prior, ModelName, ModelSettings, TrainBatch, XaeModel};
use crate::error::{Error, Result};
use crate::networks::{Activation, Mlp};
use crate::training::data::Batch;
use crate::training::loss::{
    gan_discriminator_loss, gan_generator_penalty, mmd_penalty, mse_loss, LossTerm, LossTerms,
};

/// Latent penalty of a WAE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaePenalty {
    /// IMQ maximum mean discrepancy
    Mmd,
    /// Latent discriminator
    Gan,
}

/// WAE-MMD / WAE-GAN and their conditional versions
pub struct Wae {
    settings: ModelSettings,
    penalty: WaePenalty,
    conditional: bool,
    device: Device,
    vars: VarMap,
    disc_vars: Option<VarMap>,
    enc: Mlp,
    dec: Mlp,
    disc: Option<Mlp>,
}

impl Wae {
    /// Build encoder, decoder and (for GAN) discriminator
    pub fn new(settings: ModelSettings, penalty: WaePenalty, device: &Device) -> Result<Self> {
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
            settings.z_dim,
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
            net.output_activation,
        )?;

        let (disc_vars, disc) = match penalty {
            WaePenalty::Mmd => (None, None),
            WaePenalty::Gan => {
                let disc_vars = VarMap::new();
                let vb = VarBuilder::from_varmap(&disc_vars, DType::F32, device);
                let disc = Mlp::discriminator(
                    vb.pp("disc"),
                    settings.z_dim,
                    net.disc_hidden,
                    net.disc_layers,
                )?;
                (Some(disc_vars), Some(disc))
            }
        };

        Ok(Self {
            settings,
            penalty,
            conditional,
            device: device.clone(),
            vars,
            disc_vars,
            enc,
            dec,
            disc,
        })
    }

    fn condition<'a>(&self, batch: &'a Batch) -> Result<Option<&'a Tensor>> {
        if self.conditional {
            Ok(Some(require_labels(batch, self.settings.name)?))
        } else {
            Ok(None)
        }
    }

    fn encode_t(&self, x: &Tensor, y: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let input = match y {
            Some(y) => Tensor::cat(&[x, y], 1)?,
            None => x.clone(),
        };
        Ok(self.enc.forward_t(&input, train)?)
    }

    fn decode_t(&self, z: &Tensor, y: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let input = match y {
            Some(y) => Tensor::cat(&[z, y], 1)?,
            None => z.clone(),
        };
        Ok(self.dec.forward_t(&input, train)?)
    }

    fn discriminator(&self) -> Result<&Mlp> {
        self.disc
            .as_ref()
            .ok_or_else(|| Error::internal("discriminator missing"))
    }

    fn penalty(&self, z: &Tensor, prior: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let value = match self.penalty {
            WaePenalty::Mmd => {
                let prior = require_prior(prior, self.settings.name)?;
                mmd_penalty(z, prior, self.settings.z_dim)?
            }
            WaePenalty::Gan => gan_generator_penalty(&self.discriminator()?.forward_t(z, train)?)?,
        };
        Ok(value)
    }

    fn loss(&self, batch: &Batch, prior: Option<&Tensor>, train: bool) -> Result<LossTerms> {
        let y = self.condition(batch)?;
        let z = self.encode_t(&batch.x, y, train)?;
        let recon = self.decode_t(&z, y, train)?;
        let main = mse_loss(&recon, &batch.x)?;

        if self.settings.lamb > 0.0 {
            let penalty = self.penalty(&z, prior, train)?;
            let objective = (&main + (&penalty * self.settings.lamb)?)?;
            Ok(LossTerms::new(objective)
                .with(LossTerm::Main, &main)?
                .with(LossTerm::Penalty, &penalty)?)
        } else {
            Ok(LossTerms::new(main.clone()).with(LossTerm::Main, &main)?)
        }
    }
}

impl XaeModel for Wae {
    fn name(&self) -> ModelName {
        self.settings.name
    }

    fn main_vars(&self) -> &VarMap {
        &self.vars
    }

    fn adversary_vars(&self) -> Option<&VarMap> {
        self.disc_vars.as_ref()
    }

    fn penalty_weight(&self) -> f64 {
        self.settings.lamb
    }

    fn prior(&self, n: usize, rng: &mut StdRng) -> Result<Option<Tensor>> {
        if self.settings.lamb <= 0.0 {
            return Ok(None);
        }
        let z = self
            .settings
            .z_sampler
            .sample(n, self.settings.z_dim, rng, &self.device)?;
        Ok(Some(z))
    }

    fn adversary_loss(&self, batch: TrainBatch<'_>, prior: Option<&Tensor>) -> Result<Option<Tensor>> {
        if self.penalty != WaePenalty::Gan || self.settings.lamb <= 0.0 {
            return Ok(None);
        }
        let batch = batch.single(self.settings.name)?;
        let prior = require_prior(prior, self.settings.name)?;
        let disc = self.discriminator()?;

        let z = self
            .encode_t(&batch.x, self.condition(batch)?, true)?
            .detach();
        let loss = gan_discriminator_loss(&disc.forward_t(prior, true)?, &disc.forward_t(&z, true)?)?;
        Ok(Some((loss * self.settings.lamb)?))
    }

    fn training_loss(&self, batch: TrainBatch<'_>, prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch.single(self.settings.name)?, prior, true)
    }

    fn validation_loss(&self, batch: &Batch, prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch, prior, false)
    }

    fn encode(&self, x: &Tensor, y: Option<&Tensor>) -> Result<Tensor> {
        self.encode_t(x, if self.conditional { y } else { None }, false)
    }

    fn decode(&self, z: &Tensor, y: Option<&Tensor>) -> Result<Tensor> {
        self.decode_t(z, if self.conditional { y } else { None }, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests_support::{batch, rng, settings};
    use approx::assert_relative_eq;

    #[test]
    fn test_wae_mmd_objective_combines_terms() {
        let device = Device::Cpu;
        let model = Wae::new(settings(ModelName::WaeMmd), WaePenalty::Mmd, &device).unwrap();
        let batch = batch(8, false, &device);
        let prior = model.prior(8, &mut rng()).unwrap().unwrap();
        assert_eq!(prior.dims(), &[8, 2]);

        let terms = model
            .training_loss(TrainBatch::Single(&batch), Some(&prior))
            .unwrap();
        let main = terms.get(LossTerm::Main).unwrap();
        let penalty = terms.get(LossTerm::Penalty).unwrap();
        assert_relative_eq!(
            terms.objective_value().unwrap(),
            main + penalty,
            epsilon = 1e-5
        );
        assert!(model.adversary_vars().is_none());
        assert!(model
            .adversary_loss(TrainBatch::Single(&batch), Some(&prior))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_zero_lambda_skips_penalty() {
        let device = Device::Cpu;
        let mut s = settings(ModelName::WaeMmd);
        s.lamb = 0.0;
        let model = Wae::new(s, WaePenalty::Mmd, &device).unwrap();
        let batch = batch(4, false, &device);

        assert!(model.prior(4, &mut rng()).unwrap().is_none());
        let terms = model.validation_loss(&batch, None).unwrap();
        assert!(terms.get(LossTerm::Penalty).is_none());
    }

    #[test]
    fn test_wae_gan_has_discriminator_step() {
        let device = Device::Cpu;
        let model = Wae::new(settings(ModelName::WaeGan), WaePenalty::Gan, &device).unwrap();
        let batch = batch(6, false, &device);
        let prior = model.prior(6, &mut rng()).unwrap().unwrap();

        assert!(model.adversary_vars().is_some());
        let adv = model
            .adversary_loss(TrainBatch::Single(&batch), Some(&prior))
            .unwrap()
            .unwrap();
        assert!(adv.to_scalar::<f32>().unwrap() > 0.0);

        let terms = model
            .training_loss(TrainBatch::Single(&batch), Some(&prior))
            .unwrap();
        assert!(terms.get(LossTerm::Penalty).is_some());
    }

    #[test]
    fn test_conditional_wae_uses_labels() {
        let device = Device::Cpu;
        let model = Wae::new(settings(ModelName::CwaeMmd), WaePenalty::Mmd, &device).unwrap();
        let labeled = batch(5, true, &device);
        let prior = model.prior(5, &mut rng()).unwrap().unwrap();

        assert!(model
            .training_loss(TrainBatch::Single(&labeled), Some(&prior))
            .is_ok());
        let unlabeled = batch(5, false, &device);
        assert!(model
            .training_loss(TrainBatch::Single(&unlabeled), Some(&prior))
            .is_err());

        let y = labeled.y.as_ref().unwrap();
        let z = model.encode(&labeled.x, Some(y)).unwrap();
        assert_eq!(z.dims(), &[5, 2]);
        let x_hat = model.decode(&z, Some(y)).unwrap();
        assert_eq!(x_hat.dims(), &[5, 4]);
    }
}
