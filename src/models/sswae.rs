//! Semi-supervised Wasserstein autoencoders
//!
//! The latent code is `[label part (yz_dim) | style part (z_dim)]`. The style
//! part always comes from `enc(x)`. The label part comes from an embedding of
//! the known label (`enc_c(y[:, :-1])`, labeled batches) or from a second
//! image encoder (`enc2(x)`, unlabeled batches and validation). A linear head
//! `dec_c` classifies the label part; the last class is "unknown".

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

use super::{
    require_labels, require_prior, DataRegime, ModelName, ModelSettings, TrainBatch, XaeModel,
};
use crate::error::{Error, Result};
use crate::networks::{Activation, Mlp};
use crate::training::data::Batch;
use crate::training::loss::{
    class_weights, cross_entropy, gan_discriminator_loss, gan_generator_penalty, hsic,
    mmd_penalty, mse_loss, LossTerm, LossTerms,
};

/// Disentanglement penalty of a semi-supervised WAE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemiSupervisedPenalty {
    /// λ·MMD over the whole latent
    Mmd,
    /// λ·GAN over the whole latent
    Gan,
    /// λ·GAN(style) + λ_mmd·MMD(label) + λ_hsic·HSIC(label, style)
    Hsic,
}

/// SSWAE-MMD / SSWAE-GAN / SSWAE-HSIC
pub struct Sswae {
    settings: ModelSettings,
    penalty: SemiSupervisedPenalty,
    device: Device,
    vars: VarMap,
    disc_vars: Option<VarMap>,
    enc: Mlp,
    enc2: Mlp,
    enc_c: Mlp,
    dec: Mlp,
    dec_c: Mlp,
    disc: Option<Mlp>,
    weights: Option<Tensor>,
}

/// Forward results of one batch part
struct Part {
    latent: Tensor,
    recon: Tensor,
    ce: Tensor,
}

impl Sswae {
    /// Build all encoders, decoders and (GAN, HSIC) the discriminator
    pub fn new(
        settings: ModelSettings,
        penalty: SemiSupervisedPenalty,
        device: &Device,
    ) -> Result<Self> {
        if settings.y_dim < 2 {
            return Err(Error::config(format!(
                "{} needs y_dim >= 2 (known classes plus unknown)",
                settings.name
            )));
        }
        if settings.yz_dim == 0 {
            return Err(Error::config(format!("{} needs yz_dim > 0", settings.name)));
        }
        let net = &settings.network;
        let (z_dim, yz_dim, y_dim) = (settings.z_dim, settings.yz_dim, settings.y_dim);

        let vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
        let hidden = net.hidden()?;
        let enc = Mlp::new(
            vb.pp("enc"),
            net.x_dim,
            &hidden,
            z_dim,
            net.batch_norm,
            net.activation,
            Activation::Identity,
        )?;
        let enc2 = Mlp::new(
            vb.pp("enc2"),
            net.x_dim,
            &hidden,
            yz_dim,
            net.batch_norm,
            net.activation,
            Activation::Identity,
        )?;
        let enc_c = Mlp::new(
            vb.pp("enc_c"),
            y_dim - 1,
            &[],
            yz_dim,
            false,
            Activation::Identity,
            Activation::Identity,
        )?;
        let dec = Mlp::new(
            vb.pp("dec"),
            yz_dim + z_dim,
            &net.decoder_hidden()?,
            net.x_dim,
            net.batch_norm,
            net.activation,
            net.output_activation,
        )?;
        let dec_c = Mlp::new(
            vb.pp("dec_c"),
            yz_dim,
            &[],
            y_dim,
            false,
            Activation::Identity,
            Activation::Identity,
        )?;

        let disc_input = match penalty {
            SemiSupervisedPenalty::Mmd => None,
            SemiSupervisedPenalty::Gan => Some(yz_dim + z_dim),
            SemiSupervisedPenalty::Hsic => Some(z_dim),
        };
        let (disc_vars, disc) = match disc_input {
            None => (None, None),
            Some(in_dim) => {
                let disc_vars = VarMap::new();
                let vb = VarBuilder::from_varmap(&disc_vars, DType::F32, device);
                let disc =
                    Mlp::discriminator(vb.pp("disc"), in_dim, net.disc_hidden, net.disc_layers)?;
                (Some(disc_vars), Some(disc))
            }
        };
        let weights = class_weights(y_dim, settings.classification_weight, device)?;

        Ok(Self {
            settings,
            penalty,
            device: device.clone(),
            vars,
            disc_vars,
            enc,
            enc2,
            enc_c,
            dec,
            dec_c,
            disc,
            weights,
        })
    }

    /// Latent of a labeled batch: `cat(enc_c(y[:, :-1]), enc(x))`
    fn encode_labeled(&self, x: &Tensor, y: &Tensor, train: bool) -> Result<Tensor> {
        let known = y.narrow(1, 0, self.settings.y_dim - 1)?;
        let label = self.enc_c.forward_t(&known, train)?;
        let style = self.enc.forward_t(x, train)?;
        Ok(Tensor::cat(&[&label, &style], 1)?)
    }

    /// Latent without labels: `cat(enc2(x), enc(x))`
    fn encode_unlabeled(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let label = self.enc2.forward_t(x, train)?;
        let style = self.enc.forward_t(x, train)?;
        Ok(Tensor::cat(&[&label, &style], 1)?)
    }

    fn label_part(&self, latent: &Tensor) -> Result<Tensor> {
        Ok(latent.narrow(1, 0, self.settings.yz_dim)?)
    }

    fn style_part(&self, latent: &Tensor) -> Result<Tensor> {
        Ok(latent.narrow(1, self.settings.yz_dim, self.settings.z_dim)?)
    }

    fn forward_part(&self, batch: &Batch, labeled: bool, train: bool) -> Result<Part> {
        let y = require_labels(batch, self.settings.name)?;
        let latent = if labeled {
            self.encode_labeled(&batch.x, y, train)?
        } else {
            self.encode_unlabeled(&batch.x, train)?
        };
        let recon = mse_loss(&self.dec.forward_t(&latent, train)?, &batch.x)?;
        let logits = self.dec_c.forward_t(&self.label_part(&latent)?, train)?;
        let ce = cross_entropy(&logits, y, self.weights.as_ref())?;
        Ok(Part { latent, recon, ce })
    }

    fn discriminator(&self) -> Result<&Mlp> {
        self.disc
            .as_ref()
            .ok_or_else(|| Error::internal("discriminator missing"))
    }

    /// Weighted penalty sum and the unweighted terms
    fn penalties(
        &self,
        latent: &Tensor,
        prior: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Vec<(LossTerm, Tensor)>)> {
        let s = &self.settings;
        match self.penalty {
            SemiSupervisedPenalty::Mmd => {
                let mmd = mmd_penalty(latent, prior, s.z_dim + s.yz_dim)?;
                Ok(((&mmd * s.lamb)?, vec![(LossTerm::Penalty, mmd)]))
            }
            SemiSupervisedPenalty::Gan => {
                let gan = gan_generator_penalty(&self.discriminator()?.forward_t(latent, train)?)?;
                Ok(((&gan * s.lamb)?, vec![(LossTerm::Penalty, gan)]))
            }
            SemiSupervisedPenalty::Hsic => {
                let label = self.label_part(latent)?;
                let style = self.style_part(latent)?;
                let gan = gan_generator_penalty(&self.discriminator()?.forward_t(&style, train)?)?;
                let mmd = mmd_penalty(&label, &self.label_part(prior)?, s.z_dim)?;
                let dependence = hsic(&label, &style)?;
                let weighted = (((&gan * s.lamb)? + (&mmd * s.lambda_mmd)?)?
                    + (&dependence * s.lambda_hsic)?)?;
                Ok((
                    weighted,
                    vec![
                        (LossTerm::Penalty, gan),
                        (LossTerm::Penalty2, mmd),
                        (LossTerm::Penalty3, dependence),
                    ],
                ))
            }
        }
    }

    fn record(mut terms: LossTerms, penalties: &[(LossTerm, Tensor)]) -> Result<LossTerms> {
        for (term, value) in penalties {
            terms = terms.with(*term, value)?;
        }
        Ok(terms)
    }
}

impl XaeModel for Sswae {
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

    fn data_regime(&self) -> DataRegime {
        DataRegime::Paired
    }

    fn prior(&self, n: usize, rng: &mut StdRng) -> Result<Option<Tensor>> {
        if self.settings.lamb <= 0.0 {
            return Ok(None);
        }
        let dim = self.settings.yz_dim + self.settings.z_dim;
        let z = self.settings.z_sampler.sample(n, dim, rng, &self.device)?;
        Ok(Some(z))
    }

    fn adversary_loss(&self, batch: TrainBatch<'_>, prior: Option<&Tensor>) -> Result<Option<Tensor>> {
        if self.penalty == SemiSupervisedPenalty::Mmd || self.settings.lamb <= 0.0 {
            return Ok(None);
        }
        let (labeled, unlabeled) = batch.paired(self.settings.name)?;
        let prior = require_prior(prior, self.settings.name)?;
        let disc = self.discriminator()?;

        let y = require_labels(labeled, self.settings.name)?;
        let latent = Tensor::cat(
            &[
                &self.encode_labeled(&labeled.x, y, true)?,
                &self.encode_unlabeled(&unlabeled.x, true)?,
            ],
            0,
        )?
        .detach();

        let (real, fake) = match self.penalty {
            SemiSupervisedPenalty::Hsic => (self.style_part(prior)?, self.style_part(&latent)?),
            _ => (prior.clone(), latent),
        };
        let loss = gan_discriminator_loss(&disc.forward_t(&real, true)?, &disc.forward_t(&fake, true)?)?;
        Ok(Some((loss * self.settings.lamb)?))
    }

    fn training_loss(&self, batch: TrainBatch<'_>, prior: Option<&Tensor>) -> Result<LossTerms> {
        let (labeled, unlabeled) = batch.paired(self.settings.name)?;
        let lamb2 = self.settings.lamb2;

        let first = self.forward_part(labeled, true, true)?;
        let second = self.forward_part(unlabeled, false, true)?;

        let total = (labeled.len + unlabeled.len) as f64;
        let w1 = labeled.len as f64 / total;
        let w2 = unlabeled.len as f64 / total;

        let loss1 = (&first.recon + (&first.ce * lamb2)?)?;
        let loss2 = (&second.recon + (&second.ce * lamb2)?)?;
        let mut objective = ((loss1 * w1)? + (loss2 * w2)?)?;

        let main = ((&first.recon * w1)? + (&second.recon * w2)?)?;
        let main2 = ((&first.ce * w1)? + (&second.ce * w2)?)?;

        let mut penalties = Vec::new();
        if self.settings.lamb > 0.0 {
            let prior = require_prior(prior, self.settings.name)?;
            let latent = Tensor::cat(&[&first.latent, &second.latent], 0)?;
            let (weighted, terms) = self.penalties(&latent, prior, true)?;
            objective = (objective + weighted)?;
            penalties = terms;
        }

        let terms = LossTerms::new(objective)
            .with(LossTerm::Main, &main)?
            .with(LossTerm::Main2, &main2)?;
        Self::record(terms, &penalties)
    }

    /// Validation encodes without labels, as for unseen data
    fn validation_loss(&self, batch: &Batch, prior: Option<&Tensor>) -> Result<LossTerms> {
        let part = self.forward_part(batch, false, false)?;
        let mut objective = part.recon.clone();

        let mut penalties = Vec::new();
        if self.settings.lamb > 0.0 {
            let prior = require_prior(prior, self.settings.name)?;
            let (weighted, terms) = self.penalties(&part.latent, prior, false)?;
            objective = (objective + weighted)?;
            penalties = terms;
        }

        let terms = LossTerms::new(objective)
            .with(LossTerm::Main, &part.recon)?
            .with(LossTerm::Main2, &part.ce)?;
        Self::record(terms, &penalties)
    }

    /// Labeled encoder when `y` is given, image-only encoder otherwise
    fn encode(&self, x: &Tensor, y: Option<&Tensor>) -> Result<Tensor> {
        match y {
            Some(y) => self.encode_labeled(x, y, false),
            None => self.encode_unlabeled(x, false),
        }
    }

    fn decode(&self, z: &Tensor, _y: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.dec.forward_t(z, false)?)
    }
}
