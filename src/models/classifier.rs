//! Classifier baseline trained through the shared loop

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

use super::{require_labels, ModelName, ModelSettings, TrainBatch, XaeModel};
use crate::error::{Error, Result};
use crate::networks::{Activation, Mlp};
use crate::training::data::Batch;
use crate::training::loss::{class_weights, cross_entropy, LossTerm, LossTerms};

/// `decode(encode(x))` produces class logits
pub struct Classifier {
    settings: ModelSettings,
    vars: VarMap,
    enc: Mlp,
    dec: Mlp,
    weights: Option<Tensor>,
}

impl Classifier {
    /// Build encoder (`x -> z`) and linear head (`z -> y`)
    pub fn new(settings: ModelSettings, device: &Device) -> Result<Self> {
        if settings.y_dim == 0 {
            return Err(Error::config("classifier needs y_dim > 0"));
        }
        let net = &settings.network;
        let vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars, DType::F32, device);

        let enc = Mlp::new(
            vb.pp("enc"),
            net.x_dim,
            &net.hidden()?,
            settings.z_dim,
            net.batch_norm,
            net.activation,
            net.activation,
        )?;
        let dec = Mlp::new(
            vb.pp("dec"),
            settings.z_dim,
            &[],
            settings.y_dim,
            false,
            Activation::Identity,
            Activation::Identity,
        )?;
        let weights = class_weights(settings.y_dim, settings.classification_weight, device)?;

        Ok(Self {
            settings,
            vars,
            enc,
            dec,
            weights,
        })
    }

    fn loss(&self, batch: &Batch, train: bool) -> Result<LossTerms> {
        let y = require_labels(batch, ModelName::Classifier)?;
        let logits = self
            .dec
            .forward_t(&self.enc.forward_t(&batch.x, train)?, train)?;
        let main = cross_entropy(&logits, y, self.weights.as_ref())?;
        Ok(LossTerms::new(main.clone()).with(LossTerm::Main, &main)?)
    }
}

impl XaeModel for Classifier {
    fn name(&self) -> ModelName {
        ModelName::Classifier
    }

    fn main_vars(&self) -> &VarMap {
        &self.vars
    }

    fn penalty_weight(&self) -> f64 {
        0.0
    }

    fn prior(&self, _n: usize, _rng: &mut StdRng) -> Result<Option<Tensor>> {
        Ok(None)
    }

    fn training_loss(&self, batch: TrainBatch<'_>, _prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch.single(self.settings.name)?, true)
    }

    fn validation_loss(&self, batch: &Batch, _prior: Option<&Tensor>) -> Result<LossTerms> {
        self.loss(batch, false)
    }

    fn encode(&self, x: &Tensor, _y: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.enc.forward_t(x, false)?)
    }

    /// Class logits
    fn decode(&self, z: &Tensor, _y: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.dec.forward_t(z, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests_support::{batch, rng, settings};

    #[test]
    fn test_classifier_reports_cross_entropy() {
        let device = Device::Cpu;
        let model = Classifier::new(settings(ModelName::Classifier), &device).unwrap();
        let batch = batch(6, true, &device);

        let terms = model.training_loss(TrainBatch::Single(&batch), None).unwrap();
        let main = terms.get(LossTerm::Main).unwrap();
        assert!(main.is_finite() && main > 0.0);
        assert_eq!(terms.get(LossTerm::Penalty), None);
        assert!(model.prior(4, &mut rng()).unwrap().is_none());
        assert!(model.adversary_vars().is_none());
    }

    #[test]
    fn test_classifier_needs_labels() {
        let device = Device::Cpu;
        let model = Classifier::new(settings(ModelName::Classifier), &device).unwrap();
        let batch = batch(4, false, &device);
        assert!(model.validation_loss(&batch, None).is_err());
    }

    #[test]
    fn test_decode_returns_logits_per_class() {
        let device = Device::Cpu;
        let s = settings(ModelName::Classifier);
        let model = Classifier::new(s.clone(), &device).unwrap();
        let batch = batch(3, true, &device);
        let z = model.encode(&batch.x, None).unwrap();
        assert_eq!(z.dims(), &[3, s.z_dim]);
        assert_eq!(model.decode(&z, None).unwrap().dims(), &[3, s.y_dim]);
    }
}
