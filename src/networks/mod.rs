//! Fully connected building blocks for encoders, decoders and discriminators

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::config::parse_class_list;
use crate::error::{Error, Result};

/// Element-wise activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// max(x, 0)
    #[default]
    Relu,
    /// Leaky ReLU with slope 0.2
    #[serde(alias = "leaky_relu")]
    LeakyRelu,
    /// tanh
    Tanh,
    /// logistic sigmoid
    Sigmoid,
    /// no-op
    Identity,
}

impl Activation {
    /// Apply to a tensor
    pub fn apply(self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Relu => x.relu(),
            Activation::LeakyRelu => candle_nn::ops::leaky_relu(x, 0.2),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(x),
            Activation::Identity => Ok(x.clone()),
        }
    }
}

/// `[network]` section: shapes shared by all MLP models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Input feature width
    #[serde(default = "default_x_dim")]
    pub x_dim: usize,
    /// Comma separated hidden widths of encoders and decoders
    #[serde(default = "default_hidden_dims")]
    pub hidden_dims: String,
    /// BatchNorm after every hidden layer
    #[serde(default = "default_true")]
    pub batch_norm: bool,
    /// Hidden activation
    #[serde(default)]
    pub activation: Activation,
    /// Decoder output activation (data live in [-1, 1])
    #[serde(default = "default_output_activation")]
    pub output_activation: Activation,
    /// Discriminator hidden width
    #[serde(default = "default_disc_hidden")]
    pub disc_hidden: usize,
    /// Discriminator hidden layer count
    #[serde(default = "default_disc_layers")]
    pub disc_layers: usize,
}

fn default_x_dim() -> usize {
    784
}

fn default_hidden_dims() -> String {
    "256, 128".to_string()
}

fn default_true() -> bool {
    true
}

fn default_output_activation() -> Activation {
    Activation::Tanh
}

fn default_disc_hidden() -> usize {
    128
}

fn default_disc_layers() -> usize {
    2
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            x_dim: default_x_dim(),
            hidden_dims: default_hidden_dims(),
            batch_norm: true,
            activation: Activation::default(),
            output_activation: default_output_activation(),
            disc_hidden: default_disc_hidden(),
            disc_layers: default_disc_layers(),
        }
    }
}

impl NetworkConfig {
    /// Parsed hidden widths
    pub fn hidden(&self) -> Result<Vec<usize>> {
        parse_class_list(&self.hidden_dims)
            .map_err(|_| Error::config(format!("invalid hidden_dims '{}'", self.hidden_dims)))
    }

    /// Hidden widths of the decoder (encoder widths reversed)
    pub fn decoder_hidden(&self) -> Result<Vec<usize>> {
        let mut hidden = self.hidden()?;
        hidden.reverse();
        Ok(hidden)
    }

    /// Validate shapes
    pub fn validate(&self) -> Result<()> {
        if self.x_dim == 0 {
            return Err(Error::config("x_dim must be > 0"));
        }
        if self.hidden()?.iter().any(|&h| h == 0) {
            return Err(Error::config("hidden widths must be > 0"));
        }
        if self.disc_hidden == 0 {
            return Err(Error::config("disc_hidden must be > 0"));
        }
        Ok(())
    }
}

/// Multi-layer perceptron
///
/// Hidden layers are `Linear -> [BatchNorm] -> activation`; the last layer is
/// `Linear -> output activation`.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    norms: Vec<Option<BatchNorm>>,
    activation: Activation,
    output_activation: Activation,
}

impl Mlp {
    /// Build under `vb`, registering parameters as `fc{i}` / `bn{i}`
    pub fn new(
        vb: VarBuilder,
        in_dim: usize,
        hidden: &[usize],
        out_dim: usize,
        use_batch_norm: bool,
        activation: Activation,
        output_activation: Activation,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut norms = Vec::with_capacity(hidden.len());

        let mut width = in_dim;
        for (i, &h) in hidden.iter().enumerate() {
            layers.push(linear(width, h, vb.pp(format!("fc{}", i)))?);
            norms.push(if use_batch_norm {
                Some(batch_norm(h, 1e-5, vb.pp(format!("bn{}", i)))?)
            } else {
                None
            });
            width = h;
        }
        layers.push(linear(width, out_dim, vb.pp(format!("fc{}", hidden.len())))?);

        Ok(Self {
            layers,
            norms,
            activation,
            output_activation,
        })
    }

    /// Discriminator head: plain hidden stack, one logit out
    pub fn discriminator(
        vb: VarBuilder,
        in_dim: usize,
        hidden: usize,
        num_layers: usize,
    ) -> candle_core::Result<Self> {
        let widths = vec![hidden; num_layers];
        Self::new(
            vb,
            in_dim,
            &widths,
            1,
            false,
            Activation::Relu,
            Activation::Identity,
        )
    }

    /// Forward pass; `train` selects batch statistics in BatchNorm
    pub fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = x.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i == last {
                h = self.output_activation.apply(&h)?;
            } else {
                if let Some(Some(norm)) = self.norms.get(i) {
                    h = norm.forward_t(&h, train)?;
                }
                h = self.activation.apply(&h)?;
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_mlp_shapes_and_output_range() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let mlp = Mlp::new(
            vb.pp("dec"),
            3,
            &[8, 4],
            5,
            true,
            Activation::Relu,
            Activation::Tanh,
        )
        .unwrap();

        let x = Tensor::randn(0f32, 1.0, (6, 3), &Device::Cpu).unwrap();
        let y = mlp.forward_t(&x, true).unwrap();
        assert_eq!(y.dims(), &[6, 5]);
        let values = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));

        let names: Vec<String> = var_map.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n == "dec.fc0.weight"));
        assert!(names.iter().any(|n| n.starts_with("dec.bn1.")));
        assert!(names.iter().any(|n| n == "dec.fc2.bias"));
    }

    #[test]
    fn test_discriminator_outputs_one_logit() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let disc = Mlp::discriminator(vb, 4, 16, 2).unwrap();
        let x = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(disc.forward_t(&x, false).unwrap().dims(), &[3, 1]);
    }

    #[test]
    fn test_network_config_parsing() {
        let config = NetworkConfig {
            hidden_dims: "64, 32".to_string(),
            ..NetworkConfig::default()
        };
        assert_eq!(config.hidden().unwrap(), vec![64, 32]);
        assert_eq!(config.decoder_hidden().unwrap(), vec![32, 64]);
        assert!(config.validate().is_ok());

        let bad = NetworkConfig {
            hidden_dims: "64, x".to_string(),
            ..NetworkConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
