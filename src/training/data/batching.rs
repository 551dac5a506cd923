//! Batch type and collation

use anyhow::Result;
use candle_core::Tensor;

use super::Dataset;

/// A minibatch of features and optional one-hot labels
#[derive(Debug, Clone)]
pub struct Batch {
    /// Features, `[len, feature_dim]`
    pub x: Tensor,
    /// Labels, `[len, num_classes]`
    pub y: Option<Tensor>,
    /// Number of rows
    pub len: usize,
}

impl Batch {
    /// Build a batch, checking that labels match the feature rows
    pub fn new(x: Tensor, y: Option<Tensor>) -> Result<Self> {
        let len = x.dim(0)?;
        if let Some(y) = &y {
            let rows = y.dim(0)?;
            if rows != len {
                return Err(anyhow::anyhow!(
                    "Label rows ({}) do not match feature rows ({})",
                    rows,
                    len
                ));
            }
        }
        Ok(Self { x, y, len })
    }

    /// Labels, or an error naming the caller's requirement
    pub fn labels(&self) -> Result<&Tensor> {
        self.y
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Batch has no labels"))
    }

    /// Move the batch to another device
    pub fn to_device(&self, device: &candle_core::Device) -> Result<Self> {
        Ok(Self {
            x: self.x.to_device(device)?,
            y: self.y.as_ref().map(|y| y.to_device(device)).transpose()?,
            len: self.len,
        })
    }
}

/// Gather rows `indices` of a dataset into a batch
pub fn collate(dataset: &dyn Dataset, indices: &[usize]) -> Result<Batch> {
    let features = dataset.features();
    let ids: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    let ids = Tensor::from_vec(ids, indices.len(), features.device())?;

    let x = features.index_select(&ids, 0)?;
    let y = dataset
        .labels()
        .map(|labels| labels.index_select(&ids, 0))
        .transpose()?;
    Batch::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::TensorDataset;
    use candle_core::Device;

    #[test]
    fn test_collate_selects_rows() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[0.0f32, 0.0], [1.0, 1.0], [2.0, 2.0]], &device).unwrap();
        let y = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0], [1.0, 0.0]], &device).unwrap();
        let dataset = TensorDataset::new("toy", x, Some(y)).unwrap();

        let batch = collate(&dataset, &[2, 0]).unwrap();
        assert_eq!(batch.len, 2);
        assert_eq!(
            batch.x.to_vec2::<f32>().unwrap(),
            vec![vec![2.0, 2.0], vec![0.0, 0.0]]
        );
        assert_eq!(
            batch.labels().unwrap().to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 0.0], vec![1.0, 0.0]]
        );
    }

    #[test]
    fn test_batch_rejects_mismatched_labels() {
        let device = Device::Cpu;
        let x = Tensor::zeros((3, 2), candle_core::DType::F32, &device).unwrap();
        let y = Tensor::zeros((2, 2), candle_core::DType::F32, &device).unwrap();
        assert!(Batch::new(x, Some(y)).is_err());
    }
}
