//! Data loaders for XAE training

use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::batching::{collate, Batch};
use super::{Dataset, DatasetMetadata};

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle data
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Seed of the shuffle order
    pub seed: u64,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Batches an in-memory dataset, reshuffling every epoch
pub struct DataLoader {
    /// Dataset reference
    dataset: Arc<dyn Dataset>,
    /// DataLoader configuration
    config: DataLoaderConfig,
    /// Shuffle state, advanced once per epoch
    rng: StdRng,
    /// Epochs started
    epoch: usize,
}

impl DataLoader {
    /// Create a new DataLoader
    pub fn new(dataset: impl Dataset + 'static, config: DataLoaderConfig) -> Self {
        info!(
            "Creating DataLoader for '{}' with batch_size={}, shuffle={}, drop_last={}",
            dataset.metadata().name,
            config.batch_size,
            config.shuffle,
            config.drop_last
        );

        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            dataset: Arc::new(dataset),
            config,
            rng,
            epoch: 0,
        }
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let dataset_size = self.dataset.len();
        let batch_size = self.config.batch_size.max(1);
        if self.config.drop_last {
            dataset_size / batch_size
        } else {
            dataset_size.div_ceil(batch_size)
        }
    }

    /// Get dataset size
    pub fn dataset_size(&self) -> usize {
        self.dataset.len()
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &dyn Dataset {
        self.dataset.as_ref()
    }

    /// Get dataset metadata
    pub fn metadata(&self) -> &DatasetMetadata {
        self.dataset.metadata()
    }

    /// Loader configuration
    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// Epochs started so far
    pub fn current_epoch(&self) -> usize {
        self.epoch
    }

    /// Index lists of every batch of the next epoch
    pub fn epoch_indices(&mut self) -> Vec<Vec<usize>> {
        self.epoch += 1;

        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(&mut self.rng);
        }
        let batches = self.create_batches(indices);
        debug!("Epoch {}: {} batches", self.epoch, batches.len());
        batches
    }

    /// Gather one batch
    pub fn collate(&self, indices: &[usize]) -> Result<Batch> {
        collate(self.dataset.as_ref(), indices)
    }

    /// Iterate the batches of the next epoch
    pub fn epoch_iter(&mut self) -> impl Iterator<Item = Result<Batch>> + '_ {
        let batches = self.epoch_indices();
        batches.into_iter().map(move |indices| self.collate(&indices))
    }

    /// Create batches from indices
    fn create_batches(&self, indices: Vec<usize>) -> Vec<Vec<usize>> {
        let batch_size = self.config.batch_size.max(1);
        let mut batches = Vec::new();

        for chunk in indices.chunks(batch_size) {
            if self.config.drop_last && chunk.len() < batch_size {
                break;
            }
            batches.push(chunk.to_vec());
        }

        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::TensorDataset;
    use candle_core::{Device, Tensor};

    fn dataset(n: usize) -> TensorDataset {
        let values: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let x = Tensor::from_vec(values, (n, 1), &Device::Cpu).unwrap();
        TensorDataset::new("range", x, None).unwrap()
    }

    #[test]
    fn test_num_batches() {
        let config = DataLoaderConfig {
            batch_size: 4,
            shuffle: false,
            drop_last: false,
            seed: 0,
        };
        let loader = DataLoader::new(dataset(10), config.clone());
        assert_eq!(loader.num_batches(), 3);

        let loader = DataLoader::new(
            dataset(10),
            DataLoaderConfig {
                drop_last: true,
                ..config
            },
        );
        assert_eq!(loader.num_batches(), 2);
    }

    #[test]
    fn test_epoch_covers_dataset_once() {
        let mut loader = DataLoader::new(
            dataset(10),
            DataLoaderConfig {
                batch_size: 3,
                shuffle: true,
                drop_last: false,
                seed: 42,
            },
        );
        let mut seen: Vec<usize> = loader.epoch_indices().into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(loader.current_epoch(), 1);
    }

    #[test]
    fn test_drop_last_batches_are_full() {
        let mut loader = DataLoader::new(
            dataset(10),
            DataLoaderConfig {
                batch_size: 4,
                shuffle: true,
                drop_last: true,
                seed: 1,
            },
        );
        let sizes: Vec<usize> = loader
            .epoch_iter()
            .map(|batch| batch.unwrap().len)
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let config = DataLoaderConfig {
            batch_size: 5,
            shuffle: true,
            drop_last: false,
            seed: 9,
        };
        let mut a = DataLoader::new(dataset(20), config.clone());
        let mut b = DataLoader::new(dataset(20), config);
        assert_eq!(a.epoch_indices(), b.epoch_indices());
        // the order changes between epochs
        let first = a.epoch_indices();
        let second = a.epoch_indices();
        assert_ne!(first, second);
    }
}
