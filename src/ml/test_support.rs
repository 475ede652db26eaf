//! Shared fixtures for the ml unit tests.

use burn::{
    backend::{ndarray::NdArray, Autodiff},
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::batcher::{VqaBatch, VqaBatcher};
use crate::data::synthetic::{SyntheticConfig, SyntheticCorpus};
use crate::ml::model::NetworkConfig;

pub type TestBackend = NdArray<f32>;
pub type TestAutodiff = Autodiff<TestBackend>;

pub fn synthetic_config() -> SyntheticConfig {
    SyntheticConfig {
        train_samples:    16,
        test_samples:     16,
        num_regions:      36,
        feature_dim:      4,
        max_question_len: 8,
        num_answers:      6,
        vocab_size:       40,
        ..Default::default()
    }
}

pub fn network_config(cfg: &SyntheticConfig) -> NetworkConfig {
    NetworkConfig::new(cfg.vocab_size, cfg.feature_dim, cfg.num_answers)
        .with_embed_dim(8)
        .with_hidden_dim(16)
        .with_discriminator_dim(8)
}

pub fn corpus() -> SyntheticCorpus {
    SyntheticCorpus::generate(&synthetic_config())
}

/// First `n` training samples of the synthetic corpus as one batch.
pub fn train_batch<B: Backend>(n: usize) -> VqaBatch<B> {
    let corpus = corpus();
    VqaBatcher::<B>::new(Default::default(), corpus.layout).batch(corpus.train[..n].to_vec())
}
