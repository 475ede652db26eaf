// ============================================================
// Layer 2 — SynthesizeUseCase
// ============================================================
// Writes a seeded synthetic corpus to disk in the same layout
// `train --data-dir` reads, so the file path can be exercised
// without a real feature extraction pipeline.

use anyhow::Result;
use std::path::PathBuf;

use crate::data::{
    loader::{write_corpus, VqaCorpus},
    synthetic::{SyntheticConfig, SyntheticCorpus},
};

pub struct SynthesizeUseCase {
    output_dir: PathBuf,
    test_split: String,
    config:     SyntheticConfig,
}

impl SynthesizeUseCase {
    pub fn new(output_dir: impl Into<PathBuf>, test_split: impl Into<String>, config: SyntheticConfig) -> Self {
        Self { output_dir: output_dir.into(), test_split: test_split.into(), config }
    }

    /// Generate and write the corpus; returns it for reporting.
    pub fn execute(&self) -> Result<VqaCorpus> {
        self.config.validate()?;
        let corpus: VqaCorpus = SyntheticCorpus::generate(&self.config).into();
        write_corpus(&self.output_dir, &corpus, &self.test_split)?;
        tracing::info!(
            "Synthesized {} train / {} {} samples into '{}'",
            corpus.train.len(), corpus.test.len(), self.test_split, self.output_dir.display()
        );
        Ok(corpus)
    }
}
