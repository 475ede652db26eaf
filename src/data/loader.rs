// ============================================================
// Layer 4 — Dataset File Loader
// ============================================================
// Reads a pre-extracted VQA corpus from a directory:
//
//   <dir>/train.json      JSON array of VqaSample
//   <dir>/<split>.json    JSON array of VqaSample (evaluation split)
//   <dir>/label2ans.json  JSON array of answer strings
//   <dir>/qid2type.json   JSON object question id → answer type
//
// Every sample is checked against the BatchLayout here, so the
// batcher never sees a ragged sample. The same files are written
// by `write_corpus` for the `synthesize` command.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::data::dataset::{BatchLayout, VqaSample};
use crate::data::synthetic::SyntheticCorpus;

pub const TRAIN_SPLIT: &str = "train";

/// A loaded corpus: both splits plus the answer / type lookups.
#[derive(Debug, Clone)]
pub struct VqaCorpus {
    pub train:     Vec<VqaSample>,
    pub test:      Vec<VqaSample>,
    pub label2ans: Vec<String>,
    pub qid2type:  HashMap<i64, String>,
}

impl From<SyntheticCorpus> for VqaCorpus {
    fn from(c: SyntheticCorpus) -> Self {
        Self { train: c.train, test: c.test, label2ans: c.label2ans, qid2type: c.qid2type }
    }
}

pub struct CorpusLoader {
    dir: PathBuf,
}

impl CorpusLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, test_split: &str, layout: &BatchLayout) -> Result<VqaCorpus> {
        let train     = self.load_split(TRAIN_SPLIT, layout)?;
        let test      = self.load_split(test_split, layout)?;
        let label2ans = self.load_label2ans()?;
        let qid2type  = self.load_qid2type()?;

        if label2ans.len() != layout.num_answers {
            anyhow::bail!(
                "label2ans.json lists {} answers but the layout expects {}",
                label2ans.len(),
                layout.num_answers
            );
        }

        tracing::info!(
            "Loaded corpus from '{}': {} train, {} {}, {} answers",
            self.dir.display(), train.len(), test.len(), test_split, label2ans.len()
        );
        Ok(VqaCorpus { train, test, label2ans, qid2type })
    }

    pub fn load_split(&self, split: &str, layout: &BatchLayout) -> Result<Vec<VqaSample>> {
        let path = self.dir.join(format!("{split}.json"));
        let samples: Vec<VqaSample> = read_json(&path)?;
        for s in &samples {
            layout
                .check(s)
                .with_context(|| format!("invalid sample in '{}'", path.display()))?;
        }
        Ok(samples)
    }

    pub fn load_label2ans(&self) -> Result<Vec<String>> {
        read_json(&self.dir.join("label2ans.json"))
    }

    /// Question ids are JSON object keys, so they arrive as strings.
    pub fn load_qid2type(&self) -> Result<HashMap<i64, String>> {
        let path = self.dir.join("qid2type.json");
        let raw: HashMap<String, String> = read_json(&path)?;
        raw.into_iter()
            .map(|(qid, ty)| {
                let qid = qid
                    .parse::<i64>()
                    .with_context(|| format!("non-numeric question id '{qid}' in '{}'", path.display()))?;
                Ok((qid, ty))
            })
            .collect()
    }
}

/// Write a corpus in the layout `CorpusLoader` reads.
pub fn write_corpus(dir: impl AsRef<Path>, corpus: &VqaCorpus, test_split: &str) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create '{}'", dir.display()))?;

    write_json(&dir.join(format!("{TRAIN_SPLIT}.json")), &corpus.train)?;
    write_json(&dir.join(format!("{test_split}.json")), &corpus.test)?;
    write_json(&dir.join("label2ans.json"), &corpus.label2ans)?;
    let qid2type: HashMap<String, &String> = corpus
        .qid2type
        .iter()
        .map(|(qid, ty)| (qid.to_string(), ty))
        .collect();
    write_json(&dir.join("qid2type.json"), &qid2type)?;

    tracing::info!("Wrote corpus to '{}'", dir.display());
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse '{}'", path.display()))
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write '{}'", path.display()))
}
