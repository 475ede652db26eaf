// ============================================================
// Layer 6 — Run Artifacts
// ============================================================
// Files a training run leaves in its output directory besides
// the CSV logs:
//
//   train_config.json                               effective config
//   vqa_{task}_{split}_{version}_{epoch}_results.json
//                                                   per-epoch answers
//
// A result file is a JSON array of {"question_id", "answer"}.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::evaluator::ResultEntry;

pub const CONFIG_FILE: &str = "train_config.json";

pub fn result_file_name(task: &str, split: &str, version: &str, epoch: usize) -> String {
    format!("vqa_{task}_{split}_{version}_{epoch}_results.json")
}

/// Writes the run's config and result files into one directory.
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<PathBuf> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(path)
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse config '{}'", path.display()))
    }

    pub fn write_results(
        &self,
        task:    &str,
        split:   &str,
        version: &str,
        epoch:   usize,
        results: &[ResultEntry],
    ) -> Result<PathBuf> {
        let path = self.dir.join(result_file_name(task, split, version, epoch));
        let json = serde_json::to_string(results)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write results to '{}'", path.display()))?;
        tracing::info!("Saved {} predictions to '{}'", results.len(), path.display());
        Ok(path)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_file_name() {
        assert_eq!(result_file_name("vqacp", "test", "v2", 3), "vqa_vqacp_test_v2_3_results.json");
    }

    #[test]
    fn test_results_are_a_json_array_of_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = RunArtifacts::new(dir.path().join("run")).unwrap();
        let path = artifacts
            .write_results("vqacp", "test", "v2", 0, &[
                ResultEntry { question_id: 7, answer: "yes".into() },
                ResultEntry { question_id: 9, answer: "2".into() },
            ])
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!([
            { "question_id": 7, "answer": "yes" },
            { "question_id": 9, "answer": "2" },
        ]));
    }

    #[test]
    fn test_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = RunArtifacts::new(dir.path()).unwrap();
        let cfg = TrainConfig { epochs: 3, css: false, ..Default::default() };
        artifacts.save_config(&cfg).unwrap();
        let back = artifacts.load_config().unwrap();
        assert_eq!(back.epochs, 3);
        assert!(!back.css);
    }
}
