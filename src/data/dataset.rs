use anyhow::{bail, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One ground-truth answer and its vote-based score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnswerScore {
    pub label: usize,
    pub score: f32,
}

fn unit_weight() -> f32 {
    1.0
}

/// One pre-extracted VQA example.
/// `visual` is row-major [regions, feature_dim]; the token-level
/// vectors are padded to the layout's question length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VqaSample {
    pub question_id:   i64,
    pub visual:        Vec<f32>,
    pub question:      Vec<u32>,
    pub answers:       Vec<AnswerScore>,
    #[serde(default)]
    pub margin:        f32,
    #[serde(default)]
    pub bias:          f32,
    #[serde(default = "unit_weight")]
    pub reliability:   f32,
    pub hint:          Vec<f32>,
    pub type_mask:     Vec<f32>,
    pub notype_mask:   Vec<f32>,
    pub question_mask: Vec<f32>,
    #[serde(default)]
    pub question_type: String,
}

impl VqaSample {
    /// Dense soft target over `num_answers` classes.
    pub fn target_row(&self, num_answers: usize) -> Vec<f32> {
        let mut row = vec![0.0f32; num_answers];
        for a in &self.answers {
            if let Some(slot) = row.get_mut(a.label) {
                *slot += a.score;
            }
        }
        row
    }
}

/// Fixed tensor geometry every sample must agree with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLayout {
    pub num_regions:      usize,
    pub feature_dim:      usize,
    pub max_question_len: usize,
    pub num_answers:      usize,
}

impl BatchLayout {
    /// Reject a sample whose vectors do not match the layout, or whose
    /// target is not a non-negative distribution with mass ≤ 1.
    pub fn check(&self, s: &VqaSample) -> Result<()> {
        let qid = s.question_id;
        if s.visual.len() != self.num_regions * self.feature_dim {
            bail!(
                "question {qid}: visual has {} values, expected {}x{}",
                s.visual.len(), self.num_regions, self.feature_dim
            );
        }
        if s.hint.len() != self.num_regions {
            bail!("question {qid}: hint has {} regions, expected {}", s.hint.len(), self.num_regions);
        }
        for (name, len) in [
            ("question",      s.question.len()),
            ("type_mask",     s.type_mask.len()),
            ("notype_mask",   s.notype_mask.len()),
            ("question_mask", s.question_mask.len()),
        ] {
            if len != self.max_question_len {
                bail!("question {qid}: {name} has length {len}, expected {}", self.max_question_len);
            }
        }
        let mut mass = 0.0f32;
        for a in &s.answers {
            if a.label >= self.num_answers {
                bail!("question {qid}: answer label {} outside {} classes", a.label, self.num_answers);
            }
            if a.score < 0.0 {
                bail!("question {qid}: negative answer score {}", a.score);
            }
            mass += a.score;
        }
        if mass > 1.0 + 1e-4 {
            bail!("question {qid}: answer mass {mass} exceeds 1");
        }
        Ok(())
    }
}

pub struct VqaDataset {
    samples: Vec<VqaSample>,
}

impl VqaDataset {
    pub fn new(samples: Vec<VqaSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }
}

impl Dataset<VqaSample> for VqaDataset {
    fn get(&self, index: usize) -> Option<VqaSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BatchLayout {
        BatchLayout { num_regions: 2, feature_dim: 3, max_question_len: 4, num_answers: 5 }
    }

    fn sample() -> VqaSample {
        VqaSample {
            question_id:   7,
            visual:        vec![0.0; 6],
            question:      vec![1, 2, 3, 0],
            answers:       vec![AnswerScore { label: 1, score: 0.6 }, AnswerScore { label: 4, score: 0.3 }],
            margin:        0.1,
            bias:          0.0,
            reliability:   1.0,
            hint:          vec![0.5, 0.2],
            type_mask:     vec![0.0, 1.0, 1.0, 0.0],
            notype_mask:   vec![1.0, 0.0, 0.0, 0.0],
            question_mask: vec![1.0, 1.0, 1.0, 0.0],
            question_type: "what is".into(),
        }
    }

    #[test]
    fn test_target_row_is_dense() {
        assert_eq!(sample().target_row(5), vec![0.0, 0.6, 0.0, 0.0, 0.3]);
    }

    #[test]
    fn test_layout_accepts_valid_sample() {
        assert!(layout().check(&sample()).is_ok());
    }

    #[test]
    fn test_layout_rejects_bad_label() {
        let mut s = sample();
        s.answers.push(AnswerScore { label: 9, score: 0.1 });
        let err = layout().check(&s).unwrap_err().to_string();
        assert!(err.contains("question 7"));
    }

    #[test]
    fn test_layout_rejects_excess_mass() {
        let mut s = sample();
        s.answers[0].score = 0.9;
        assert!(layout().check(&s).is_err());
    }

    #[test]
    fn test_layout_rejects_short_mask() {
        let mut s = sample();
        s.type_mask.pop();
        assert!(layout().check(&s).is_err());
    }

    #[test]
    fn test_dataset_get_and_len() {
        let ds = VqaDataset::new(vec![sample(), sample()]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).map(|s| s.question_id), Some(7));
        assert!(ds.get(2).is_none());
    }
}
