// ============================================================
// Layer 4 — Synthetic VQA Corpus
// ============================================================
// A seeded toy corpus with a planted language prior: the first
// content token of a question names the answer most of the time,
// while the true answer is only recoverable from one visual region.
// A model that leans on the question token is exactly the shortcut
// the debiasing loop is meant to suppress.
//
// Answer space: 0 = "yes", 1 = "no", then `num_number_answers`
// numbers, then "other" answers.

use std::collections::HashMap;

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::dataset::{AnswerScore, BatchLayout, VqaSample};
use crate::domain::AnswerType;

/// Token id 0 is padding, 1 is the question-word slot.
const PAD_TOKEN: u32 = 0;
const QUESTION_WORD: u32 = 1;
/// Answer-naming tokens start here.
const PRIOR_TOKEN_BASE: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub train_samples:      usize,
    pub test_samples:       usize,
    pub num_regions:        usize,
    pub feature_dim:        usize,
    pub max_question_len:   usize,
    pub num_answers:        usize,
    pub num_number_answers: usize,
    pub vocab_size:         usize,
    /// Probability that the question token agrees with the answer
    /// in the training split. The test split inverts the prior.
    pub prior_strength:     f64,
    pub seed:               u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_samples:      64,
            test_samples:       32,
            num_regions:        36,
            feature_dim:        8,
            max_question_len:   8,
            num_answers:        8,
            num_number_answers: 2,
            vocab_size:         64,
            prior_strength:     0.8,
            seed:               42,
        }
    }
}

impl SyntheticConfig {
    pub fn layout(&self) -> BatchLayout {
        BatchLayout {
            num_regions:      self.num_regions,
            feature_dim:      self.feature_dim,
            max_question_len: self.max_question_len,
            num_answers:      self.num_answers,
        }
    }

    /// Reject geometries the generator cannot fill: every answer type
    /// needs a label, and the vocabulary needs room for the prior tokens,
    /// at least one filler word and the placeholder.
    pub fn validate(&self) -> Result<()> {
        if self.num_answers < 3 + self.num_number_answers {
            bail!(
                "synthetic corpus needs at least {} answers for yes/no, {} numbers and one other",
                3 + self.num_number_answers, self.num_number_answers
            );
        }
        if self.vocab_size < self.num_answers + 4 {
            bail!("synthetic vocabulary of {} tokens is too small for {} answers", self.vocab_size, self.num_answers);
        }
        if self.max_question_len < 2 || self.num_regions == 0 || self.feature_dim == 0 {
            bail!("synthetic corpus needs a question length of at least 2 and non-empty visual features");
        }
        Ok(())
    }

    /// Last vocabulary id, reserved as the lexical placeholder.
    pub fn placeholder_token(&self) -> u32 {
        (self.vocab_size - 1) as u32
    }

    fn answer_type(&self, label: usize) -> AnswerType {
        if label < 2 {
            AnswerType::YesNo
        } else if label < 2 + self.num_number_answers {
            AnswerType::Number
        } else {
            AnswerType::Other
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCorpus {
    pub layout:    BatchLayout,
    pub train:     Vec<VqaSample>,
    pub test:      Vec<VqaSample>,
    pub label2ans: Vec<String>,
    pub qid2type:  HashMap<i64, String>,
}

impl SyntheticCorpus {
    pub fn generate(cfg: &SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let label2ans: Vec<String> = (0..cfg.num_answers)
            .map(|label| match cfg.answer_type(label) {
                AnswerType::YesNo  => if label == 0 { "yes".to_string() } else { "no".to_string() },
                AnswerType::Number => (label - 2).to_string(),
                AnswerType::Other  => format!("answer_{label}"),
            })
            .collect();

        let mut qid2type = HashMap::new();
        let mut next_qid = 0i64;
        let mut split = |count: usize, prior: f64, rng: &mut StdRng| -> Vec<VqaSample> {
            (0..count)
                .map(|i| {
                    // Cycle labels so every answer type is present in every split.
                    let label = i % cfg.num_answers;
                    let qid   = next_qid;
                    next_qid += 1;
                    qid2type.insert(qid, cfg.answer_type(label).as_str().to_string());
                    sample(cfg, rng, qid, label, prior)
                })
                .collect()
        };

        let train = split(cfg.train_samples, cfg.prior_strength, &mut rng);
        let test  = split(cfg.test_samples, 1.0 - cfg.prior_strength, &mut rng);

        tracing::debug!(
            "Synthetic corpus: {} train, {} test, {} answers",
            train.len(), test.len(), label2ans.len()
        );

        Self { layout: cfg.layout(), train, test, label2ans, qid2type }
    }
}

fn sample(cfg: &SyntheticConfig, rng: &mut StdRng, qid: i64, label: usize, prior: f64) -> VqaSample {
    let (regions, dim, len) = (cfg.num_regions, cfg.feature_dim, cfg.max_question_len);

    // Visual: noise everywhere, the answer is written into one region.
    let mut visual: Vec<f32> = (0..regions * dim).map(|_| rng.gen_range(-0.5..0.5)).collect();
    let signal_region = label % regions;
    visual[signal_region * dim + label % dim] += 3.0;

    let mut hint: Vec<f32> = (0..regions).map(|_| rng.gen_range(0.0..0.5)).collect();
    hint[signal_region] += 1.0;

    // Question: [question-word, prior token, filler words..., padding].
    let prior_label = if rng.gen_bool(prior.clamp(0.0, 1.0)) {
        label
    } else {
        (label + 1 + rng.gen_range(0..cfg.num_answers - 1)) % cfg.num_answers
    };
    let content_len = rng.gen_range(2..=len.saturating_sub(1).max(2)).min(len);
    let filler_base = PRIOR_TOKEN_BASE + cfg.num_answers as u32;
    let filler_top  = cfg.placeholder_token();

    let mut question = vec![PAD_TOKEN; len];
    let mut type_mask = vec![0.0f32; len];
    let mut notype_mask = vec![0.0f32; len];
    let mut question_mask = vec![0.0f32; len];
    for pos in 0..content_len {
        question[pos] = match pos {
            0 => QUESTION_WORD,
            1 => PRIOR_TOKEN_BASE + prior_label as u32,
            _ => rng.gen_range(filler_base..filler_top),
        };
        question_mask[pos] = 1.0;
        if pos == 0 {
            notype_mask[pos] = 1.0;
        } else {
            type_mask[pos] = 1.0;
        }
    }

    VqaSample {
        question_id:   qid,
        visual,
        question,
        answers:       vec![AnswerScore { label, score: 1.0 }],
        margin:        0.1 * cfg.answer_type(label) as u8 as f32,
        bias:          0.0,
        reliability:   1.0,
        hint,
        type_mask,
        notype_mask,
        question_mask,
        question_type: format!("type_{}", cfg.answer_type(label)),
    }
}
