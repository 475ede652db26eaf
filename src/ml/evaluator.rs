// ============================================================
// Layer 5 — Evaluation and Score Aggregation
// ============================================================
// Per batch:
//
//   backbone → margin head → ensemble (inference form)
//   score_i = a_i[argmax(prediction_i)]
//
// Scores are bucketed by answer type through the question id →
// type lookup. Examples whose type is missing or unknown still
// count toward the overall score and are listed in the report.
// Runs on whatever backend the networks live on; the training
// loop hands in `model.valid()` so no graph is recorded.

use std::collections::HashMap;
use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::batcher::VqaBatch;
use crate::domain::{AnswerType, DebiasError, Mode};
use crate::ml::ensemble::HeadEnsemble;
use crate::ml::ops::{argmax_rows, score_at_argmax, to_host};
use crate::ml::traits::{MarginModel, VqaBackbone};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bucket {
    sum:   f64,
    count: usize,
}

impl Bucket {
    fn add(&mut self, score: f64) {
        self.sum += score;
        self.count += 1;
    }
}

/// Running (sum, count) per answer type plus the overall total.
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator {
    overall:      Bucket,
    by_type:      [Bucket; 3],
    unrecognized: Vec<i64>,
}

fn slot(t: AnswerType) -> usize {
    match t {
        AnswerType::YesNo  => 0,
        AnswerType::Number => 1,
        AnswerType::Other  => 2,
    }
}

impl ScoreAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one example. `type_label` is the raw label from the
    /// question-type lookup, if there was one.
    pub fn record(&mut self, question_id: i64, type_label: Option<&str>, score: f32) {
        let score = score as f64;
        self.overall.add(score);
        match type_label.and_then(AnswerType::parse) {
            Some(t) => self.by_type[slot(t)].add(score),
            None => {
                tracing::warn!(
                    question_id,
                    answer_type = type_label.unwrap_or("<missing>"),
                    "unrecognized answer type; counted in overall only"
                );
                self.unrecognized.push(question_id);
            }
        }
    }

    pub fn examples(&self) -> usize {
        self.overall.count
    }

    pub fn finalize(self) -> Result<ScoreReport, DebiasError> {
        if self.overall.count == 0 {
            return Err(DebiasError::EmptyEvaluation);
        }
        let mut per_type = [TypeScore::default(); 3];
        for t in AnswerType::ALL {
            let b = self.by_type[slot(t)];
            if b.count == 0 {
                return Err(DebiasError::EmptyAnswerType(t));
            }
            per_type[slot(t)] = TypeScore { score: b.sum / b.count as f64, count: b.count };
        }
        Ok(ScoreReport {
            overall:      self.overall.sum / self.overall.count as f64,
            examples:     self.overall.count,
            yes_no:       per_type[0],
            number:       per_type[1],
            other:        per_type[2],
            unrecognized: self.unrecognized,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    pub score: f64,
    pub count: usize,
}

/// Scores are fractions in [0, 1]; Display prints them as percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub overall:      f64,
    pub examples:     usize,
    pub yes_no:       TypeScore,
    pub number:       TypeScore,
    pub other:        TypeScore,
    pub unrecognized: Vec<i64>,
}

impl ScoreReport {
    pub fn get(&self, t: AnswerType) -> TypeScore {
        match t {
            AnswerType::YesNo  => self.yes_no,
            AnswerType::Number => self.number,
            AnswerType::Other  => self.other,
        }
    }
}

impl fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overall={:.2}", self.overall * 100.0)?;
        for t in AnswerType::ALL {
            write!(f, " | {}={:.2}", t, self.get(t).score * 100.0)?;
        }
        if !self.unrecognized.is_empty() {
            write!(f, " | unrecognized={}", self.unrecognized.len())?;
        }
        Ok(())
    }
}

/// One line of the result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub question_id: i64,
    pub answer:      String,
}

pub struct EvalOptions<'a> {
    pub qid2type:        &'a HashMap<i64, String>,
    pub label2ans:       &'a [String],
    pub ensemble:        HeadEnsemble,
    pub epoch:           usize,
    pub collect_results: bool,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub report:  ScoreReport,
    /// Empty unless `collect_results` was set.
    pub results: Vec<ResultEntry>,
}

pub fn evaluate<B, M, H, I>(model: &M, head: &H, batches: I, opts: &EvalOptions<'_>) -> Result<Evaluation, DebiasError>
where
    B: Backend,
    M: VqaBackbone<B>,
    H: MarginModel<B>,
    I: IntoIterator<Item = VqaBatch<B>>,
{
    let mut scores  = ScoreAggregator::new();
    let mut results = Vec::new();

    for batch in batches {
        batch.validate()?;
        let out = model.forward(batch.visual.clone(), batch.questions.clone());
        let (_, pred) = head.forward(
            out.hidden,
            out.logits.clone(),
            batch.margins.clone(),
            opts.epoch,
            batch.answers.clone(),
        );
        let prediction = opts.ensemble.combine(out.logits, pred, Mode::Inference);

        let batch_scores = to_host(score_at_argmax(prediction.clone(), batch.answers.clone()))?;
        let answers = if opts.collect_results { argmax_rows(prediction)? } else { Vec::new() };

        for (i, (&qid, score)) in batch.question_ids.iter().zip(batch_scores).enumerate() {
            scores.record(qid, opts.qid2type.get(&qid).map(String::as_str), score);
            if let Some(&index) = answers.get(i) {
                let answer = opts
                    .label2ans
                    .get(index)
                    .ok_or(DebiasError::AnswerIndexOutOfRange { index, len: opts.label2ans.len() })?;
                results.push(ResultEntry { question_id: qid, answer: answer.clone() });
            }
        }
    }

    let report = scores.finalize()?;
    tracing::debug!("Evaluated {} examples: {}", report.examples, report);
    Ok(Evaluation { report, results })
}
