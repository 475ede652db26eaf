// ============================================================
// Layer 3 — Domain Errors
// ============================================================
// Precondition violations detected on a single batch or an
// evaluation pass. None of these are transient: the caller
// aborts the epoch and reports the offending question ids.
//
//   numeric      — DegenerateContrastiveBatch, UnindexedCategory,
//                  EmptyAnswerType, EmptyEvaluation
//   gradients    — NoSaliencyTarget, GradientUnavailable
//   shape        — BatchMisaligned, AnswerIndexOutOfRange,
//                  TensorRead

use thiserror::Error;

use crate::domain::answer_type::AnswerType;

#[derive(Debug, Error)]
pub enum DebiasError {
    /// No target entry in the batch is positive, so the saliency
    /// objective has no contributing examples.
    #[error("saliency objective is empty: no positive answer mass in batch (question ids {question_ids:?})")]
    NoSaliencyTarget { question_ids: Vec<i64> },

    /// The backend produced no gradient for a tracked input.
    #[error("no gradient was recorded for the {input} input")]
    GradientUnavailable { input: &'static str },

    /// Fewer than two distinct labels leaves the contrastive
    /// negative set empty.
    #[error("contrastive loss needs at least 2 distinct labels, batch has {distinct}")]
    DegenerateContrastiveBatch { distinct: usize },

    /// A label handed to the contrastive loss has no dense category id.
    #[error("{count} category labels are missing from the category index")]
    UnindexedCategory { count: usize },

    #[error("no evaluation examples of answer type '{0}'")]
    EmptyAnswerType(AnswerType),

    #[error("evaluation saw no examples")]
    EmptyEvaluation,

    #[error("batch field '{field}' has {found} rows, expected {expected}")]
    BatchMisaligned {
        field:    &'static str,
        expected: usize,
        found:    usize,
    },

    #[error("predicted answer index {index} is outside the {len}-entry answer list")]
    AnswerIndexOutOfRange { index: usize, len: usize },

    #[error("could not read tensor data: {0}")]
    TensorRead(String),
}
