// ============================================================
// Layer 5 — Counterfactual Sample Synthesis
// ============================================================
// Turns saliency into two corrupted copies of a batch:
//
//   visual  — among the `hint_candidates` regions with the highest
//             hint score, zero the `masked_regions` with the largest
//             gradient saliency (region mask [N, regions])
//   lexical — among content tokens (type mask ≠ 0), overwrite the
//             `masked_tokens` most salient ones with the placeholder
//
// Rankings are done on the host: they are non-differentiable and
// the per-row top-k with degrade-to-available semantics is simpler
// to state over slices than over device tensors. Ties keep the
// lower index first.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::batcher::VqaBatch;
use crate::domain::DebiasError;
use crate::ml::ops::{from_host, from_host_int, to_host, to_host_int};
use crate::ml::saliency::InputGradients;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualConfig {
    pub hint_candidates:   usize,
    pub masked_regions:    usize,
    pub masked_tokens:     usize,
    pub placeholder_token: u32,
}

impl CounterfactualConfig {
    pub fn new(placeholder_token: u32) -> Self {
        Self { hint_candidates: 18, masked_regions: 3, masked_tokens: 5, placeholder_token }
    }
}

/// Indices of `scores` sorted by descending score, stable on ties.
/// NaN ranks below every number.
fn rank_descending(scores: &[f32]) -> Vec<usize> {
    let key = |i: usize| if scores[i].is_nan() { f32::NEG_INFINITY } else { scores[i] };
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    idx
}

/// All-ones [rows, regions] mask with the selected regions of each row
/// set to zero. Row-major slices of length rows * regions.
pub fn region_mask(saliency: &[f32], hints: &[f32], regions: usize, cfg: &CounterfactualConfig) -> Vec<f32> {
    let mut mask = vec![1.0f32; hints.len()];
    if regions == 0 {
        return mask;
    }
    for ((mask_row, hint_row), sal_row) in mask
        .chunks_mut(regions)
        .zip(hints.chunks(regions))
        .zip(saliency.chunks(regions))
    {
        let candidates: Vec<usize> = rank_descending(hint_row)
            .into_iter()
            .take(cfg.hint_candidates)
            .collect();
        let candidate_saliency: Vec<f32> = candidates.iter().map(|&r| sal_row[r]).collect();
        for pick in rank_descending(&candidate_saliency).into_iter().take(cfg.masked_regions) {
            mask_row[candidates[pick]] = 0.0;
        }
    }
    mask
}

/// Copy of `questions` with the most salient content tokens of each row
/// replaced by the placeholder. Row-major slices of length rows * len.
pub fn lexical_counterfactual(
    questions: &[i64],
    saliency:  &[f32],
    type_mask: &[f32],
    len:       usize,
    cfg:       &CounterfactualConfig,
) -> Vec<i64> {
    let mut out = questions.to_vec();
    if len == 0 {
        return out;
    }
    for ((out_row, sal_row), type_row) in out
        .chunks_mut(len)
        .zip(saliency.chunks(len))
        .zip(type_mask.chunks(len))
    {
        // exp(s·m)·m is zero off-content and monotone in s on content
        // tokens, so ranking content tokens by s·m gives the same order
        // without overflowing exp.
        let content: Vec<usize> = (0..len).filter(|&j| type_row[j] != 0.0).collect();
        let scores: Vec<f32> = content.iter().map(|&j| sal_row[j] * type_row[j]).collect();
        for pick in rank_descending(&scores).into_iter().take(cfg.masked_tokens) {
            out_row[content[pick]] = cfg.placeholder_token as i64;
        }
    }
    out
}

/// Device-side counterfactual inputs for one batch.
#[derive(Debug, Clone)]
pub struct Counterfactuals<B: Backend> {
    pub region_mask: Tensor<B, 2>,
    pub questions:   Tensor<B, 2, Int>,
}

pub fn synthesize<B: Backend, G: Backend>(
    batch: &VqaBatch<B>,
    grads: &InputGradients<G>,
    cfg:   &CounterfactualConfig,
) -> Result<Counterfactuals<B>, DebiasError> {
    let device = batch.visual.device();
    let [n, regions, _] = batch.visual.dims();
    let [_, len] = batch.questions.dims();

    let mask = region_mask(
        &grads.region_scores()?,
        &to_host(batch.hints.clone())?,
        regions,
        cfg,
    );
    let questions = lexical_counterfactual(
        &to_host_int(batch.questions.clone())?,
        &grads.token_scores()?,
        &to_host(batch.type_mask.clone())?,
        len,
        cfg,
    );

    Ok(Counterfactuals {
        region_mask: from_host(mask, [n, regions], &device),
        questions:   from_host_int(questions, [n, len], &device),
    })
}
