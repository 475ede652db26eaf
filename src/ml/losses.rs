// ============================================================
// Layer 5 — Main Model Loss
// ============================================================
//   loss = margin_loss(refined_hidden, a')
//        [+ injection:   mean_N( f1 · Σ_C -log_softmax(logits) · a' )]
//        [+ contrastive: supcon(pre-margin hidden, gt)]
//
// The supervised-contrastive term, with s_ij = exp(cos_ij / τ) and
// M_ij = [gt_i == gt_j] (self-pairs included):
//
//   neg   = Σ_{M_ij = 0} s_ij
//   loss  = -mean_i( Σ_j M_ij log(s_ij / neg) / Σ_j M_ij )
//         = log(neg) - mean_i( Σ_j M_ij cos_ij / (τ Σ_j M_ij) )
//
// The second form avoids taking exp then log of the similarities.

use std::collections::BTreeSet;

use burn::{
    prelude::*,
    tensor::activation::log_softmax,
};
use serde::{Deserialize, Serialize};

use crate::domain::{CategoryIndex, DebiasError};
use crate::ml::ops::{from_host, l2_normalize, scalar};
use crate::ml::traits::{LossContext, TargetLoss};

/// `mean_N( w · Σ_C -log_softmax(scores) · target )`
pub fn weighted_soft_cross_entropy<B: Backend>(
    scores: Tensor<B, 2>,
    target: Tensor<B, 2>,
    weight: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let per_example = (log_softmax(scores, 1) * target).sum_dim(1).neg();
    (per_example * weight).mean()
}

/// Reference margin loss: weighted soft cross-entropy on the margin
/// model's refined scores. The margin itself is applied by the head.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarginCrossEntropy;

impl<B: Backend> TargetLoss<B> for MarginCrossEntropy {
    fn loss(&self, hidden: Tensor<B, 2>, target: Tensor<B, 2>, ctx: &LossContext<B>) -> Tensor<B, 1> {
        weighted_soft_cross_entropy(hidden, target, ctx.per_example_weight.clone())
    }
}

pub fn supervised_contrastive<B: Backend>(
    features:    Tensor<B, 2>,
    labels:      &[usize],
    temperature: f32,
) -> Result<Tensor<B, 1>, DebiasError> {
    let distinct = labels.iter().collect::<BTreeSet<_>>().len();
    if distinct < 2 {
        return Err(DebiasError::DegenerateContrastiveBatch { distinct });
    }
    let n = labels.len();
    let device = features.device();

    let mut same = vec![0.0f32; n * n];
    let mut positives = vec![0.0f32; n];
    for (i, li) in labels.iter().enumerate() {
        for (j, lj) in labels.iter().enumerate() {
            if li == lj {
                same[i * n + j] = 1.0;
                positives[i] += 1.0;
            }
        }
    }
    let same      = from_host::<B, 2>(same, [n, n], &device);
    let positives = from_host::<B, 2>(positives, [n, 1], &device);

    let feats = l2_normalize(features);
    let log_sim = feats.clone().matmul(feats.transpose()).div_scalar(temperature);
    let negative_sum = (log_sim.clone().exp() * same.clone().neg().add_scalar(1.0)).sum();
    let anchor_means = (log_sim * same).sum_dim(1) / positives;

    Ok(negative_sum.log() - anchor_means.mean())
}

/// Contrastive loss over arbitrary category tokens, mapped to dense ids
/// in first-seen order.
pub fn supervised_contrastive_by_category<B: Backend, K: Ord + Clone>(
    features:    Tensor<B, 2>,
    categories:  &[K],
    temperature: f32,
) -> Result<Tensor<B, 1>, DebiasError> {
    let index = CategoryIndex::build(categories.iter());
    let labels = index.encode(categories.iter()).ok_or_else(|| DebiasError::UnindexedCategory {
        count: categories.iter().filter(|c| index.get(c).is_none()).count(),
    })?;
    supervised_contrastive(features, &labels, temperature)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MainLossSwitches {
    pub inject:      bool,
    pub contrastive: bool,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MainLossTerms {
    pub margin:      f32,
    pub injection:   f32,
    pub contrastive: f32,
    pub total:       f32,
}

pub struct MainLossInputs<'a, B: Backend> {
    pub refined_hidden:    Tensor<B, 2>,
    pub logits:            Tensor<B, 2>,
    pub pre_margin_hidden: Tensor<B, 2>,
    pub target:            Tensor<B, 2>,
    pub pseudo_labels:     &'a [usize],
    pub ctx:               LossContext<B>,
}

pub struct MainLoss<B: Backend> {
    pub loss:  Tensor<B, 1>,
    pub terms: MainLossTerms,
}

pub fn compose_main_loss<B: Backend>(
    loss_fn:  &dyn TargetLoss<B>,
    inputs:   MainLossInputs<'_, B>,
    switches: &MainLossSwitches,
) -> Result<MainLoss<B>, DebiasError> {
    let MainLossInputs { refined_hidden, logits, pre_margin_hidden, target, pseudo_labels, ctx } = inputs;
    let mut terms = MainLossTerms::default();

    let margin = loss_fn.loss(refined_hidden, target.clone(), &ctx);
    terms.margin = scalar(margin.clone());
    let mut loss = margin;

    if switches.inject {
        let injection = weighted_soft_cross_entropy(logits, target, ctx.per_example_weight.clone());
        terms.injection = scalar(injection.clone());
        loss = loss + injection;
    }
    if switches.contrastive {
        let contrastive =
            supervised_contrastive_by_category(pre_margin_hidden, pseudo_labels, switches.temperature)?;
        terms.contrastive = scalar(contrastive.clone());
        loss = loss + contrastive;
    }

    terms.total = scalar(loss.clone());
    Ok(MainLoss { loss, terms })
}
