// ============================================================
// Layer 5 — Target Reweighting
// ============================================================
//   a' = clamp(2·a·sigmoid(-2·a·p_g), 0, 1)
//   gt = argmax(a')
//
// p_g is the frozen generator's prediction on the clean inputs.
// Where the generator already scores a ground-truth answer highly
// the answer's target mass shrinks; where it scores it at or below
// zero the mass is kept (or capped at 1).

use burn::{
    prelude::*,
    tensor::activation::sigmoid,
};

use crate::domain::DebiasError;
use crate::ml::ops::argmax_rows;

#[derive(Debug, Clone)]
pub struct ReweightedTargets<B: Backend> {
    /// Soft targets after suppression, [N, C].
    pub target:        Tensor<B, 2>,
    /// Hard pseudo-label per example.
    pub pseudo_labels: Vec<usize>,
}

pub fn reweight<B: Backend>(target: Tensor<B, 2>, bias_prediction: Tensor<B, 2>) -> Tensor<B, 2> {
    let doubled = target.mul_scalar(2.0);
    let gate = sigmoid(doubled.clone().neg() * bias_prediction.detach());
    (doubled * gate).clamp(0.0, 1.0)
}

pub fn reweight_with_labels<B: Backend>(
    target:          Tensor<B, 2>,
    bias_prediction: Tensor<B, 2>,
) -> Result<ReweightedTargets<B>, DebiasError> {
    let target = reweight(target, bias_prediction);
    let pseudo_labels = argmax_rows(target.clone())?;
    Ok(ReweightedTargets { target, pseudo_labels })
}
