// ============================================================
// Layer 5 — Head Ensemble
// ============================================================
// Combines the backbone's classifier logits with the margin
// head's prediction when either learned-bias term is active:
//
//   training    (n(logits) + n(pred)) / 2
//   evaluation  α·softmax(n(pred)) + (1-α)·softmax(n(logits) / temp)
//
// n(·) is row-wise L2 normalisation. With both terms off the
// prediction is passed through untouched.

use burn::{
    prelude::*,
    tensor::activation::softmax,
};
use serde::{Deserialize, Serialize};

use crate::domain::Mode;
use crate::ml::ops::l2_normalize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadEnsemble {
    pub enabled:     bool,
    pub alpha:       f32,
    pub temperature: f32,
}

impl HeadEnsemble {
    pub fn new(bias_inject: bool, learnable_margins: bool, alpha: f32, temperature: f32) -> Self {
        Self { enabled: bias_inject || learnable_margins, alpha, temperature }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, alpha: 1.0, temperature: 1.0 }
    }

    pub fn combine<B: Backend>(&self, logits: Tensor<B, 2>, pred: Tensor<B, 2>, mode: Mode) -> Tensor<B, 2> {
        if !self.enabled {
            return pred;
        }
        match mode {
            Mode::Train => (l2_normalize(logits) + l2_normalize(pred)).div_scalar(2.0),
            Mode::Inference => {
                let from_pred   = softmax(l2_normalize(pred), 1).mul_scalar(self.alpha);
                let from_logits = softmax(l2_normalize(logits).div_scalar(self.temperature), 1)
                    .mul_scalar(1.0 - self.alpha);
                from_pred + from_logits
            }
        }
    }
}
