// ============================================================
// Layer 5 — Gradient Saliency
// ============================================================
// Input-gradient attribution of the margin model's prediction,
// restricted to answers with positive ground-truth mass:
//
//   objective = Σ pred · [a > 0]
//   ∂objective/∂visual      → [N, regions, D]
//   ∂objective/∂embeddings  → [N, L, E]
//
// The gradients are only ever ranked, never differentiated
// through, so this pass runs on its own forward trace with
// detached leaves. The gradient store is dropped before return;
// the generator and main-model passes never see this graph.

use burn::{
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::VqaBatch;
use crate::domain::DebiasError;
use crate::ml::ops::to_host;
use crate::ml::traits::{MarginModel, VqaBackbone};

/// Gradients w.r.t. the two inputs, on the non-autodiff backend.
#[derive(Debug, Clone)]
pub struct InputGradients<B: Backend> {
    pub visual:     Tensor<B, 3>,
    pub embeddings: Tensor<B, 3>,
}

impl<B: Backend> InputGradients<B> {
    /// Visual gradient summed over the feature axis, row-major [N, regions].
    pub fn region_scores(&self) -> Result<Vec<f32>, DebiasError> {
        to_host(self.visual.clone().sum_dim(2))
    }

    /// Embedding gradient summed over the embedding axis, row-major [N, L].
    pub fn token_scores(&self) -> Result<Vec<f32>, DebiasError> {
        to_host(self.embeddings.clone().sum_dim(2))
    }
}

pub fn input_gradients<B, M, H>(
    model: &M,
    head:  &H,
    batch: &VqaBatch<B>,
    epoch: usize,
) -> Result<InputGradients<B::InnerBackend>, DebiasError>
where
    B: AutodiffBackend,
    M: VqaBackbone<B>,
    H: MarginModel<B>,
{
    let positive = batch.answers.clone().greater_elem(0.0).float();
    let contributing = positive.clone().sum().into_scalar().elem::<f32>();
    if contributing == 0.0 {
        return Err(DebiasError::NoSaliencyTarget { question_ids: batch.question_ids.clone() });
    }

    let visual     = batch.visual.clone().detach().require_grad();
    let embeddings = model.embed(batch.questions.clone()).detach().require_grad();

    let (hidden, logits) = model.forward_embedded(visual.clone(), embeddings.clone());
    let (_, pred) = head.forward(hidden, logits, batch.margins.clone(), epoch, batch.answers.clone());

    let grads = (pred * positive).sum().backward();
    let visual_grad = visual
        .grad(&grads)
        .ok_or(DebiasError::GradientUnavailable { input: "visual" })?;
    let embedding_grad = embeddings
        .grad(&grads)
        .ok_or(DebiasError::GradientUnavailable { input: "embedding" })?;

    Ok(InputGradients { visual: visual_grad, embeddings: embedding_grad })
}
