// ============================================================
// Layer 5 — Network Interfaces
// ============================================================
// The debiasing loop only talks to its networks through these
// traits. The reference modules in model.rs implement them for
// any Backend; a different architecture only has to do the same.

use burn::prelude::*;

use crate::domain::{GeneratorPath, Mode};

/// Output of the main model's forward pass.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    /// Joint representation, [N, H].
    pub hidden:     Tensor<B, 2>,
    /// Classification logits, [N, C].
    pub logits:     Tensor<B, 2>,
    /// Token embeddings the forward pass consumed, [N, L, E].
    pub embeddings: Tensor<B, 3>,
}

/// Main VQA model, split at the embedding lookup so saliency can be
/// taken with respect to the embeddings.
pub trait VqaBackbone<B: Backend> {
    fn embed(&self, questions: Tensor<B, 2, Int>) -> Tensor<B, 3>;

    /// Returns (hidden, logits).
    fn forward_embedded(&self, visual: Tensor<B, 3>, embeddings: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 2>);

    fn forward(&self, visual: Tensor<B, 3>, questions: Tensor<B, 2, Int>) -> BackboneOutput<B> {
        let embeddings = self.embed(questions);
        let (hidden, logits) = self.forward_embedded(visual, embeddings.clone());
        BackboneOutput { hidden, logits, embeddings }
    }
}

/// Second-stage model refining the backbone output with per-example margins.
pub trait MarginModel<B: Backend> {
    /// Returns (refined hidden [N, C], prediction [N, C]).
    fn forward(
        &self,
        hidden: Tensor<B, 2>,
        logits: Tensor<B, 2>,
        margin: Tensor<B, 2>,
        epoch:  usize,
        target: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>);
}

/// Auxiliary network that learns the dataset's shortcuts.
pub trait BiasGenerator<B: Backend> {
    /// `region_mask` is [N, regions] with 0 on suppressed regions.
    /// `generate` adds generative noise to the input encoding.
    fn forward(
        &self,
        visual:      Tensor<B, 3>,
        questions:   Tensor<B, 2, Int>,
        region_mask: Option<Tensor<B, 2>>,
        path:        GeneratorPath,
        mode:        Mode,
        generate:    bool,
    ) -> Tensor<B, 2>;
}

/// Scores how likely a prediction vector came from the main model.
pub trait Discriminator<B: Backend> {
    /// Probability in (0, 1), shape [N, 1].
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Per-batch auxiliary inputs of the margin loss.
#[derive(Debug, Clone)]
pub struct LossContext<B: Backend> {
    pub margin:             Tensor<B, 2>,
    pub bias:               Tensor<B, 2>,
    pub epoch:              usize,
    pub per_example_weight: Tensor<B, 2>,
}

/// The margin-based loss applied to the refined hidden representation.
pub trait TargetLoss<B: Backend> {
    fn loss(&self, hidden: Tensor<B, 2>, target: Tensor<B, 2>, ctx: &LossContext<B>) -> Tensor<B, 1>;
}
