// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn-specific debiasing code lives here. The data layer
// only builds tensors; the application layer only wires backends,
// optimizers and loaders together.
//
// What's in this layer:
//
//   traits.rs         — network interfaces the loop is written against
//   model.rs          — reference networks implementing those traits
//   ops.rs            — tensor helpers shared by losses and scoring
//   clip.rs           — global gradient norm clipping per network
//
//   saliency.rs       — input-gradient attribution
//   counterfactual.rs — masked-region and masked-token copies of a batch
//   generator_step.rs — adversarial bias generator update
//   reweight.rs       — generator-aware target reweighting
//   losses.rs         — margin, injection and contrastive main loss
//   ensemble.rs       — classifier / margin head combination
//
//   trainer.rs        — the per-batch debiasing step and epoch loop
//   evaluator.rs      — per-answer-type scoring and result entries
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Network traits consumed by the training loop
pub mod traits;

/// Reference main model, margin head, generator and discriminator
pub mod model;

pub mod ops;

/// Global-norm gradient clipping
pub mod clip;

pub mod saliency;
pub mod counterfactual;
pub mod generator_step;
pub mod reweight;
pub mod losses;
pub mod ensemble;

/// Full debiasing training step and epoch loop
pub mod trainer;

/// Evaluation with per-answer-type score aggregation
pub mod evaluator;

#[cfg(test)]
mod test_support;
