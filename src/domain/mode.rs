// ============================================================
// Layer 3 — Network Call Modes
// ============================================================
// Train/inference is passed into every generator call instead of
// being a flag flipped on the module, so a call's behaviour never
// depends on which call came before it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Stochastic layers active (dropout, generative noise).
    Train,
    /// Deterministic forward pass.
    Inference,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}

/// Which input the bias generator is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorPath {
    /// Unmodified visual features and question.
    Clean,
    /// Visual features with the most salient regions masked out.
    VisualCounterfactual,
    /// Question with the most salient content words replaced.
    LexicalCounterfactual,
}
