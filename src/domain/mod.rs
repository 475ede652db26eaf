// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer:
//
//   answer_type.rs — yes/no | number | other, and the dense
//                    category index used by the contrastive loss
//   mode.rs        — explicit train/inference mode and the
//                    generator input path
//   error.rs       — DebiasError, the batch-level failure taxonomy
//
// No Burn types live here.

pub mod answer_type;

pub mod mode;

pub mod error;

pub use answer_type::{AnswerType, CategoryIndex};
pub use error::DebiasError;
pub use mode::{GeneratorPath, Mode};
