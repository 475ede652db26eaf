// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Wires the data, ml and infra layers into the two things a
// user can ask for:
//
//   train_use_case.rs      — a full debiasing run with per-epoch
//                            evaluation, logs and result files
//   synthesize_use_case.rs — write a synthetic corpus to disk
//
// No tensor math here and no printing; that belongs to Layers
// 5 and 1.

/// The training workflow
pub mod train_use_case;

/// Synthetic corpus generation
pub mod synthesize_use_case;
