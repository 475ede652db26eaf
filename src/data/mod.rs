// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From pre-extracted features on disk to tensor batches:
//
//   JSON files / synthetic corpus
//       │
//       ▼
//   CorpusLoader      → reads + validates samples against BatchLayout
//       │
//       ▼
//   VqaDataset        → implements Burn's Dataset trait
//       │
//       ▼
//   VqaBatcher        → stacks samples into VqaBatch tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the trainer / evaluator

/// Reads and writes the on-disk corpus layout
pub mod loader;

/// Seeded toy corpus with a planted language prior
pub mod synthetic;

/// VqaSample, BatchLayout and Burn's Dataset impl
pub mod dataset;

/// Implements Burn's Batcher trait for VQA batches
pub mod batcher;

/// Placeholder token resolution per dictionary version
pub mod vocab;
