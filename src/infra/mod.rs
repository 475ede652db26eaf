// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything a run writes to disk:
//
//   metrics.rs — per-step and per-epoch CSV logs, plus the
//                moving-average trackers behind the progress lines
//
//   results.rs — the effective training config and the per-epoch
//                answer files
//
// Both are opened by the application layer and handed down; the
// ml layer only ever sees a `&mut MetricsLogger`.

/// Training metrics CSV logger
pub mod metrics;

/// Config and result-file writer
pub mod results;
