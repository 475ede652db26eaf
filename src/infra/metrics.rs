// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Two CSV files in the run's output directory:
//
//   losses.csv   one row per training step
//   metrics.csv  one row per epoch
//
// Example metrics.csv:
//   epoch,train_loss,train_score,eval_overall,eval_yes_no,eval_number,eval_other
//   1,3.124500,0.412000,0.455000,0.701000,0.210000,0.330000
//
// The logger is opened before the run and closed after it; rows
// are buffered in between. MovingMean is the progress tracker used
// for the periodic log lines.

use anyhow::{Context, Result};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::ml::generator_step::GeneratorLossTerms;
use crate::ml::losses::MainLossTerms;

pub const LOSSES_FILE:  &str = "losses.csv";
pub const METRICS_FILE: &str = "metrics.csv";

const LOSSES_HEADER: &str =
    "epoch,batch,gen_task,gen_adversarial,gen_distillation,gen_total,margin,injection,contrastive,total,batch_score";
const METRICS_HEADER: &str =
    "epoch,train_loss,train_score,eval_overall,eval_yes_no,eval_number,eval_other";

/// Exponential moving average; the first value seeds the mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingMean {
    momentum: f64,
    value:    Option<f64>,
}

impl MovingMean {
    pub fn new(momentum: f64) -> Self {
        Self { momentum, value: None }
    }

    pub fn push(&mut self, x: f64) {
        self.value = Some(match self.value {
            None       => x,
            Some(mean) => self.momentum * mean + (1.0 - self.momentum) * x,
        });
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for MovingMean {
    fn default() -> Self {
        Self::new(0.99)
    }
}

/// Loss terms and batch score of one training step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepRecord {
    pub epoch:       usize,
    pub batch:       usize,
    pub generator:   GeneratorLossTerms,
    pub main:        MainLossTerms,
    pub batch_score: f32,
}

/// One row of metrics data for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 0)
    pub epoch: usize,

    /// Mean main-model loss over the epoch's steps
    pub train_loss: f64,

    /// Target mass at the predicted answer, averaged over training examples
    pub train_score: f64,

    pub eval_overall: f64,
    pub eval_yes_no:  f64,
    pub eval_number:  f64,
    pub eval_other:   f64,
}

impl EpochMetrics {
    /// Returns true if this epoch's evaluation beat the best so far
    pub fn is_improvement(&self, best_overall: f64) -> bool {
        self.eval_overall > best_overall
    }
}

fn open_csv(path: &Path, header: &str) -> Result<BufWriter<File>> {
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    // Header only for a fresh file so reruns append to the same log.
    if is_new {
        writeln!(writer, "{header}")?;
        tracing::debug!("Created CSV: '{}'", path.display());
    }
    Ok(writer)
}

/// Buffered CSV writer for step and epoch records.
pub struct MetricsLogger {
    dir:     PathBuf,
    losses:  BufWriter<File>,
    metrics: BufWriter<File>,
}

impl MetricsLogger {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create output directory '{}'", dir.display()))?;

        let losses  = open_csv(&dir.join(LOSSES_FILE), LOSSES_HEADER)?;
        let metrics = open_csv(&dir.join(METRICS_FILE), METRICS_HEADER)?;
        Ok(Self { dir, losses, metrics })
    }

    pub fn log_step(&mut self, r: &StepRecord) -> Result<()> {
        let (g, m) = (&r.generator, &r.main);
        writeln!(
            self.losses,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            r.epoch, r.batch,
            g.task, g.adversarial, g.distillation, g.total,
            m.margin, m.injection, m.contrastive, m.total,
            r.batch_score,
        )?;
        Ok(())
    }

    pub fn log_epoch(&mut self, m: &EpochMetrics) -> Result<()> {
        writeln!(
            self.metrics,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch,
            m.train_loss,
            m.train_score,
            m.eval_overall,
            m.eval_yes_no,
            m.eval_number,
            m.eval_other,
        )?;
        // Epoch rows reach disk even if a later epoch aborts the run.
        self.metrics.flush()?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, eval_overall={:.4}",
            m.epoch,
            m.train_loss,
            m.eval_overall,
        );
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush both files and release them.
    pub fn close(mut self) -> Result<()> {
        self.losses.flush().context("flushing losses.csv")?;
        self.metrics.flush().context("flushing metrics.csv")?;
        tracing::debug!("Closed metrics logger in '{}'", self.dir.display());
        Ok(())
    }
}
