// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a debiasing run in order:
//
//   Step 1: Load or generate the corpus   (Layer 4 - data)
//   Step 2: Resolve the placeholder token (Layer 4 - data)
//   Step 3: Save config, open the logs    (Layer 6 - infra)
//   Step 4: Build the four networks       (Layer 5 - ml)
//   Step 5: Build the optimizers          (Layer 5 - ml)
//   Step 6: Build the data loaders        (Layer 4 - data)
//   Step 7: Epoch loop: train, evaluate,
//           log, write results            (Layer 5 + 6)
//
// The loop is generic over the autodiff backend; `execute`
// picks ndarray or wgpu from the config.

use anyhow::{bail, Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr};

use crate::data::{
    batcher::VqaBatcher,
    dataset::{BatchLayout, VqaDataset},
    loader::{CorpusLoader, VqaCorpus},
    synthetic::{SyntheticConfig, SyntheticCorpus},
    vocab::VocabularyConfig,
};
use crate::infra::{
    metrics::{EpochMetrics, MetricsLogger},
    results::RunArtifacts,
};
use crate::ml::{
    counterfactual::CounterfactualConfig,
    ensemble::HeadEnsemble,
    evaluator::{evaluate, EvalOptions, ScoreReport},
    generator_step::GeneratorSettings,
    losses::{MainLossSwitches, MarginCrossEntropy},
    model::{BaselineVqa, CosineMarginHead, NetworkConfig, ShortcutGenerator},
    trainer::{DebiasTrainer, Networks, TrainSettings},
};

// ─── Backend selection ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ndarray" => Ok(Self::NdArray),
            "wgpu"    => Ok(Self::Wgpu),
            other     => Err(format!("unknown backend '{other}' (expected ndarray or wgpu)")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NdArray => "ndarray",
            Self::Wgpu    => "wgpu",
        })
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Every knob of a run. Serialisable so the effective config can be
// written next to the logs and reloaded with `--config`; missing
// fields in a config file fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    // Data
    pub data_dir:          String,
    pub synthetic:         bool,
    pub synthetic_train:   usize,
    pub synthetic_test:    usize,
    pub output_dir:        String,
    pub task:              String,
    pub test_split:        String,
    pub version:           String,
    pub placeholder_token: Option<u32>,

    // Geometry
    pub num_regions:       usize,
    pub feature_dim:       usize,
    pub max_question_len:  usize,
    pub num_answers:       usize,
    pub vocab_size:        usize,

    // Networks
    pub embed_dim:         usize,
    pub hidden_dim:        usize,
    pub discriminator_dim: usize,
    pub dropout:           f64,
    pub margin_scale:      f64,

    // Optimisation
    pub backend:           BackendKind,
    pub epochs:            usize,
    pub batch_size:        usize,
    pub lr:                f64,
    pub generator_lr:      f64,
    pub grad_clip:         f32,
    pub seed:              u64,

    // Debiasing
    pub css:                 bool,
    pub supcon:              bool,
    pub bias_inject:         bool,
    pub learnable_margins:   bool,
    pub alpha:               f32,
    pub temp:                f32,
    pub generator_blend:     f32,
    pub distillation_weight: f32,
    pub hint_candidates:     usize,
    pub masked_regions:      usize,
    pub masked_tokens:       usize,

    // Output
    pub write_results: bool,
    pub log_every:     usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:          "data".to_string(),
            synthetic:         false,
            synthetic_train:   512,
            synthetic_test:    256,
            output_dir:        "runs".to_string(),
            task:              "vqacp".to_string(),
            test_split:        "test".to_string(),
            version:           "v2".to_string(),
            placeholder_token: None,

            num_regions:       36,
            feature_dim:       2048,
            max_question_len:  14,
            num_answers:       2274,
            vocab_size:        20000,

            embed_dim:         300,
            hidden_dim:        1024,
            discriminator_dim: 512,
            dropout:           0.2,
            margin_scale:      16.0,

            backend:           BackendKind::NdArray,
            epochs:            30,
            batch_size:        512,
            lr:                1e-3,
            generator_lr:      1e-3,
            grad_clip:         0.25,
            seed:              1111,

            css:                 true,
            supcon:              true,
            bias_inject:         true,
            learnable_margins:   true,
            alpha:               0.5,
            temp:                0.2,
            generator_blend:     0.5,
            distillation_weight: 5.0,
            hint_candidates:     18,
            masked_regions:      3,
            masked_tokens:       5,

            write_results: true,
            log_every:     50,
        }
    }
}

impl TrainConfig {
    /// Load a JSON config file, or the config a previous run saved
    /// when `path` is that run's output directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return RunArtifacts::new(path)?.load_config();
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Cannot parse config '{}'", path.display()))
    }

    pub fn layout(&self) -> BatchLayout {
        BatchLayout {
            num_regions:      self.num_regions,
            feature_dim:      self.feature_dim,
            max_question_len: self.max_question_len,
            num_answers:      self.num_answers,
        }
    }

    /// Synthetic corpus with this config's geometry.
    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            train_samples:    self.synthetic_train,
            test_samples:     self.synthetic_test,
            num_regions:      self.num_regions,
            feature_dim:      self.feature_dim,
            max_question_len: self.max_question_len,
            num_answers:      self.num_answers,
            vocab_size:       self.vocab_size,
            seed:             self.seed,
            ..Default::default()
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig::new(self.vocab_size, self.feature_dim, self.num_answers)
            .with_embed_dim(self.embed_dim)
            .with_hidden_dim(self.hidden_dim)
            .with_discriminator_dim(self.discriminator_dim)
            .with_dropout(self.dropout)
            .with_margin_scale(self.margin_scale)
    }

    pub fn ensemble(&self) -> HeadEnsemble {
        HeadEnsemble::new(self.bias_inject, self.learnable_margins, self.alpha, self.temp)
    }

    pub fn train_settings(&self, vocab: &VocabularyConfig) -> TrainSettings {
        TrainSettings {
            css: self.css,
            main_loss: MainLossSwitches {
                inject:      self.bias_inject || self.learnable_margins,
                contrastive: self.supcon,
                temperature: 1.0,
            },
            ensemble: self.ensemble(),
            counterfactual: CounterfactualConfig {
                hint_candidates:   self.hint_candidates,
                masked_regions:    self.masked_regions,
                masked_tokens:     self.masked_tokens,
                placeholder_token: vocab.placeholder_token,
            },
            generator: GeneratorSettings {
                blend:               self.generator_blend,
                distillation_weight: self.distillation_weight,
                learning_rate:       self.generator_lr,
                grad_clip:           self.grad_clip,
            },
            learning_rate: self.lr,
            grad_clip:     self.grad_clip,
            log_every:     self.log_every,
        }
    }
}

/// What a finished run reports back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub epochs:       Vec<EpochMetrics>,
    pub final_report: Option<ScoreReport>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Run on the configured backend.
    pub fn execute(&self) -> Result<RunSummary> {
        match self.config.backend {
            BackendKind::NdArray => {
                let device = NdArrayDevice::default();
                tracing::info!("Using NdArray device: {:?}", device);
                self.run::<Autodiff<NdArray<f32>>>(device)
            }
            BackendKind::Wgpu => {
                let device = WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.run::<Autodiff<Wgpu>>(device)
            }
        }
    }

    pub fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<RunSummary> {
        let cfg = &self.config;
        if cfg.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }

        // ── Step 1-2: Corpus and vocabulary ───────────────────────────────────
        let (corpus, vocab) = self.load_corpus()?;
        check_tokens(&corpus, cfg.vocab_size)?;
        if vocab.placeholder_token as usize >= cfg.vocab_size {
            bail!(
                "placeholder token {} is outside the {}-token vocabulary",
                vocab.placeholder_token, cfg.vocab_size
            );
        }
        let layout = cfg.layout();

        // ── Step 3: Config and logs ───────────────────────────────────────────
        let artifacts = RunArtifacts::new(&cfg.output_dir)?;
        artifacts.save_config(cfg)?;
        let mut logger = MetricsLogger::open(&cfg.output_dir)?;

        // ── Step 4: Networks ──────────────────────────────────────────────────
        let net = cfg.network_config();
        let networks = Networks {
            model:         net.init_backbone::<B>(&device),
            head:          net.init_margin_head::<B>(&device),
            generator:     net.init_generator::<B>(&device),
            discriminator: net.init_discriminator::<B>(&device),
        };
        tracing::info!(
            "Networks ready: hidden_dim={}, answers={}, css={}, supcon={}, inject={}",
            cfg.hidden_dim, cfg.num_answers, cfg.css, cfg.supcon, cfg.bias_inject || cfg.learnable_margins,
        );

        // ── Step 5: Optimisers ────────────────────────────────────────────────
        // Each network gets its own Adam; the trainer clips each network's
        // gradients to a global norm of `grad_clip` before stepping.
        let adam = AdamConfig::new().with_epsilon(1e-8);
        let mut trainer = DebiasTrainer::new(
            networks,
            adam.init::<B, BaselineVqa<B>>(),
            adam.init::<B, CosineMarginHead<B>>(),
            adam.init::<B, ShortcutGenerator<B>>(),
            Box::new(MarginCrossEntropy),
            cfg.train_settings(&vocab),
        );

        // ── Step 6: Data loaders ──────────────────────────────────────────────
        // Training batches carry autodiff tensors; evaluation runs on the
        // inner backend to match `model.valid()`.
        let train_loader = DataLoaderBuilder::new(VqaBatcher::<B>::new(device.clone(), layout))
            .batch_size(cfg.batch_size)
            .shuffle(cfg.seed)
            .num_workers(1)
            .build(VqaDataset::new(corpus.train));
        let eval_loader = DataLoaderBuilder::new(VqaBatcher::<B::InnerBackend>::new(device.clone(), layout))
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .build(VqaDataset::new(corpus.test));

        // ── Step 7: Epoch loop ────────────────────────────────────────────────
        let mut epochs = Vec::with_capacity(cfg.epochs);
        let mut final_report = None;
        let mut best_overall = f64::NEG_INFINITY;

        for epoch in 0..cfg.epochs {
            let summary = trainer.train_epoch(train_loader.iter(), epoch, &mut logger)?;

            let model_valid = trainer.networks.model.valid();
            let head_valid  = trainer.networks.head.valid();
            let opts = EvalOptions {
                qid2type:        &corpus.qid2type,
                label2ans:       &corpus.label2ans,
                ensemble:        cfg.ensemble(),
                epoch,
                collect_results: cfg.write_results,
            };
            let eval = evaluate(&model_valid, &head_valid, eval_loader.iter(), &opts)
                .with_context(|| format!("evaluation after epoch {epoch}"))?;

            let metrics = EpochMetrics {
                epoch,
                train_loss:   summary.mean_loss,
                train_score:  summary.score,
                eval_overall: eval.report.overall,
                eval_yes_no:  eval.report.yes_no.score,
                eval_number:  eval.report.number.score,
                eval_other:   eval.report.other.score,
            };
            if metrics.is_improvement(best_overall) {
                best_overall = metrics.eval_overall;
            }
            logger.log_epoch(&metrics)?;

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | train_score={:.2}% | {}",
                epoch + 1, cfg.epochs, summary.mean_loss, summary.score * 100.0, eval.report,
            );

            if cfg.write_results {
                artifacts.write_results(&cfg.task, &cfg.test_split, &cfg.version, epoch, &eval.results)?;
            }
            epochs.push(metrics);
            final_report = Some(eval.report);
        }

        logger.close()?;
        if !epochs.is_empty() {
            tracing::info!("Training complete. Best overall score {:.2}%", best_overall * 100.0);
        }
        Ok(RunSummary { epochs, final_report })
    }

    fn load_corpus(&self) -> Result<(VqaCorpus, VocabularyConfig)> {
        let cfg = &self.config;
        if cfg.synthetic {
            let syn = cfg.synthetic_config();
            syn.validate()?;
            let placeholder = cfg.placeholder_token.unwrap_or_else(|| syn.placeholder_token());
            let vocab = VocabularyConfig::resolve(&cfg.version, Some(placeholder))?;
            tracing::info!("Generating synthetic corpus (seed {})", syn.seed);
            Ok((SyntheticCorpus::generate(&syn).into(), vocab))
        } else {
            let vocab = VocabularyConfig::resolve(&cfg.version, cfg.placeholder_token)?;
            let corpus = CorpusLoader::new(&cfg.data_dir).load(&cfg.test_split, &cfg.layout())?;
            Ok((corpus, vocab))
        }
    }
}

/// Every question token must index into the embedding table.
fn check_tokens(corpus: &VqaCorpus, vocab_size: usize) -> Result<()> {
    for s in corpus.train.iter().chain(corpus.test.iter()) {
        if let Some(&token) = s.question.iter().find(|&&t| t as usize >= vocab_size) {
            bail!("question {}: token {} is outside the {}-token vocabulary", s.question_id, token, vocab_size);
        }
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parses_case_insensitively() {
        assert_eq!("NdArray".parse::<BackendKind>().unwrap(), BackendKind::NdArray);
        assert_eq!("wgpu".parse::<BackendKind>().unwrap(), BackendKind::Wgpu);
        assert!("cuda".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "epochs": 2, "backend": "wgpu", "supcon": false }"#).unwrap();

        let cfg = TrainConfig::load(&path).unwrap();
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.backend, BackendKind::Wgpu);
        assert!(!cfg.supcon);
        assert_eq!(cfg.hint_candidates, 18);
        assert_eq!(cfg.grad_clip, 0.25);
    }

    #[test]
    fn test_config_reloads_from_previous_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let saved = TrainConfig { epochs: 4, alpha: 0.7, task: "vqa2".into(), ..Default::default() };
        RunArtifacts::new(dir.path()).unwrap().save_config(&saved).unwrap();

        let cfg = TrainConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.epochs, 4);
        assert_eq!(cfg.alpha, 0.7);
        assert_eq!(cfg.task, "vqa2");
    }

    #[test]
    fn test_settings_follow_flags() {
        let cfg = TrainConfig { bias_inject: false, learnable_margins: false, ..Default::default() };
        let vocab = VocabularyConfig::resolve("v1", None).unwrap();
        let s = cfg.train_settings(&vocab);
        assert!(!s.main_loss.inject);
        assert!(!s.ensemble.enabled);
        assert_eq!(s.counterfactual.placeholder_token, 18329);
        assert_eq!(s.generator.distillation_weight, 5.0);
        assert_eq!(s.grad_clip, 0.25);
        assert_eq!(s.generator.grad_clip, 0.25);
    }

    #[test]
    fn test_token_outside_vocabulary_is_rejected() {
        let cfg = TrainConfig {
            synthetic: true, synthetic_train: 4, synthetic_test: 4,
            feature_dim: 4, num_answers: 6, vocab_size: 40,
            ..Default::default()
        };
        let corpus: VqaCorpus = SyntheticCorpus::generate(&cfg.synthetic_config()).into();
        assert!(check_tokens(&corpus, 40).is_ok());
        assert!(check_tokens(&corpus, 2).is_err());
    }
}
