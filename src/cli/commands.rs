// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `synthesize`, and
// their flags. Flags that default to on take an explicit value:
// `--css false`.

use clap::{ArgAction, Args, Subcommand};

use crate::application::train_use_case::{BackendKind, TrainConfig};
use crate::data::synthetic::SyntheticConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the main model with the adversarial debiasing loop
    Train(TrainArgs),

    /// Write a synthetic corpus in the on-disk dataset layout
    Synthesize(SynthesizeArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON config file or a previous run's output directory; replaces every other flag
    #[arg(long)]
    pub config: Option<String>,

    /// Directory with train.json, <test-split>.json, label2ans.json, qid2type.json
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Train on a generated corpus instead of --data-dir
    #[arg(long)]
    pub synthetic: bool,

    /// Training examples in the synthetic corpus
    #[arg(long, default_value_t = 512)]
    pub synthetic_train: usize,

    /// Evaluation examples in the synthetic corpus
    #[arg(long, default_value_t = 256)]
    pub synthetic_test: usize,

    /// Where logs, the effective config and result files go
    #[arg(long, default_value = "runs")]
    pub output_dir: String,

    /// Task name used in result file names
    #[arg(long, default_value = "vqacp")]
    pub task: String,

    /// Evaluation split file stem
    #[arg(long, default_value = "test")]
    pub test_split: String,

    /// Dictionary version; selects the default placeholder token
    #[arg(long, default_value = "v2")]
    pub version: String,

    /// Placeholder token id for lexical counterfactuals (overrides --version)
    #[arg(long)]
    pub placeholder_token: Option<u32>,

    /// Image regions per example
    #[arg(long, default_value_t = 36)]
    pub num_regions: usize,

    /// Visual feature size per region
    #[arg(long, default_value_t = 2048)]
    pub feature_dim: usize,

    /// Question length in tokens (padded)
    #[arg(long, default_value_t = 14)]
    pub max_question_len: usize,

    /// Size of the answer vocabulary
    #[arg(long, default_value_t = 2274)]
    pub num_answers: usize,

    /// Size of the question-token vocabulary
    #[arg(long, default_value_t = 20000)]
    pub vocab_size: usize,

    /// Word embedding size
    #[arg(long, default_value_t = 300)]
    pub embed_dim: usize,

    /// Joint hidden size of the main model and generator
    #[arg(long, default_value_t = 1024)]
    pub hidden_dim: usize,

    /// Hidden size of the discriminator
    #[arg(long, default_value_t = 512)]
    pub discriminator_dim: usize,

    /// Dropout probability in training mode
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Multiplier on the margin head's cosine scores
    #[arg(long, default_value_t = 16.0)]
    pub margin_scale: f64,

    /// Tensor backend
    #[arg(long, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 30)]
    pub epochs: usize,

    /// Examples per batch
    #[arg(long, default_value_t = 512)]
    pub batch_size: usize,

    /// Learning rate of the main model and margin head
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Learning rate of the bias generator
    #[arg(long, default_value_t = 1e-3)]
    pub generator_lr: f64,

    /// Gradient norm clip applied by every optimizer
    #[arg(long, default_value_t = 0.25)]
    pub grad_clip: f32,

    /// Shuffle and synthetic-corpus seed
    #[arg(long, default_value_t = 1111)]
    pub seed: u64,

    /// Train the generator on counterfactual samples
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub css: bool,

    /// Add the supervised-contrastive term
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub supcon: bool,

    /// Add the cross-entropy injection term and ensemble the heads
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub bias_inject: bool,

    /// Same effect as --bias-inject on the loss and ensemble
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub learnable_margins: bool,

    /// Weight of the margin head in the evaluation ensemble
    #[arg(long, default_value_t = 0.5)]
    pub alpha: f32,

    /// Temperature on the classifier logits in the evaluation ensemble
    #[arg(long, default_value_t = 0.2)]
    pub temp: f32,

    /// Weight of the visual counterfactual in the generator blend
    #[arg(long, default_value_t = 0.5)]
    pub generator_blend: f32,

    /// Weight of the generator's distillation term
    #[arg(long, default_value_t = 5.0)]
    pub distillation_weight: f32,

    /// Regions with the highest hint score considered for masking
    #[arg(long, default_value_t = 18)]
    pub hint_candidates: usize,

    /// Regions masked per example
    #[arg(long, default_value_t = 3)]
    pub masked_regions: usize,

    /// Content tokens replaced per question
    #[arg(long, default_value_t = 5)]
    pub masked_tokens: usize,

    /// Write a result file after every evaluation
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub write_results: bool,

    /// Progress line every N batches (0 disables)
    #[arg(long, default_value_t = 50)]
    pub log_every: usize,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_dir:            a.data_dir,
            synthetic:           a.synthetic,
            synthetic_train:     a.synthetic_train,
            synthetic_test:      a.synthetic_test,
            output_dir:          a.output_dir,
            task:                a.task,
            test_split:          a.test_split,
            version:             a.version,
            placeholder_token:   a.placeholder_token,
            num_regions:         a.num_regions,
            feature_dim:         a.feature_dim,
            max_question_len:    a.max_question_len,
            num_answers:         a.num_answers,
            vocab_size:          a.vocab_size,
            embed_dim:           a.embed_dim,
            hidden_dim:          a.hidden_dim,
            discriminator_dim:   a.discriminator_dim,
            dropout:             a.dropout,
            margin_scale:        a.margin_scale,
            backend:             a.backend,
            epochs:              a.epochs,
            batch_size:          a.batch_size,
            lr:                  a.lr,
            generator_lr:        a.generator_lr,
            grad_clip:           a.grad_clip,
            seed:                a.seed,
            css:                 a.css,
            supcon:              a.supcon,
            bias_inject:         a.bias_inject,
            learnable_margins:   a.learnable_margins,
            alpha:               a.alpha,
            temp:                a.temp,
            generator_blend:     a.generator_blend,
            distillation_weight: a.distillation_weight,
            hint_candidates:     a.hint_candidates,
            masked_regions:      a.masked_regions,
            masked_tokens:       a.masked_tokens,
            write_results:       a.write_results,
            log_every:           a.log_every,
        }
    }
}

/// All arguments for the `synthesize` command
#[derive(Args, Debug)]
pub struct SynthesizeArgs {
    /// Directory to write the corpus files into
    #[arg(long, default_value = "data/synthetic")]
    pub output_dir: String,

    /// File stem of the evaluation split
    #[arg(long, default_value = "test")]
    pub test_split: String,

    #[arg(long, default_value_t = 512)]
    pub train_samples: usize,

    #[arg(long, default_value_t = 256)]
    pub test_samples: usize,

    #[arg(long, default_value_t = 36)]
    pub num_regions: usize,

    #[arg(long, default_value_t = 8)]
    pub feature_dim: usize,

    #[arg(long, default_value_t = 8)]
    pub max_question_len: usize,

    #[arg(long, default_value_t = 8)]
    pub num_answers: usize,

    /// Answers after yes/no that count as "number"
    #[arg(long, default_value_t = 2)]
    pub num_number_answers: usize,

    #[arg(long, default_value_t = 64)]
    pub vocab_size: usize,

    /// How often the training question names its answer (inverted at test)
    #[arg(long, default_value_t = 0.8)]
    pub prior_strength: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<&SynthesizeArgs> for SyntheticConfig {
    fn from(a: &SynthesizeArgs) -> Self {
        SyntheticConfig {
            train_samples:      a.train_samples,
            test_samples:       a.test_samples,
            num_regions:        a.num_regions,
            feature_dim:        a.feature_dim,
            max_question_len:   a.max_question_len,
            num_answers:        a.num_answers,
            num_number_answers: a.num_number_answers,
            vocab_size:         a.vocab_size,
            prior_strength:     a.prior_strength,
            seed:               a.seed,
        }
    }
}
