// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and hands off to Layer 2.
//
//   1. `train`      — debiasing run with per-epoch evaluation
//   2. `synthesize` — write a synthetic corpus to disk

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, SynthesizeArgs, TrainArgs};

use crate::application::{
    synthesize_use_case::SynthesizeUseCase,
    train_use_case::{TrainConfig, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "vqa-debias",
    version = "0.1.0",
    about = "Train a VQA model with adversarial counterfactual debiasing and report per-answer-type scores."
)]
pub struct Cli {
    /// The subcommand to run (train or synthesize)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)      => run_train(args),
            Commands::Synthesize(args) => run_synthesize(&args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading training config from '{}'", path);
            TrainConfig::load(path)?
        }
        None => args.into(),
    };

    let use_case = TrainUseCase::new(config);
    let summary = use_case.execute()?;

    match summary.final_report {
        Some(report) => println!("Final evaluation: {report}"),
        None         => println!("No epochs were run."),
    }
    println!("Logs written to '{}'", use_case.config().output_dir);
    Ok(())
}

fn run_synthesize(args: &SynthesizeArgs) -> Result<()> {
    let corpus = SynthesizeUseCase::new(&args.output_dir, &args.test_split, args.into()).execute()?;
    println!(
        "Wrote {} train and {} {} samples to '{}'",
        corpus.train.len(), corpus.test.len(), args.test_split, args.output_dir
    );
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::BackendKind;

    fn train_config(args: &[&str]) -> TrainConfig {
        let cli = Cli::try_parse_from(["vqa-debias", "train"].iter().chain(args)).unwrap();
        match cli.command {
            Commands::Train(a) => a.into(),
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_flag_defaults_match_config_defaults() {
        let parsed = serde_json::to_value(train_config(&[])).unwrap();
        let defaults = serde_json::to_value(TrainConfig::default()).unwrap();
        assert_eq!(parsed, defaults);
    }

    #[test]
    fn test_switches_take_explicit_values() {
        let cfg = train_config(&["--css", "false", "--supcon", "false", "--synthetic", "--backend", "WGPU"]);
        assert!(!cfg.css);
        assert!(!cfg.supcon);
        assert!(cfg.bias_inject);
        assert!(cfg.synthetic);
        assert_eq!(cfg.backend, BackendKind::Wgpu);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["vqa-debias", "train", "--backend", "cuda"]).is_err());
    }

    #[test]
    fn test_synthesize_arguments() {
        let cli = Cli::try_parse_from(["vqa-debias", "synthesize", "--output-dir", "out", "--num-answers", "12"]).unwrap();
        let Commands::Synthesize(args) = cli.command else { panic!("expected synthesize") };
        let syn: crate::data::synthetic::SyntheticConfig = (&args).into();
        assert_eq!(args.output_dir, "out");
        assert_eq!(syn.num_answers, 12);
        assert_eq!(syn.num_number_answers, 2);
    }
}
