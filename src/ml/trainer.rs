// ============================================================
// Layer 5 — Debiasing Training Loop
// ============================================================
// One step, in order:
//
//   1. saliency on a detached copy of the inputs   (css only)
//   2. counterfactual synthesis                    (css only)
//   3. main model + margin head forward
//   4. generator update against the detached head output,
//      then its clean inference pass → bias prediction
//   5. target reweighting → a', gt
//   6. main loss → backward → per-network global-norm clip →
//      model and head optimizer steps
//   7. training score of the (ensembled) prediction against a'
//
// The two backward passes share no graph: the generator only
// ever sees detached main-model tensors. Each optimizer is fed
// the gradients of its own network only, so the discriminator
// receives none and stays fixed.

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::VqaBatch;
use crate::domain::{DebiasError, Mode};
use crate::infra::metrics::{MetricsLogger, MovingMean, StepRecord};
use crate::ml::clip::clip_global_norm;
use crate::ml::counterfactual::{synthesize, CounterfactualConfig};
use crate::ml::ensemble::HeadEnsemble;
use crate::ml::generator_step::{generator_step, GeneratorLossTerms, GeneratorSettings};
use crate::ml::losses::{compose_main_loss, MainLossInputs, MainLossSwitches, MainLossTerms};
use crate::ml::ops::{scalar, score_at_argmax};
use crate::ml::reweight::reweight_with_labels;
use crate::ml::saliency::input_gradients;
use crate::ml::traits::{BiasGenerator, Discriminator, LossContext, MarginModel, TargetLoss, VqaBackbone};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainSettings {
    pub css:            bool,
    pub main_loss:      MainLossSwitches,
    pub ensemble:       HeadEnsemble,
    pub counterfactual: CounterfactualConfig,
    pub generator:      GeneratorSettings,
    pub learning_rate:  f64,
    /// Global gradient norm cap per network update (0 = off).
    pub grad_clip:      f32,
    /// Info-level progress line every this many batches (0 = never).
    pub log_every:      usize,
}

/// The four networks the loop updates or consults.
#[derive(Debug, Clone)]
pub struct Networks<M, H, G, D> {
    pub model:         M,
    pub head:          H,
    pub generator:     G,
    pub discriminator: D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub generator:   GeneratorLossTerms,
    pub main:        MainLossTerms,
    /// Sum over the batch of the target mass at the predicted answer.
    pub score_sum:   f32,
    pub examples:    usize,
}

impl StepOutcome {
    pub fn batch_score(&self) -> f32 {
        if self.examples == 0 { 0.0 } else { self.score_sum / self.examples as f32 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub steps:      usize,
    pub examples:   usize,
    /// Mean main loss over steps.
    pub mean_loss:  f64,
    /// Example-weighted training score.
    pub score:      f64,
    pub loss_trend:  Option<f64>,
    pub score_trend: Option<f64>,
}

pub struct DebiasTrainer<B, M, H, G, D, OM, OH, OG>
where
    B: AutodiffBackend,
{
    pub networks:    Networks<M, H, G, D>,
    optim_model:     OM,
    optim_head:      OH,
    optim_generator: OG,
    loss_fn:         Box<dyn TargetLoss<B>>,
    settings:        TrainSettings,
}

impl<B, M, H, G, D, OM, OH, OG> DebiasTrainer<B, M, H, G, D, OM, OH, OG>
where
    B:  AutodiffBackend,
    M:  VqaBackbone<B> + AutodiffModule<B>,
    H:  MarginModel<B> + AutodiffModule<B>,
    G:  BiasGenerator<B> + AutodiffModule<B>,
    D:  Discriminator<B>,
    OM: Optimizer<M, B>,
    OH: Optimizer<H, B>,
    OG: Optimizer<G, B>,
{
    pub fn new(
        networks:        Networks<M, H, G, D>,
        optim_model:     OM,
        optim_head:      OH,
        optim_generator: OG,
        loss_fn:         Box<dyn TargetLoss<B>>,
        settings:        TrainSettings,
    ) -> Self {
        Self { networks, optim_model, optim_head, optim_generator, loss_fn, settings }
    }

    pub fn settings(&self) -> &TrainSettings {
        &self.settings
    }

    pub fn step(&mut self, batch: &VqaBatch<B>, epoch: usize) -> Result<StepOutcome, DebiasError> {
        batch.validate()?;
        let s = self.settings;

        // ── Step 1-2: counterfactuals ─────────────────────────────────────────
        let counterfactuals = if s.css {
            let grads = input_gradients(&self.networks.model, &self.networks.head, batch, epoch)?;
            Some(synthesize(batch, &grads, &s.counterfactual)?)
        } else {
            None
        };

        // ── Step 3: main forward ──────────────────────────────────────────────
        let out = self.networks.model.forward(batch.visual.clone(), batch.questions.clone());
        let (refined, pred) = self.networks.head.forward(
            out.hidden.clone(),
            out.logits.clone(),
            batch.margins.clone(),
            epoch,
            batch.answers.clone(),
        );

        // ── Step 4: generator ─────────────────────────────────────────────────
        let generated = generator_step(
            self.networks.generator.clone(),
            &self.networks.discriminator,
            &mut self.optim_generator,
            batch,
            refined.clone().detach(),
            counterfactuals.as_ref(),
            &s.generator,
        )?;
        self.networks.generator = generated.generator;

        // ── Step 5: reweighting ───────────────────────────────────────────────
        let reweighted = reweight_with_labels(batch.answers.clone(), generated.bias_prediction)?;

        // ── Step 6: main loss and update ──────────────────────────────────────
        let ctx = LossContext {
            margin:             batch.margins.clone(),
            bias:               batch.bias.clone(),
            epoch,
            per_example_weight: batch.reliability.clone(),
        };
        let main = compose_main_loss(
            self.loss_fn.as_ref(),
            MainLossInputs {
                refined_hidden:    refined,
                logits:            out.logits.clone(),
                pre_margin_hidden: out.hidden,
                target:            reweighted.target.clone(),
                pseudo_labels:     &reweighted.pseudo_labels,
                ctx,
            },
            &s.main_loss,
        )?;

        let mut grads = main.loss.backward();
        let model_grads = GradientsParams::from_module(&mut grads, &self.networks.model);
        let head_grads  = GradientsParams::from_module(&mut grads, &self.networks.head);
        let (model_grads, model_norm) = clip_global_norm(&self.networks.model, model_grads, s.grad_clip);
        let (head_grads, head_norm)   = clip_global_norm(&self.networks.head, head_grads, s.grad_clip);
        tracing::trace!(model_norm, head_norm, "main gradients");
        self.networks.model = self.optim_model.step(s.learning_rate, self.networks.model.clone(), model_grads);
        self.networks.head  = self.optim_head.step(s.learning_rate, self.networks.head.clone(), head_grads);

        // ── Step 7: training score ────────────────────────────────────────────
        let final_pred = s.ensemble.combine(out.logits.detach(), pred.detach(), Mode::Train);
        let score_sum = scalar(score_at_argmax(final_pred, reweighted.target.detach()).sum());

        Ok(StepOutcome {
            generator: generated.terms,
            main:      main.terms,
            score_sum,
            examples:  batch.len(),
        })
    }

    /// Run `step` over every batch, logging each to `logger`. A failing
    /// batch aborts the epoch with its index and question ids attached.
    pub fn train_epoch<I>(&mut self, batches: I, epoch: usize, logger: &mut MetricsLogger) -> Result<EpochSummary>
    where
        I: IntoIterator<Item = VqaBatch<B>>,
    {
        let mut loss_trk  = MovingMean::default();
        let mut score_trk = MovingMean::default();
        let mut loss_sum  = 0.0f64;
        let mut score_sum = 0.0f64;
        let mut steps     = 0usize;
        let mut examples  = 0usize;

        for (index, batch) in batches.into_iter().enumerate() {
            let outcome = self
                .step(&batch, epoch)
                .with_context(|| format!("epoch {epoch}, batch {index} (questions {:?})", batch.question_ids))?;

            loss_trk.push(outcome.main.total as f64);
            score_trk.push(outcome.batch_score() as f64);
            loss_sum  += outcome.main.total as f64;
            score_sum += outcome.score_sum as f64;
            steps     += 1;
            examples  += outcome.examples;

            logger.log_step(&StepRecord {
                epoch,
                batch:       index,
                generator:   outcome.generator,
                main:        outcome.main,
                batch_score: outcome.batch_score(),
            })?;

            tracing::debug!(
                epoch, batch = index,
                g_loss = outcome.generator.total,
                loss = outcome.main.total,
                score = outcome.batch_score(),
                "step"
            );
            if self.settings.log_every > 0 && (index + 1) % self.settings.log_every == 0 {
                tracing::info!(
                    "epoch {} batch {:>5} | loss={:.4} | score={:.4}",
                    epoch,
                    index + 1,
                    loss_trk.value().unwrap_or(f64::NAN),
                    score_trk.value().unwrap_or(f64::NAN),
                );
            }
        }

        if steps == 0 {
            tracing::warn!("epoch {} had no training batches", epoch);
        }

        Ok(EpochSummary {
            steps,
            examples,
            mean_loss:   if steps > 0 { loss_sum / steps as f64 } else { f64::NAN },
            score:       if examples > 0 { score_sum / examples as f64 } else { 0.0 },
            loss_trend:  loss_trk.value(),
            score_trend: score_trk.value(),
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::losses::MarginCrossEntropy;
    use crate::ml::model::{BaselineVqa, CosineMarginHead, PredictionDiscriminator, ShortcutGenerator};
    use crate::ml::ops::to_host;
    use crate::ml::test_support::{network_config, synthetic_config, train_batch, TestAutodiff};
    use burn::optim::AdamConfig;

    fn settings(css: bool, supcon: bool, inject: bool) -> TrainSettings {
        TrainSettings {
            css,
            main_loss:      MainLossSwitches { inject, contrastive: supcon, temperature: 1.0 },
            ensemble:       HeadEnsemble::new(inject, false, 0.5, 1.0),
            counterfactual: CounterfactualConfig::new(39),
            generator:      GeneratorSettings::default(),
            learning_rate:  1e-3,
            grad_clip:      0.25,
            log_every:      0,
        }
    }

    fn trainer(s: TrainSettings) -> DebiasTrainer<
        TestAutodiff,
        BaselineVqa<TestAutodiff>,
        CosineMarginHead<TestAutodiff>,
        ShortcutGenerator<TestAutodiff>,
        PredictionDiscriminator<TestAutodiff>,
        impl Optimizer<BaselineVqa<TestAutodiff>, TestAutodiff>,
        impl Optimizer<CosineMarginHead<TestAutodiff>, TestAutodiff>,
        impl Optimizer<ShortcutGenerator<TestAutodiff>, TestAutodiff>,
    > {
        let device = Default::default();
        let net = network_config(&synthetic_config());
        let networks = Networks {
            model:         net.init_backbone(&device),
            head:          net.init_margin_head(&device),
            generator:     net.init_generator(&device),
            discriminator: net.init_discriminator(&device),
        };
        DebiasTrainer::new(
            networks,
            AdamConfig::new().init::<TestAutodiff, BaselineVqa<TestAutodiff>>(),
            AdamConfig::new().init::<TestAutodiff, CosineMarginHead<TestAutodiff>>(),
            AdamConfig::new().init::<TestAutodiff, ShortcutGenerator<TestAutodiff>>(),
            Box::new(MarginCrossEntropy),
            s,
        )
    }

    #[test]
    fn test_full_step_updates_model_but_not_discriminator() {
        let mut t = trainer(settings(true, true, true));
        let batch = train_batch::<TestAutodiff>(8);

        let model_before = to_host(t.networks.model.classifier.weight.val()).unwrap();
        let disc_before  = to_host(t.networks.discriminator.output.weight.val()).unwrap();

        let out = t.step(&batch, 0).unwrap();

        assert_ne!(to_host(t.networks.model.classifier.weight.val()).unwrap(), model_before);
        assert_eq!(to_host(t.networks.discriminator.output.weight.val()).unwrap(), disc_before);
        assert_eq!(out.examples, 8);
        assert!(out.main.total.is_finite());
        assert!(out.main.contrastive != 0.0);
        assert!((0.0..=1.0).contains(&out.batch_score()));
    }

    #[test]
    fn test_plain_step_without_debiasing_terms() {
        let mut t = trainer(settings(false, false, false));
        let out = t.step(&train_batch::<TestAutodiff>(4), 1).unwrap();
        assert_eq!(out.main.injection, 0.0);
        assert_eq!(out.main.contrastive, 0.0);
    }

    #[test]
    fn test_single_label_batch_fails_with_supcon() {
        let mut t = trainer(settings(false, true, false));
        // Synthetic labels cycle through the answers, so one example has one label.
        let err = t.step(&train_batch::<TestAutodiff>(1), 0).unwrap_err();
        assert!(matches!(err, DebiasError::DegenerateContrastiveBatch { .. }));
    }

    #[test]
    fn test_epoch_logs_one_row_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = MetricsLogger::open(dir.path()).unwrap();
        let mut t = trainer(settings(true, false, true));
        let batches = vec![train_batch::<TestAutodiff>(4), train_batch::<TestAutodiff>(6)];

        let summary = t.train_epoch(batches, 0, &mut logger).unwrap();
        logger.close().unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.examples, 10);
        assert!(summary.mean_loss.is_finite());
        let losses = std::fs::read_to_string(dir.path().join(crate::infra::metrics::LOSSES_FILE)).unwrap();
        assert_eq!(losses.lines().count(), 3);
    }
}
