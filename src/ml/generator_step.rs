// ============================================================
// Layer 5 — Adversarial Bias Generator Step
// ============================================================
// One generator update followed by the inference pass whose output
// drives target reweighting:
//
//   p_g   = generator(counterfactual or clean inputs, Train)
//   task  = BCE_logits(p_g, a) · C
//   adv   = BCE(D(p_g), 1) + BCE(D(h), 1)
//   dist  = KL(softmax(h) ‖ softmax(p_g))          (batch mean)
//   total = task + adv + w_dist · dist
//
//   backward(total) → clip to global norm → optimizer step on the
//   generator only
//   bias_prediction = generator(clean inputs, Inference).detach()
//
// h is the margin model's refined output, detached before it gets
// here: the generator's backward never reaches the main networks.
// The discriminator is scored but has no optimizer.

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::log_softmax, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::VqaBatch;
use crate::domain::{DebiasError, GeneratorPath, Mode};
use crate::ml::clip::clip_global_norm;
use crate::ml::counterfactual::Counterfactuals;
use crate::ml::ops::{bce, bce_with_logits, kl_div_batchmean, scalar};
use crate::ml::traits::{BiasGenerator, Discriminator};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Weight of the visual-counterfactual prediction in the blend.
    pub blend:               f32,
    pub distillation_weight: f32,
    pub learning_rate:       f64,
    /// Global gradient norm cap for the generator update (0 = off).
    pub grad_clip:           f32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self { blend: 0.5, distillation_weight: 5.0, learning_rate: 1e-3, grad_clip: 0.25 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorLossTerms {
    pub task:         f32,
    pub adversarial:  f32,
    pub distillation: f32,
    pub total:        f32,
}

pub struct GeneratorStep<B: AutodiffBackend, G> {
    pub generator:       G,
    /// Clean-input prediction after the update, detached, [N, C].
    pub bias_prediction: Tensor<B, 2>,
    pub terms:           GeneratorLossTerms,
}

/// Training-mode generator prediction. With counterfactuals the two
/// corrupted paths are blended; otherwise the clean inputs are used once.
pub fn generator_prediction<B, G>(
    generator:       &G,
    batch:           &VqaBatch<B>,
    counterfactuals: Option<&Counterfactuals<B>>,
    blend:           f32,
) -> Tensor<B, 2>
where
    B: Backend,
    G: BiasGenerator<B>,
{
    match counterfactuals {
        Some(cf) => {
            let visual_path = generator.forward(
                batch.visual.clone(),
                batch.questions.clone(),
                Some(cf.region_mask.clone()),
                GeneratorPath::VisualCounterfactual,
                Mode::Train,
                true,
            );
            let lexical_path = generator.forward(
                batch.visual.clone(),
                cf.questions.clone(),
                None,
                GeneratorPath::LexicalCounterfactual,
                Mode::Train,
                false,
            );
            visual_path.mul_scalar(blend) + lexical_path.mul_scalar(1.0 - blend)
        }
        None => generator.forward(
            batch.visual.clone(),
            batch.questions.clone(),
            None,
            GeneratorPath::Clean,
            Mode::Train,
            true,
        ),
    }
}

pub fn generator_loss<B, D>(
    discriminator: &D,
    prediction:    Tensor<B, 2>,
    target:        Tensor<B, 2>,
    main_output:   Tensor<B, 2>,
    distillation_weight: f32,
) -> (Tensor<B, 1>, GeneratorLossTerms)
where
    B: Backend,
    D: Discriminator<B>,
{
    let [n, c] = prediction.dims();
    let valid = Tensor::<B, 2>::ones([n, 1], &prediction.device());
    let main_output = main_output.detach();

    let task = bce_with_logits(prediction.clone(), target).mul_scalar(c as f32);
    let adversarial = bce(discriminator.forward(prediction.clone()), valid.clone())
        + bce(discriminator.forward(main_output.clone()), valid);
    let distillation = kl_div_batchmean(log_softmax(prediction, 1), log_softmax(main_output, 1));

    let terms = GeneratorLossTerms {
        task:         scalar(task.clone()),
        adversarial:  scalar(adversarial.clone()),
        distillation: scalar(distillation.clone()),
        total:        0.0,
    };
    let total = task + adversarial + distillation.mul_scalar(distillation_weight);
    let terms = GeneratorLossTerms { total: scalar(total.clone()), ..terms };
    (total, terms)
}

pub fn generator_step<B, G, D, O>(
    generator:       G,
    discriminator:   &D,
    optim:           &mut O,
    batch:           &VqaBatch<B>,
    main_output:     Tensor<B, 2>,
    counterfactuals: Option<&Counterfactuals<B>>,
    settings:        &GeneratorSettings,
) -> Result<GeneratorStep<B, G>, DebiasError>
where
    B: AutodiffBackend,
    G: BiasGenerator<B> + AutodiffModule<B>,
    D: Discriminator<B>,
    O: Optimizer<G, B>,
{
    batch.validate()?;

    let prediction = generator_prediction(&generator, batch, counterfactuals, settings.blend);
    let (loss, terms) = generator_loss(
        discriminator,
        prediction,
        batch.answers.clone(),
        main_output,
        settings.distillation_weight,
    );

    let grads = GradientsParams::from_grads(loss.backward(), &generator);
    let (grads, grad_norm) = clip_global_norm(&generator, grads, settings.grad_clip);
    tracing::trace!(grad_norm, "generator gradients");
    let generator = optim.step(settings.learning_rate, generator, grads);

    let bias_prediction = generator
        .forward(
            batch.visual.clone(),
            batch.questions.clone(),
            None,
            GeneratorPath::Clean,
            Mode::Inference,
            false,
        )
        .detach();

    Ok(GeneratorStep { generator, bias_prediction, terms })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::counterfactual::{synthesize, CounterfactualConfig};
    use crate::ml::model::ShortcutGenerator;
    use crate::ml::ops::to_host;
    use crate::ml::saliency::input_gradients;
    use crate::ml::test_support::{network_config, synthetic_config, train_batch, TestAutodiff};
    use crate::ml::traits::{MarginModel, VqaBackbone};
    use burn::optim::AdamConfig;

    #[test]
    fn test_step_updates_generator_and_detaches_prediction() {
        let device = Default::default();
        let cfg    = synthetic_config();
        let net    = network_config(&cfg);
        let model  = net.init_backbone::<TestAutodiff>(&device);
        let head   = net.init_margin_head::<TestAutodiff>(&device);
        let disc   = net.init_discriminator::<TestAutodiff>(&device);
        let generator: ShortcutGenerator<TestAutodiff> = net.init_generator(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiff, ShortcutGenerator<TestAutodiff>>();
        let batch  = train_batch::<TestAutodiff>(6);

        let before = to_host(generator.classifier.weight.val()).unwrap();

        let out = model.forward(batch.visual.clone(), batch.questions.clone());
        let (refined, _) = head.forward(out.hidden, out.logits, batch.margins.clone(), 0, batch.answers.clone());

        let step = generator_step(
            generator, &disc, &mut optim, &batch, refined, None, &GeneratorSettings::default(),
        )
        .unwrap();

        let after = to_host(step.generator.classifier.weight.val()).unwrap();
        assert_ne!(before, after);
        assert_eq!(step.bias_prediction.dims(), [6, cfg.num_answers]);
        assert!(!step.bias_prediction.is_require_grad());
        let t = step.terms;
        assert!(t.task > 0.0 && t.adversarial > 0.0 && t.distillation > -1e-5);
        assert!((t.total - (t.task + t.adversarial + 5.0 * t.distillation)).abs() < 1e-3 * t.total.max(1.0));
    }

    #[test]
    fn test_bias_prediction_is_reproducible_from_updated_generator() {
        let device = Default::default();
        let net    = network_config(&synthetic_config());
        let model  = net.init_backbone::<TestAutodiff>(&device);
        let head   = net.init_margin_head::<TestAutodiff>(&device);
        let disc   = net.init_discriminator::<TestAutodiff>(&device);
        let generator: ShortcutGenerator<TestAutodiff> = net.init_generator(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiff, ShortcutGenerator<TestAutodiff>>();
        let batch  = train_batch::<TestAutodiff>(6);

        let out = model.forward(batch.visual.clone(), batch.questions.clone());
        let (refined, _) = head.forward(out.hidden, out.logits, batch.margins.clone(), 0, batch.answers.clone());
        let step = generator_step(
            generator, &disc, &mut optim, &batch, refined, None, &GeneratorSettings::default(),
        )
        .unwrap();

        // Training-mode calls in between must not leak into inference.
        let _ = generator_prediction(&step.generator, &batch, None, 0.5);
        let _ = generator_prediction(&step.generator, &batch, None, 0.5);
        let replay = step.generator.forward(
            batch.visual.clone(), batch.questions.clone(), None, GeneratorPath::Clean, Mode::Inference, false,
        );
        assert_eq!(to_host(replay).unwrap(), to_host(step.bias_prediction).unwrap());
    }

    #[test]
    fn test_generator_backward_leaves_main_model_untouched() {
        let device = Default::default();
        let net    = network_config(&synthetic_config());
        let model  = net.init_backbone::<TestAutodiff>(&device);
        let head   = net.init_margin_head::<TestAutodiff>(&device);
        let disc   = net.init_discriminator::<TestAutodiff>(&device);
        let generator: ShortcutGenerator<TestAutodiff> = net.init_generator(&device);
        let batch  = train_batch::<TestAutodiff>(4);

        let out = model.forward(batch.visual.clone(), batch.questions.clone());
        let (refined, _) = head.forward(out.hidden, out.logits, batch.margins.clone(), 0, batch.answers.clone());
        let prediction = generator_prediction(&generator, &batch, None, 0.5);
        let (loss, _) = generator_loss(&disc, prediction, batch.answers.clone(), refined, 5.0);

        let grads = loss.backward();
        assert!(GradientsParams::from_grads(grads, &model).is_empty());
    }

    #[test]
    fn test_counterfactual_paths_feed_the_update() {
        let device = Default::default();
        let net    = network_config(&synthetic_config());
        let model  = net.init_backbone::<TestAutodiff>(&device);
        let head   = net.init_margin_head::<TestAutodiff>(&device);
        let disc   = net.init_discriminator::<TestAutodiff>(&device);
        let generator: ShortcutGenerator<TestAutodiff> = net.init_generator(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiff, ShortcutGenerator<TestAutodiff>>();
        let batch  = train_batch::<TestAutodiff>(4);

        let grads = input_gradients(&model, &head, &batch, 0).unwrap();
        let cf = synthesize(&batch, &grads, &CounterfactualConfig::new(39)).unwrap();

        let out = model.forward(batch.visual.clone(), batch.questions.clone());
        let (refined, _) = head.forward(out.hidden, out.logits, batch.margins.clone(), 0, batch.answers.clone());
        let step = generator_step(
            generator, &disc, &mut optim, &batch, refined, Some(&cf), &GeneratorSettings::default(),
        )
        .unwrap();
        assert!(step.terms.total.is_finite());
    }
}
