// ============================================================
// Layer 5 — Reference Networks
// ============================================================
// Small Burn modules implementing the network traits:
//
//   BaselineVqa             — main model (pooled visual × question)
//   CosineMarginHead        — margin model over cosine logits
//   ShortcutGenerator       — bias generator
//   PredictionDiscriminator — real/fake scorer over [N, C] vectors
//
// All four are built from one NetworkConfig.

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{
        activation::{relu, sigmoid},
        Distribution,
    },
};

use crate::domain::{GeneratorPath, Mode};
use crate::ml::ops::l2_normalize;
use crate::ml::traits::{BiasGenerator, Discriminator, MarginModel, VqaBackbone};

// #[derive(Config)] supplies Clone and the serde impls; only Debug is added.
#[derive(Config, Debug)]
pub struct NetworkConfig {
    pub vocab_size:  usize,
    pub feature_dim: usize,
    pub num_answers: usize,
    #[config(default = 32)]
    pub embed_dim:   usize,
    #[config(default = 64)]
    pub hidden_dim:  usize,
    #[config(default = 32)]
    pub discriminator_dim: usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
    /// Cosine logits are multiplied by this before the margin loss.
    #[config(default = 16.0)]
    pub margin_scale: f64,
}

impl NetworkConfig {
    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> BaselineVqa<B> {
        BaselineVqa {
            word_embedding: EmbeddingConfig::new(self.vocab_size, self.embed_dim).init(device),
            visual_proj:    LinearConfig::new(self.feature_dim, self.hidden_dim).init(device),
            question_proj:  LinearConfig::new(self.embed_dim, self.hidden_dim).init(device),
            classifier:     LinearConfig::new(self.hidden_dim, self.num_answers).init(device),
            dropout:        DropoutConfig::new(self.dropout).init(),
        }
    }

    pub fn init_margin_head<B: Backend>(&self, device: &B::Device) -> CosineMarginHead<B> {
        CosineMarginHead {
            classifier: LinearConfig::new(self.hidden_dim, self.num_answers)
                .with_bias(false)
                .init(device),
            scale: self.margin_scale,
        }
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> ShortcutGenerator<B> {
        ShortcutGenerator {
            word_embedding: EmbeddingConfig::new(self.vocab_size, self.embed_dim).init(device),
            visual_proj:    LinearConfig::new(self.feature_dim, self.hidden_dim).init(device),
            question_proj:  LinearConfig::new(self.embed_dim, self.hidden_dim).init(device),
            noise_proj:     LinearConfig::new(self.hidden_dim, self.hidden_dim).init(device),
            classifier:     LinearConfig::new(self.hidden_dim, self.num_answers).init(device),
            dropout:        DropoutConfig::new(self.dropout).init(),
        }
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> PredictionDiscriminator<B> {
        PredictionDiscriminator {
            hidden: LinearConfig::new(self.num_answers, self.discriminator_dim).init(device),
            output: LinearConfig::new(self.discriminator_dim, 1).init(device),
        }
    }
}

/// [N, K, H] → [N, H], averaging over regions or tokens.
fn pool<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    let [n, _, h] = x.dims();
    x.mean_dim(1).reshape([n, h])
}

// ─── Main model ───────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct BaselineVqa<B: Backend> {
    pub word_embedding: Embedding<B>,
    pub visual_proj:    Linear<B>,
    pub question_proj:  Linear<B>,
    pub classifier:     Linear<B>,
    pub dropout:        Dropout,
}

impl<B: Backend> VqaBackbone<B> for BaselineVqa<B> {
    fn embed(&self, questions: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.word_embedding.forward(questions)
    }

    fn forward_embedded(&self, visual: Tensor<B, 3>, embeddings: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let v = pool(relu(self.visual_proj.forward(visual)));
        let q = pool(relu(self.question_proj.forward(embeddings)));
        let hidden = self.dropout.forward(v * q);
        let logits = self.classifier.forward(hidden.clone());
        (hidden, logits)
    }
}

// ─── Margin head ──────────────────────────────────────────────────────────────

/// Cosine classifier. The refined hidden representation subtracts each
/// example's margin from its ground-truth classes; the prediction does not.
#[derive(Module, Debug)]
pub struct CosineMarginHead<B: Backend> {
    pub classifier: Linear<B>,
    pub scale:      f64,
}

impl<B: Backend> CosineMarginHead<B> {
    fn cosine(&self, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        // weight is [H, C]; normalise each class column.
        let weight = l2_normalize(self.classifier.weight.val().transpose()).transpose();
        l2_normalize(hidden).matmul(weight)
    }
}

impl<B: Backend> MarginModel<B> for CosineMarginHead<B> {
    fn forward(
        &self,
        hidden: Tensor<B, 2>,
        _logits: Tensor<B, 2>,
        margin: Tensor<B, 2>,
        _epoch:  usize,
        target: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let cos = self.cosine(hidden);
        let [n, c] = cos.dims();
        let pred = cos.clone().mul_scalar(self.scale);
        let refined = (cos - target * margin.expand([n, c])).mul_scalar(self.scale);
        (refined, pred)
    }
}

// ─── Bias generator ───────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct ShortcutGenerator<B: Backend> {
    pub word_embedding: Embedding<B>,
    pub visual_proj:    Linear<B>,
    pub question_proj:  Linear<B>,
    pub noise_proj:     Linear<B>,
    pub classifier:     Linear<B>,
    pub dropout:        Dropout,
}

impl<B: Backend> BiasGenerator<B> for ShortcutGenerator<B> {
    fn forward(
        &self,
        visual:      Tensor<B, 3>,
        questions:   Tensor<B, 2, Int>,
        region_mask: Option<Tensor<B, 2>>,
        path:        GeneratorPath,
        mode:        Mode,
        generate:    bool,
    ) -> Tensor<B, 2> {
        let [n, regions, dim] = visual.dims();
        let visual = match region_mask {
            Some(mask) if path != GeneratorPath::Clean => {
                visual * mask.reshape([n, regions, 1]).expand([n, regions, dim])
            }
            _ => visual,
        };

        let v = pool(relu(self.visual_proj.forward(visual)));
        let q = pool(relu(self.question_proj.forward(self.word_embedding.forward(questions))));
        let mut x = v * q;

        if mode.is_train() {
            if generate {
                let noise = Tensor::random(x.dims(), Distribution::Normal(0.0, 1.0), &x.device());
                x = x + self.noise_proj.forward(noise);
            }
            x = self.dropout.forward(x);
        }
        self.classifier.forward(x)
    }
}

// ─── Discriminator ────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct PredictionDiscriminator<B: Backend> {
    pub hidden: Linear<B>,
    pub output: Linear<B>,
}

impl<B: Backend> Discriminator<B> for PredictionDiscriminator<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        sigmoid(self.output.forward(relu(self.hidden.forward(x))))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ops::{from_host, from_host_int, to_host};

    type TestBackend = burn::backend::NdArray<f32>;

    fn config() -> NetworkConfig {
        NetworkConfig::new(20, 4, 6).with_embed_dim(8).with_hidden_dim(12)
    }

    fn inputs(device: &<TestBackend as Backend>::Device) -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 2, Int>) {
        let visual = Tensor::random([3, 5, 4], Distribution::Normal(0.0, 1.0), device);
        let questions = from_host_int(vec![1, 2, 3, 0, 4, 5, 6, 0, 7, 8, 9, 0], [3, 4], device);
        (visual, questions)
    }

    #[test]
    fn test_backbone_shapes() {
        let device = Default::default();
        let model  = config().init_backbone::<TestBackend>(&device);
        let (visual, questions) = inputs(&device);
        let out = model.forward(visual, questions);
        assert_eq!(out.hidden.dims(), [3, 12]);
        assert_eq!(out.logits.dims(), [3, 6]);
        assert_eq!(out.embeddings.dims(), [3, 4, 8]);
    }

    #[test]
    fn test_margin_head_subtracts_margin_on_targets_only() {
        let device = Default::default();
        let head   = config().with_margin_scale(1.0).init_margin_head::<TestBackend>(&device);
        let hidden = Tensor::random([2, 12], Distribution::Normal(0.0, 1.0), &device);
        let logits = Tensor::zeros([2, 6], &device);
        let margin = from_host(vec![0.5, 0.5], [2, 1], &device);
        let mut onehot = vec![0.0; 12];
        onehot[1] = 1.0;
        onehot[6 + 4] = 1.0;
        let target = from_host(onehot, [2, 6], &device);

        let (refined, pred) = head.forward(hidden, logits, margin, 0, target);
        let diff: Vec<f32> = to_host(pred - refined).unwrap();
        for (i, d) in diff.iter().enumerate() {
            let expected = if i == 1 || i == 10 { 0.5 } else { 0.0 };
            assert!((d - expected).abs() < 1e-5, "entry {i}: {d}");
        }
    }

    #[test]
    fn test_generator_inference_is_deterministic() {
        let device    = Default::default();
        let generator = config().init_generator::<TestBackend>(&device);
        let (visual, questions) = inputs(&device);
        let run = || {
            to_host(generator.forward(
                visual.clone(), questions.clone(), None, GeneratorPath::Clean, Mode::Inference, true,
            ))
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_generator_modes_do_not_depend_on_call_order() {
        use crate::ml::test_support::TestAutodiff;

        let device    = Default::default();
        let generator = config().init_generator::<TestAutodiff>(&device);
        let fresh     = generator.clone();
        let visual    = Tensor::<TestAutodiff, 3>::random([3, 5, 4], Distribution::Normal(0.0, 1.0), &device);
        let questions = from_host_int(vec![1, 2, 3, 0, 4, 5, 6, 0, 7, 8, 9, 0], [3, 4], &device);
        let call = |g: &ShortcutGenerator<TestAutodiff>, mode: Mode, generate: bool| {
            to_host(g.forward(visual.clone(), questions.clone(), None, GeneratorPath::Clean, mode, generate))
                .unwrap()
        };

        let train_a = call(&generator, Mode::Train, true);
        let train_b = call(&generator, Mode::Train, true);
        assert_ne!(train_a, train_b, "training mode must sample noise");

        let after_training = call(&generator, Mode::Inference, true);
        let again          = call(&generator, Mode::Inference, false);
        let untouched      = call(&fresh, Mode::Inference, true);
        assert_eq!(after_training, untouched);
        assert_eq!(again, untouched);
    }

    #[test]
    fn test_generator_clean_path_ignores_mask() {
        let device    = Default::default();
        let generator = config().init_generator::<TestBackend>(&device);
        let (visual, questions) = inputs(&device);
        let mask = Tensor::zeros([3, 5], &device);
        let masked = generator.forward(
            visual.clone(), questions.clone(), Some(mask), GeneratorPath::Clean, Mode::Inference, false,
        );
        let plain = generator.forward(visual, questions, None, GeneratorPath::Clean, Mode::Inference, false);
        assert_eq!(to_host(masked).unwrap(), to_host(plain).unwrap());
    }

    #[test]
    fn test_discriminator_outputs_probabilities() {
        let device = Default::default();
        let disc   = config().init_discriminator::<TestBackend>(&device);
        let x      = Tensor::random([4, 6], Distribution::Normal(0.0, 3.0), &device);
        let p      = to_host(disc.forward(x)).unwrap();
        assert_eq!(p.len(), 4);
        assert!(p.iter().all(|v| *v > 0.0 && *v < 1.0));
    }
}
