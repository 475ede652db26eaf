// ============================================================
// Layer 5 — Global Gradient Norm Clipping
// ============================================================
// Rescales all of one network's gradients together:
//
//   norm = sqrt( Σ_params Σ g² )
//   if norm > max_norm:  g ← g · max_norm / (norm + 1e-6)
//
// Runs on the GradientsParams of a single module right before its
// optimizer step. The parameter ids come from walking the module,
// so gradients that belong to other networks are never touched.

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

const EPS: f32 = 1e-6;

struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    total: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct Rescale<'a> {
    grads:  &'a mut GradientsParams,
    factor: f32,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

/// L2 norm over every gradient of `module`'s parameters.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f32
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut visitor = SquaredNorm { grads, total: 0.0 };
    module.visit(&mut visitor);
    visitor.total.sqrt() as f32
}

/// Scale `grads` so their global norm is at most `max_norm`. A
/// non-positive `max_norm` disables clipping. Returns the norm
/// measured before clipping.
pub fn clip_global_norm<B, M>(module: &M, mut grads: GradientsParams, max_norm: f32) -> (GradientsParams, f32)
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let norm = global_grad_norm::<B, M>(module, &grads);
    if max_norm > 0.0 && norm > max_norm {
        let mut visitor = Rescale { grads: &mut grads, factor: max_norm / (norm + EPS) };
        module.visit(&mut visitor);
    }
    (grads, norm)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ops::{from_host, to_host};
    use crate::ml::test_support::{network_config, synthetic_config, train_batch, TestAutodiff, TestBackend};
    use crate::ml::traits::VqaBackbone;
    use burn::nn::{Linear, LinearConfig};

    fn linear() -> Linear<TestAutodiff> {
        LinearConfig::new(2, 2).init(&Default::default())
    }

    /// Weight gradient with norm 5, bias gradient with norm 10.
    fn hand_made_grads(layer: &Linear<TestAutodiff>) -> GradientsParams {
        let device = Default::default();
        let mut grads = GradientsParams::new();
        grads.register::<TestBackend, 2>(
            layer.weight.id,
            from_host(vec![3.0, 4.0, 0.0, 0.0], [2, 2], &device),
        );
        if let Some(bias) = &layer.bias {
            grads.register::<TestBackend, 1>(bias.id, from_host(vec![6.0, 8.0], [2], &device));
        }
        grads
    }

    #[test]
    fn test_norm_spans_all_parameter_tensors() {
        let layer = linear();
        let norm = global_grad_norm::<TestAutodiff, _>(&layer, &hand_made_grads(&layer));
        assert!((norm - 125f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_clip_caps_the_global_norm_not_each_tensor() {
        let layer = linear();
        let (clipped, before) = clip_global_norm::<TestAutodiff, _>(&layer, hand_made_grads(&layer), 0.25);
        assert!((before - 125f32.sqrt()).abs() < 1e-4);

        let after = global_grad_norm::<TestAutodiff, _>(&layer, &clipped);
        assert!(after <= 0.25 + 1e-5, "global norm {after}");
        assert!((after - 0.25).abs() < 1e-4);

        // One shared factor: the tensors keep their 1:2 norm ratio.
        let weight = to_host(clipped.get::<TestBackend, 2>(layer.weight.id).unwrap()).unwrap();
        let bias_id = layer.bias.as_ref().unwrap().id;
        let bias = to_host(clipped.get::<TestBackend, 1>(bias_id).unwrap()).unwrap();
        let wn = weight.iter().map(|v| v * v).sum::<f32>().sqrt();
        let bn = bias.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((bn / wn - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_small_gradients_pass_through() {
        let layer = linear();
        let (clipped, before) = clip_global_norm::<TestAutodiff, _>(&layer, hand_made_grads(&layer), 100.0);
        assert!(before < 100.0);
        let weight = to_host(clipped.get::<TestBackend, 2>(layer.weight.id).unwrap()).unwrap();
        assert_eq!(weight, vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clip_on_real_backbone_gradients() {
        let net   = network_config(&synthetic_config());
        let model = net.init_backbone::<TestAutodiff>(&Default::default());
        let batch = train_batch::<TestAutodiff>(4);
        let loss  = model.forward(batch.visual, batch.questions).logits.sum().mul_scalar(100.0);
        let grads = GradientsParams::from_grads(loss.backward(), &model);

        let (clipped, before) = clip_global_norm::<TestAutodiff, _>(&model, grads, 0.25);
        assert!(before > 0.25);
        assert!(global_grad_norm::<TestAutodiff, _>(&model, &clipped) <= 0.25 + 1e-5);
    }
}
