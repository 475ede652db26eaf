// ============================================================
// Layer 5 — Tensor Helpers
// ============================================================
// Small numeric building blocks shared by the losses, the
// ensemble and the evaluator, plus host <-> device transfers.

use burn::{
    prelude::*,
    tensor::activation::log_sigmoid,
};

use crate::domain::DebiasError;

/// Row-wise L2 normalisation of a [N, D] tensor.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, d] = x.dims();
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    x / norm.expand([n, d])
}

/// Mean binary cross-entropy on raw scores against soft targets.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let not_targets = targets.clone().neg().add_scalar(1.0);
    let per_entry = targets * log_sigmoid(logits.clone()) + not_targets * log_sigmoid(logits.neg());
    per_entry.neg().mean()
}

/// Mean binary cross-entropy on probabilities. Log terms are clamped
/// at -100 so a saturated probability yields a finite loss.
pub fn bce<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let not_targets = targets.clone().neg().add_scalar(1.0);
    let log_p = probs.clone().log().clamp_min(-100.0);
    let log_not_p = probs.neg().add_scalar(1.0).log().clamp_min(-100.0);
    (targets * log_p + not_targets * log_not_p).neg().mean()
}

/// KL(target ‖ input) averaged over the batch, both given as
/// log-probabilities of shape [N, C].
pub fn kl_div_batchmean<B: Backend>(input_log: Tensor<B, 2>, target_log: Tensor<B, 2>) -> Tensor<B, 1> {
    let n = input_log.dims()[0].max(1);
    let per_entry = target_log.clone().exp() * (target_log - input_log);
    per_entry.sum().div_scalar(n as f32)
}

/// Target mass at each row's arg-max prediction, [N, 1].
pub fn score_at_argmax<B: Backend>(prediction: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 2> {
    target.gather(1, prediction.argmax(1))
}

pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

pub fn to_host<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>, DebiasError> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DebiasError::TensorRead(format!("{e:?}")))
}

pub fn to_host_int<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Result<Vec<i64>, DebiasError> {
    t.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| DebiasError::TensorRead(format!("{e:?}")))
}

/// Row-wise arg-max pulled to the host.
pub fn argmax_rows<B: Backend>(t: Tensor<B, 2>) -> Result<Vec<usize>, DebiasError> {
    Ok(to_host_int(t.argmax(1))?.into_iter().map(|i| i as usize).collect())
}

pub fn from_host<B: Backend, const D: usize>(values: Vec<f32>, shape: [usize; D], device: &B::Device) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

pub fn from_host_int<B: Backend, const D: usize>(
    values: Vec<i64>,
    shape:  [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    fn t2(values: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        from_host(values, shape, &Default::default())
    }

    #[test]
    fn test_l2_normalize_rows_have_unit_norm() {
        let x = l2_normalize(t2(vec![3.0, 4.0, 0.0, 2.0], [2, 2]));
        let v = to_host(x).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((v[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_row_stays_zero() {
        let v = to_host(l2_normalize(t2(vec![0.0, 0.0], [1, 2]))).unwrap();
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_bce_with_logits_matches_closed_form() {
        // -log(sigmoid(0)) = ln 2 for either target.
        let loss = scalar(bce_with_logits(t2(vec![0.0, 0.0], [1, 2]), t2(vec![1.0, 0.0], [1, 2])));
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_bce_saturated_probability_is_finite() {
        let loss = scalar(bce(t2(vec![0.0], [1, 1]), t2(vec![1.0], [1, 1])));
        assert!(loss.is_finite());
        assert!((loss - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_kl_of_identical_distributions_is_zero() {
        let log_p = t2(vec![0.5f32.ln(), 0.5f32.ln(), 0.9f32.ln(), 0.1f32.ln()], [2, 2]);
        let kl = scalar(kl_div_batchmean(log_p.clone(), log_p));
        assert!(kl.abs() < 1e-6);
    }

    #[test]
    fn test_score_at_argmax() {
        let pred   = t2(vec![0.1, 0.9, 0.8, 0.2], [2, 2]);
        let target = t2(vec![0.3, 1.0, 0.0, 0.6], [2, 2]);
        assert_eq!(to_host(score_at_argmax(pred, target)).unwrap(), vec![1.0, 0.0]);
    }
}
