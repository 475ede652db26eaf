// ============================================================
// Layer 4 — VQA Batcher
// ============================================================
// Implements Burn's Batcher trait to stack VqaSamples into
// device tensors. Every sample is validated against the
// BatchLayout at load time, so all vectors here share a length.
//
//   visual     [N, regions, feature_dim]
//   questions  [N, L]           (Int)
//   answers    [N, C]           dense soft targets
//   margins / bias / reliability  [N, 1]
//   hints      [N, regions]
//   masks      [N, L]

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::{BatchLayout, VqaSample};
use crate::domain::DebiasError;

#[derive(Debug, Clone)]
pub struct VqaBatch<B: Backend> {
    pub visual:         Tensor<B, 3>,
    pub questions:      Tensor<B, 2, Int>,
    pub answers:        Tensor<B, 2>,
    pub margins:        Tensor<B, 2>,
    pub bias:           Tensor<B, 2>,
    pub reliability:    Tensor<B, 2>,
    pub hints:          Tensor<B, 2>,
    pub type_mask:      Tensor<B, 2>,
    pub notype_mask:    Tensor<B, 2>,
    pub question_mask:  Tensor<B, 2>,
    pub question_ids:   Vec<i64>,
    pub question_types: Vec<String>,
}

impl<B: Backend> VqaBatch<B> {
    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }

    /// Check that every field is aligned on the batch axis and that the
    /// region / token axes agree between the fields that share them.
    pub fn validate(&self) -> Result<(), DebiasError> {
        let n = self.len();
        let rows: [(&'static str, usize); 11] = [
            ("visual",         self.visual.dims()[0]),
            ("questions",      self.questions.dims()[0]),
            ("answers",        self.answers.dims()[0]),
            ("margins",        self.margins.dims()[0]),
            ("bias",           self.bias.dims()[0]),
            ("reliability",    self.reliability.dims()[0]),
            ("hints",          self.hints.dims()[0]),
            ("type_mask",      self.type_mask.dims()[0]),
            ("notype_mask",    self.notype_mask.dims()[0]),
            ("question_mask",  self.question_mask.dims()[0]),
            ("question_types", self.question_types.len()),
        ];
        for (field, found) in rows {
            if found != n {
                return Err(DebiasError::BatchMisaligned { field, expected: n, found });
            }
        }

        let regions = self.visual.dims()[1];
        if self.hints.dims()[1] != regions {
            return Err(DebiasError::BatchMisaligned {
                field: "hints", expected: regions, found: self.hints.dims()[1],
            });
        }
        let tokens = self.questions.dims()[1];
        for (field, found) in [
            ("type_mask",     self.type_mask.dims()[1]),
            ("notype_mask",   self.notype_mask.dims()[1]),
            ("question_mask", self.question_mask.dims()[1]),
        ] {
            if found != tokens {
                return Err(DebiasError::BatchMisaligned { field, expected: tokens, found });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct VqaBatcher<B: Backend> {
    pub device: B::Device,
    pub layout: BatchLayout,
}

impl<B: Backend> VqaBatcher<B> {
    pub fn new(device: B::Device, layout: BatchLayout) -> Self {
        Self { device, layout }
    }

    fn floats<const D: usize>(&self, flat: Vec<f32>, shape: [usize; D]) -> Tensor<B, D> {
        Tensor::from_data(TensorData::new(flat, shape), &self.device)
    }
}

impl<B: Backend> Batcher<VqaSample, VqaBatch<B>> for VqaBatcher<B> {
    fn batch(&self, items: Vec<VqaSample>) -> VqaBatch<B> {
        let n = items.len();
        let BatchLayout { num_regions, feature_dim, max_question_len, num_answers } = self.layout;

        let visual: Vec<f32> = items.iter().flat_map(|s| s.visual.iter().copied()).collect();
        let questions: Vec<i64> = items
            .iter()
            .flat_map(|s| s.question.iter().map(|&t| t as i64))
            .collect();
        let answers: Vec<f32> = items.iter().flat_map(|s| s.target_row(num_answers)).collect();
        let column = |f: fn(&VqaSample) -> f32| -> Vec<f32> { items.iter().map(f).collect() };
        let rows = |f: fn(&VqaSample) -> &Vec<f32>| -> Vec<f32> {
            items.iter().flat_map(|s| f(s).iter().copied()).collect()
        };

        VqaBatch {
            visual:         self.floats(visual, [n, num_regions, feature_dim]),
            questions:      Tensor::from_data(
                TensorData::new(questions, [n, max_question_len]),
                &self.device,
            ),
            answers:        self.floats(answers, [n, num_answers]),
            margins:        self.floats(column(|s| s.margin), [n, 1]),
            bias:           self.floats(column(|s| s.bias), [n, 1]),
            reliability:    self.floats(column(|s| s.reliability), [n, 1]),
            hints:          self.floats(rows(|s| &s.hint), [n, num_regions]),
            type_mask:      self.floats(rows(|s| &s.type_mask), [n, max_question_len]),
            notype_mask:    self.floats(rows(|s| &s.notype_mask), [n, max_question_len]),
            question_mask:  self.floats(rows(|s| &s.question_mask), [n, max_question_len]),
            question_ids:   items.iter().map(|s| s.question_id).collect(),
            question_types: items.iter().map(|s| s.question_type.clone()).collect(),
        }
    }
}
