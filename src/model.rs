//! The DeepFM model: shared embeddings, FM and deep paths, fusion head.
//!
//! All parameter state hangs off one [`DeepFmModel`] constructed from a
//! [`DeepFmConfig`]; there is no ambient graph or session. The combined
//! FM + deep path is the only scoring path.

use crate::activation::sigmoid;
use crate::checkpoint::ModelState;
use crate::config::DeepFmConfig;
use crate::dataset::MiniBatch;
use crate::deep::DeepBlock;
use crate::dense::Dense;
use crate::embedding::{scatter_add, EmbeddingTable};
use crate::error::{DeepFmError, Result};
use crate::fm::FmBlock;
use crate::metrics::log_loss;
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// Name of the model's single output tensor; part of the serving contract.
pub const SCORE_OUTPUT: &str = "score";

#[derive(Debug, Clone)]
struct ModelCache {
    batch_size: usize,
    /// Offset (unified) categorical indices, `[batch * cate_field_size]`.
    cate_indices: Vec<usize>,
    /// Scores from the cached forward pass, `[batch]`.
    scores: Vec<f32>,
}

/// The DeepFM scoring model.
#[derive(Debug)]
pub struct DeepFmModel {
    config: DeepFmConfig,
    feats_emb: EmbeddingTable,
    fm_first_order_emb: EmbeddingTable,
    fm: FmBlock,
    deep: DeepBlock,
    fusion: Dense,
    /// Mask stream for dropout during training.
    rng: LcgRng,
    feats_emb_grad: Option<Tensor>,
    first_order_grad: Option<Tensor>,
    cache: Option<ModelCache>,
}

impl DeepFmModel {
    /// Builds the model from a validated configuration.
    pub fn new(config: &DeepFmConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = LcgRng::new(config.seed);

        let rows = config.index_space_size();
        let feats_emb =
            EmbeddingTable::new_normal(rows, config.embedding_size, 0.0, 0.01, &mut rng);
        let fm_first_order_emb = EmbeddingTable::new_uniform(rows, 1, 0.0, 1.0, &mut rng);

        let fm = FmBlock::new(
            config.input_field_size(),
            config.embedding_size,
            [config.dropout_keep_fm[0], config.dropout_keep_fm[1]],
        );
        let deep = DeepBlock::new(
            config.deep_input_size(),
            &config.hidden_units,
            &config.dropout_keep_deep,
            &mut rng,
        )?;
        let fusion = Dense::new(config.fusion_input_size(), 1, &mut rng);

        let mask_rng = rng.fork();
        Ok(Self {
            config: config.clone(),
            feats_emb,
            fm_first_order_emb,
            fm,
            deep,
            fusion,
            rng: mask_rng,
            feats_emb_grad: None,
            first_order_grad: None,
            cache: None,
        })
    }

    /// The model's configuration.
    pub fn config(&self) -> &DeepFmConfig {
        &self.config
    }

    /// The shared embedding table.
    pub fn feats_emb(&self) -> &EmbeddingTable {
        &self.feats_emb
    }

    /// The first-order weight table.
    pub fn fm_first_order_emb(&self) -> &EmbeddingTable {
        &self.fm_first_order_emb
    }

    /// The fusion head's weight matrix (the L2-regularized parameter).
    pub fn fusion_weights(&self) -> &Tensor {
        self.fusion.weights()
    }

    /// Unified indices and values for the FM path.
    ///
    /// Continuous field `f` contributes `(f, value)`; categorical field `f`
    /// contributes `(raw + cont_field_size, 1.0)`.
    fn unified_inputs(&self, batch: &MiniBatch) -> (Vec<usize>, Vec<f32>) {
        let n = batch.batch_size();
        let cont_w = self.config.cont_field_size;
        let cate_w = self.config.cate_field_size;
        let fields = cont_w + cate_w;

        let mut indices = vec![0usize; n * fields];
        let mut values = vec![0.0f32; n * fields];
        for b in 0..n {
            for f in 0..cont_w {
                indices[b * fields + f] = f;
                values[b * fields + f] = batch.cont_feats.data()[b * cont_w + f];
            }
            for f in 0..cate_w {
                let raw = batch.cate_feats[b * cate_w + f] as usize;
                indices[b * fields + cont_w + f] = raw + cont_w;
                values[b * fields + cont_w + f] = 1.0;
            }
        }
        (indices, values)
    }

    /// Offset categorical indices for the deep path's embedding lookups.
    fn cate_unified(&self, batch: &MiniBatch) -> Vec<usize> {
        let cont_w = self.config.cont_field_size;
        batch
            .cate_feats
            .iter()
            .map(|&raw| raw as usize + cont_w)
            .collect()
    }

    fn deep_input(&self, batch: &MiniBatch, cate_indices: &[usize]) -> Tensor {
        let n = batch.batch_size();
        let k = self.config.embedding_size;
        let cate_w = self.config.cate_field_size;
        let cat_emb = self
            .feats_emb
            .lookup(cate_indices)
            .reshape(&[n, cate_w * k]);
        Tensor::concat_cols(&[&batch.cont_feats, &batch.vector_feats, &cat_emb])
    }

    /// Scores a batch (inference path, no dropout).
    ///
    /// Returns the `score` tensor of shape `[batch, 1]` with values in
    /// (0, 1).
    pub fn forward(&self, batch: &MiniBatch) -> Result<Tensor> {
        batch.check_against(&self.config)?;
        let n = batch.batch_size();

        let (indices, values) = self.unified_inputs(batch);
        let fm_out = self.fm.forward(
            &self.feats_emb,
            &self.fm_first_order_emb,
            &indices,
            &values,
            n,
        )?;

        let cate_indices = self.cate_unified(batch);
        let deep_out = self.deep.forward(&self.deep_input(batch, &cate_indices))?;

        let fused = Tensor::concat_cols(&[&fm_out, &deep_out]);
        let logits = self.fusion.forward(&fused)?;
        Ok(sigmoid(&logits))
    }

    /// Scores a batch and returns the flattened scores.
    pub fn score_batch(&self, batch: &MiniBatch) -> Result<Vec<f32>> {
        Ok(self.forward(batch)?.into_data())
    }

    /// Training forward pass: applies dropout and caches intermediates for
    /// [`DeepFmModel::backward`].
    pub fn forward_train(&mut self, batch: &MiniBatch) -> Result<Tensor> {
        batch.check_against(&self.config)?;
        let n = batch.batch_size();

        let (indices, values) = self.unified_inputs(batch);
        let fm_out = self.fm.forward_train(
            &self.feats_emb,
            &self.fm_first_order_emb,
            &indices,
            &values,
            n,
            &mut self.rng,
        )?;

        let cate_indices = self.cate_unified(batch);
        let deep_input = self.deep_input(batch, &cate_indices);
        let deep_out = self.deep.forward_train(&deep_input, &mut self.rng)?;

        let fused = Tensor::concat_cols(&[&fm_out, &deep_out]);
        let logits = self.fusion.forward_train(&fused)?;
        let scores = sigmoid(&logits);

        self.cache = Some(ModelCache {
            batch_size: n,
            cate_indices,
            scores: scores.data().to_vec(),
        });
        Ok(scores)
    }

    /// Training loss: mean log-loss plus the optional L2 penalty on the
    /// fusion weight matrix.
    pub fn loss(&self, scores: &Tensor, labels: &[f32]) -> f32 {
        let mut loss = log_loss(labels, scores.data());
        if self.config.l2_reg > 0.0 {
            loss += self.config.l2_reg * self.fusion.weights().sqr().sum();
        }
        loss
    }

    /// Backward pass from the log-loss; fills every parameter gradient.
    pub fn backward(&mut self, labels: &[f32]) -> Result<()> {
        let cache = self.cache.as_ref().ok_or(DeepFmError::NotInitialized)?;
        let n = cache.batch_size;
        if labels.len() != n {
            return Err(DeepFmError::Batch {
                message: format!("{} labels for a batch of {}", labels.len(), n),
            });
        }

        // d(log-loss)/d(logit) folds the sigmoid in: (p - y) / n.
        let g_logit: Vec<f32> = cache
            .scores
            .iter()
            .zip(labels)
            .map(|(&p, &y)| (p - y) / n as f32)
            .collect();
        let g_logit = Tensor::from_data(&[n, 1], g_logit);

        let g_fused = self.fusion.backward(&g_logit)?;
        if self.config.l2_reg > 0.0 {
            let reg_grad = self.fusion.weights().scale(2.0 * self.config.l2_reg);
            self.fusion.add_to_weights_grad(&reg_grad)?;
        }

        let parts = g_fused.split_cols(&[self.fm.output_size(), self.deep.output_size()]);
        let g_deep_input = self.deep.backward(&parts[1])?;

        let mut feats_grad = self.feats_emb.zero_grad();
        let mut first_order_grad = self.fm_first_order_emb.zero_grad();

        // Categorical-embedding slice of the deep input flows back into the
        // shared table.
        let k = self.config.embedding_size;
        let cate_w = self.config.cate_field_size;
        let deep_parts = g_deep_input.split_cols(&[
            self.config.cont_field_size,
            self.config.vector_feats_size,
            cate_w * k,
        ]);
        let g_cat = &deep_parts[2];
        let cache = self.cache.as_ref().ok_or(DeepFmError::NotInitialized)?;
        for b in 0..n {
            for f in 0..cate_w {
                let idx = cache.cate_indices[b * cate_w + f];
                let row = &g_cat.data()[(b * cate_w + f) * k..(b * cate_w + f + 1) * k];
                scatter_add(&mut feats_grad, idx, row);
            }
        }

        self.fm
            .backward(&parts[0], &mut feats_grad, &mut first_order_grad)?;

        self.feats_emb_grad = Some(feats_grad);
        self.first_order_grad = Some(first_order_grad);
        Ok(())
    }

    /// Canonical parameter names, in parameter order.
    pub fn param_names(&self) -> Vec<String> {
        let mut names = vec!["feats_emb".to_string(), "fm_first_order_emb".to_string()];
        for i in 0..self.config.hidden_units.len() {
            names.push(format!("deep_{}.weight", i));
            names.push(format!("deep_{}.bias", i));
        }
        names.push("fusion.weight".to_string());
        names.push("fusion.bias".to_string());
        names
    }

    /// Mutable references to every parameter tensor, in parameter order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![
            self.feats_emb.weights_mut(),
            self.fm_first_order_emb.weights_mut(),
        ];
        params.extend(self.deep.parameters_mut());
        params.extend(self.fusion.parameters_mut());
        params
    }

    /// Gradients from the last backward pass, in parameter order.
    pub fn gradients(&self) -> Result<Vec<Tensor>> {
        let mut grads = vec![
            self.feats_emb_grad
                .clone()
                .ok_or(DeepFmError::NotInitialized)?,
            self.first_order_grad
                .clone()
                .ok_or(DeepFmError::NotInitialized)?,
        ];
        grads.extend(self.deep.gradients()?);
        grads.extend(self.fusion.gradients()?);
        Ok(grads)
    }

    /// Re-establishes the null-row invariant on both embedding tables.
    ///
    /// Called after every optimizer step; row 0 must read as exact zeros
    /// for any padding index to contribute nothing.
    pub fn enforce_null_row(&mut self) {
        self.feats_emb.zero_null_row();
        self.fm_first_order_emb.zero_null_row();
    }

    /// Captures all parameters into a checkpointable state.
    pub fn to_state(&self, global_step: u64) -> ModelState {
        let mut state = ModelState::new(global_step);
        state.add_param("feats_emb", self.feats_emb.weights());
        state.add_param("fm_first_order_emb", self.fm_first_order_emb.weights());
        for (i, layer) in self.deep.layers().iter().enumerate() {
            state.add_param(format!("deep_{}.weight", i), layer.weights());
            state.add_param(format!("deep_{}.bias", i), layer.bias());
        }
        state.add_param("fusion.weight", self.fusion.weights());
        state.add_param("fusion.bias", self.fusion.bias());
        state
    }

    /// Restores all parameters from a checkpointed state.
    ///
    /// Shapes are validated against the current configuration; the null-row
    /// invariant is re-established on the restored tables.
    pub fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let rows = self.config.index_space_size();
        let k = self.config.embedding_size;

        self.feats_emb = EmbeddingTable::from_weights(state.param("feats_emb", &[rows, k])?)?;
        self.fm_first_order_emb =
            EmbeddingTable::from_weights(state.param("fm_first_order_emb", &[rows, 1])?)?;

        let mut prev = self.config.deep_input_size();
        for (i, layer) in self.deep.layers_mut().iter_mut().enumerate() {
            let width = layer.out_features();
            *layer = Dense::from_weights(
                state.param(&format!("deep_{}.weight", i), &[prev, width])?,
                state.param(&format!("deep_{}.bias", i), &[width])?,
            )?;
            prev = width;
        }

        self.fusion = Dense::from_weights(
            state.param("fusion.weight", &[self.config.fusion_input_size(), 1])?,
            state.param("fusion.bias", &[1])?,
        )?;

        self.feats_emb_grad = None;
        self.first_order_grad = None;
        self.cache = None;
        Ok(())
    }
}
