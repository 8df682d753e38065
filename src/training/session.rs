//! Training session: optimizer, step counter, gradient accumulation and
//! clipping for the early-exit transformer.
//!
//! The session owns the model. Decoders borrow it through
//! [`TrainingSession::model`], so a generation call can never overlap with a
//! parameter update.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tracing::{info, warn};

use super::objective::TrainingObjective;
use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::model::EarlyExitTransformer;

/// Pre-clip norms this many times above the ceiling are reported as spikes.
const GRAD_SPIKE_FACTOR: f64 = 100.0;

/// Losses and gradient statistics for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    /// Steps completed after this one.
    pub step: usize,
    /// Full-depth loss averaged over the micro-batches.
    pub full_loss: f32,
    /// Early-exit loss averaged over the micro-batches.
    pub early_exit_loss: f32,
    /// Combined objective averaged over the micro-batches.
    pub total_loss: f32,
    /// Global gradient norm before clipping.
    pub grad_norm: f64,
    /// Whether gradients were rescaled.
    pub clipped: bool,
}

/// Losses from an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    pub full_loss: f32,
    pub early_exit_loss: f32,
}

/// Explicit training state for one run.
pub struct TrainingSession {
    model: EarlyExitTransformer,
    optimizer: AdamW,
    objective: TrainingObjective,
    max_grad_norm: f64,
    step: usize,
}

impl TrainingSession {
    /// Creates a session with an Adam optimizer over every model variable.
    ///
    /// Fails if training windows or generated sequences would not fit the
    /// model's position table.
    pub fn new(model: EarlyExitTransformer, config: &TrainingConfig) -> Result<Self> {
        config.validate()?;
        let max = model.config().max_position_embeddings;
        if config.seq_len > max || config.generate_length > max {
            return Err(Error::invalid_config(format!(
                "seq_len ({}) and generate_length ({}) must not exceed max_position_embeddings ({max})",
                config.seq_len, config.generate_length
            )));
        }
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(model.trainable_vars(), params)?;

        Ok(Self {
            model,
            optimizer,
            objective: TrainingObjective::new(config.exit_weight)?,
            max_grad_norm: config.max_grad_norm,
            step: 0,
        })
    }

    /// Read-only handle for evaluation and decoding.
    pub fn model(&self) -> &EarlyExitTransformer {
        &self.model
    }

    /// Consumes the session, returning the trained model.
    pub fn into_model(self) -> EarlyExitTransformer {
        self.model
    }

    /// Optimizer steps taken.
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// The loss combination in use.
    pub fn objective(&self) -> &TrainingObjective {
        &self.objective
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Averaged-gradient update over `micro_batches` ([batch, L + 1] each).
    ///
    /// Each micro-batch loss is scaled by `1 / n` before backprop, the
    /// gradients are summed, clipped to `max_grad_norm`, then applied in a
    /// single optimizer step.
    pub fn train_step(&mut self, micro_batches: &[Tensor]) -> Result<StepMetrics> {
        if micro_batches.is_empty() {
            return Err(Error::invalid_config(
                "train_step needs at least one micro-batch",
            ));
        }
        let vars = self.model.trainable_vars();
        let scale = 1.0 / micro_batches.len() as f64;

        let mut accumulated: Option<GradStore> = None;
        let (mut full_sum, mut exit_sum, mut total_sum) = (0.0f32, 0.0f32, 0.0f32);

        for batch in micro_batches {
            let (full_loss, early_exit_loss) = self.model.loss(batch)?;
            let total = self.objective.combine(&full_loss, &early_exit_loss)?;

            let grads = total.affine(scale, 0.0)?.backward()?;
            accumulate(&mut accumulated, grads, &vars)?;

            full_sum += full_loss.to_scalar::<f32>()?;
            exit_sum += early_exit_loss.to_scalar::<f32>()?;
            total_sum += total.to_scalar::<f32>()?;
        }

        let mut grads = accumulated.ok_or_else(|| {
            Error::invalid_config("no gradients produced by the micro-batches")
        })?;
        let grad_norm = clip_grad_norm(&mut grads, &vars, self.max_grad_norm)?;
        let clipped = grad_norm > self.max_grad_norm;
        if !grad_norm.is_finite() || grad_norm > GRAD_SPIKE_FACTOR * self.max_grad_norm {
            warn!(
                step = self.step,
                grad_norm,
                max_grad_norm = self.max_grad_norm,
                "gradient norm spike, clipped"
            );
        }

        self.optimizer.step(&grads)?;
        self.step += 1;

        let n = micro_batches.len() as f32;
        let metrics = StepMetrics {
            step: self.step,
            full_loss: full_sum / n,
            early_exit_loss: exit_sum / n,
            total_loss: total_sum / n,
            grad_norm,
            clipped,
        };
        info!(
            step = metrics.step,
            full_loss = metrics.full_loss,
            early_exit_loss = metrics.early_exit_loss,
            total_loss = metrics.total_loss,
            grad_norm,
            clipped,
            "training step"
        );
        Ok(metrics)
    }

    /// Losses on `batch` without touching the parameters.
    pub fn evaluate(&self, batch: &Tensor) -> Result<EvalMetrics> {
        let (full_loss, early_exit_loss) = self.model.loss(batch)?;
        Ok(EvalMetrics {
            full_loss: full_loss.detach().to_scalar::<f32>()?,
            early_exit_loss: early_exit_loss.detach().to_scalar::<f32>()?,
        })
    }
}

/// Adds the variable gradients in `grads` into `accumulated`.
fn accumulate(accumulated: &mut Option<GradStore>, grads: GradStore, vars: &[Var]) -> Result<()> {
    let Some(acc) = accumulated.as_mut() else {
        *accumulated = Some(grads);
        return Ok(());
    };
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let sum = match acc.get(var) {
                Some(prev) => (prev + grad)?,
                None => grad.clone(),
            };
            acc.insert(var, sum.detach());
        }
    }
    Ok(())
}

/// Global L2 norm over the gradients of `vars`.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut norm_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let sq: f32 = grad.sqr()?.sum_all()?.to_scalar()?;
            norm_sq += sq as f64;
        }
    }
    Ok(norm_sq.sqrt())
}

/// Rescales gradients so their global norm is at most `max_norm`.
///
/// Returns the norm measured before clipping. The rescale factor is
/// `max_norm / (norm + 1e-6)`, applied only when it is below one.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let norm = grad_norm(grads, vars)?;
    let coef = max_norm / (norm + 1e-6);
    if coef < 1.0 {
        for var in vars {
            if let Some(grad) = grads.get(var) {
                let scaled = grad.affine(coef, 0.0)?;
                grads.insert(var, scaled);
            }
        }
    }
    Ok(norm)
}
