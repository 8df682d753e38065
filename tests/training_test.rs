//! Integration tests for the dual-loss objective and TrainingSession.

use candle_core::{Device, Tensor};
use early_exit_spec::training::{clip_grad_norm, grad_norm};
use early_exit_spec::{
    EarlyExitTransformer, Error, ModelConfig, TextSampler, TrainingConfig, TrainingObjective,
    TrainingSession,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn tiny_model() -> EarlyExitTransformer {
    EarlyExitTransformer::new(&ModelConfig::tiny(), &Device::Cpu).unwrap()
}

fn batch(seed: u64) -> Tensor {
    let data: Vec<u8> = (0..512u32).map(|i| ((i * 7 + i / 5) % 16) as u8).collect();
    let sampler = TextSampler::new(data, 12).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    sampler.batch(2, &mut rng, &Device::Cpu).unwrap()
}

fn training_config(exit_weight: f64) -> TrainingConfig {
    TrainingConfig {
        learning_rate: 1e-2,
        exit_weight,
        seq_len: 12,
        prime_length: 8,
        generate_length: 32,
        ..Default::default()
    }
}

fn snapshot(vars: &[candle_core::Var]) -> Vec<Vec<f32>> {
    vars.iter()
        .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
        .collect()
}

#[test]
fn test_combined_loss_weights() {
    let model = tiny_model();
    let (full, early) = model.loss(&batch(0)).unwrap();
    let full_value: f32 = full.to_scalar().unwrap();
    let early_value: f32 = early.to_scalar().unwrap();

    for w in [0.0, 1.0, 5.0] {
        let total: f32 = TrainingObjective::new(w)
            .unwrap()
            .combine(&full, &early)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(total, full_value + w as f32 * early_value, "w = {w}");
    }
}

#[test]
fn test_zero_weight_leaves_exit_head_without_gradient() {
    let model = tiny_model();
    let (full, early) = model.loss(&batch(1)).unwrap();
    let total = TrainingObjective::new(0.0)
        .unwrap()
        .combine(&full, &early)
        .unwrap();
    let grads = total.backward().unwrap();

    let head_vars = model.early_exit_vars();
    assert!(!head_vars.is_empty());
    for var in &head_vars {
        if let Some(grad) = grads.get(var) {
            let norm: f32 = grad.sqr().unwrap().sum_all().unwrap().to_scalar().unwrap();
            assert_eq!(norm, 0.0);
        }
    }
    assert!(grad_norm(&grads, &model.trainable_vars()).unwrap() > 0.0);
}

#[test]
fn test_zero_weight_step_keeps_exit_head_fixed() {
    let model = tiny_model();
    let head_vars = model.early_exit_vars();
    let before = snapshot(&head_vars);

    let mut session = TrainingSession::new(model, &training_config(0.0)).unwrap();
    session.train_step(&[batch(2), batch(3)]).unwrap();

    assert_eq!(snapshot(&head_vars), before);
}

#[test]
fn test_clip_bounds_gradient_norm() {
    let model = tiny_model();
    let vars = model.trainable_vars();
    let (full, early) = model.loss(&batch(4)).unwrap();
    let mut grads = TrainingObjective::default()
        .combine(&full, &early)
        .unwrap()
        .backward()
        .unwrap();

    let max_norm = 1e-3;
    let before = clip_grad_norm(&mut grads, &vars, max_norm).unwrap();
    let after = grad_norm(&grads, &vars).unwrap();

    assert!(before > max_norm);
    assert!(after <= max_norm * (1.0 + 1e-4), "clipped norm {after}");
}

#[test]
fn test_clip_leaves_small_gradients() {
    let model = tiny_model();
    let vars = model.trainable_vars();
    let (full, early) = model.loss(&batch(5)).unwrap();
    let mut grads = TrainingObjective::default()
        .combine(&full, &early)
        .unwrap()
        .backward()
        .unwrap();

    let before = grad_norm(&grads, &vars).unwrap();
    let reported = clip_grad_norm(&mut grads, &vars, before * 10.0).unwrap();
    assert_eq!(reported, before);
    assert_eq!(grad_norm(&grads, &vars).unwrap(), before);
}

#[test]
fn test_step_counter_and_metrics() {
    let mut session = TrainingSession::new(tiny_model(), &training_config(1.0)).unwrap();
    assert_eq!(session.step_count(), 0);

    let first = session.train_step(&[batch(6)]).unwrap();
    let second = session.train_step(&[batch(7), batch(8)]).unwrap();

    assert_eq!(first.step, 1);
    assert_eq!(second.step, 2);
    assert_eq!(session.step_count(), 2);
    assert!((second.total_loss - (second.full_loss + second.early_exit_loss)).abs() < 1e-4);
    assert!(second.grad_norm.is_finite());
    assert!(session.train_step(&[]).is_err());
}

#[test]
fn test_training_reduces_both_losses() {
    let mut session = TrainingSession::new(tiny_model(), &training_config(1.0)).unwrap();
    let data = batch(9);

    let initial = session.evaluate(&data).unwrap();
    for _ in 0..30 {
        session.train_step(&[data.clone()]).unwrap();
    }
    let trained = session.evaluate(&data).unwrap();

    assert!(trained.full_loss < initial.full_loss);
    assert!(trained.early_exit_loss < initial.early_exit_loss);
}

#[test]
fn test_oversized_lengths_rejected() {
    let max = ModelConfig::tiny().max_position_embeddings;

    let long_windows = TrainingConfig {
        seq_len: max + 1,
        ..training_config(1.0)
    };
    assert!(matches!(
        TrainingSession::new(tiny_model(), &long_windows),
        Err(Error::InvalidConfig(_))
    ));

    let long_generation = TrainingConfig {
        generate_length: max + 1,
        ..training_config(1.0)
    };
    assert!(matches!(
        TrainingSession::new(tiny_model(), &long_generation),
        Err(Error::InvalidConfig(_))
    ));

    let at_limit = TrainingConfig {
        seq_len: max,
        generate_length: max,
        ..training_config(1.0)
    };
    assert!(TrainingSession::new(tiny_model(), &at_limit).is_ok());
}
