//! Early-exit training binary.
//!
//! Usage:
//!   early-exit-spec train --data <FILE> [OPTIONS]
//!
//! Examples:
//!   # Train on enwik8 with the default recipe
//!   early-exit-spec train --data ./data/enwik8.gz
//!
//!   # Smaller run from JSON configs, on CPU
//!   early-exit-spec train --data corpus.txt --config train.json --model-config model.json --cpu

use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use early_exit_spec::training::{ByteCorpus, DEFAULT_TRAIN_FRACTION};
use early_exit_spec::{
    base_decode, benchmark, decode_tokens, speculative_decode, EarlyExitTransformer, ModelConfig,
    SamplingConfig, SamplingStrategy, TextSampler, TrainingConfig, TrainingSession,
};

#[derive(Parser)]
#[command(name = "early-exit-spec")]
#[command(about = "Early-exit transformer training with same-model speculative decoding")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on a byte corpus, periodically comparing base and speculative decoding
    Train {
        /// Corpus file (gzip when it ends in .gz)
        #[arg(short, long)]
        data: PathBuf,

        /// Training configuration JSON (missing keys keep defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model configuration JSON
        #[arg(long)]
        model_config: Option<PathBuf>,

        /// Bytes read from the corpus
        #[arg(long, default_value = "95000000")]
        max_bytes: usize,

        /// Run on CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args.command {
        Command::Train {
            data,
            config,
            model_config,
            max_bytes,
            cpu,
        } => {
            let config = match config {
                Some(path) => TrainingConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => TrainingConfig::default(),
            };
            let model_config = match model_config {
                Some(path) => ModelConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ModelConfig::default(),
            };
            let device = if cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available(0)?
            };
            train(&data, max_bytes, config, model_config, &device)
        }
    }
}

fn train(
    data: &Path,
    max_bytes: usize,
    config: TrainingConfig,
    model_config: ModelConfig,
    device: &Device,
) -> anyhow::Result<()> {
    let corpus = ByteCorpus::from_file(data, Some(max_bytes), DEFAULT_TRAIN_FRACTION)?;
    let train_sampler = TextSampler::new(corpus.train, config.seq_len)?;
    let valid_sampler = TextSampler::new(corpus.valid, config.seq_len)?;

    let model = EarlyExitTransformer::new(&model_config, device)?;
    info!(
        parameters = model.parameter_count(),
        depth = model.num_layers(),
        early_exit_layer = model.early_exit_layer(),
        ?device,
        "model initialized"
    );

    let mut session = TrainingSession::new(model, &config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    for i in 0..config.num_batches {
        let micro_batches = (0..config.grad_accum_every)
            .map(|_| train_sampler.batch(config.batch_size, &mut rng, device))
            .collect::<early_exit_spec::Result<Vec<_>>>()?;
        session.train_step(&micro_batches)?;

        if config.validates_at(i) {
            let batch = valid_sampler.batch(config.batch_size, &mut rng, device)?;
            let metrics = session.evaluate(&batch)?;
            info!(
                step = i,
                full_loss = metrics.full_loss,
                early_exit_loss = metrics.early_exit_loss,
                "validation"
            );
        }

        if config.generates_at(i) {
            compare_decoders(&session, &valid_sampler, &config, i, &mut rng)?;
        }
    }

    info!(steps = session.step_count(), "training finished");
    Ok(())
}

/// Decodes one validation prompt with both decoders and reports text and timing.
fn compare_decoders(
    session: &TrainingSession,
    valid_sampler: &TextSampler,
    config: &TrainingConfig,
    step: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let window = valid_sampler.sample(rng);
    let prompt = &window[..config.prime_length.min(window.len())];
    info!(step, prime = %decode_tokens(prompt), "generation prompt");

    let sampling = SamplingConfig::new(SamplingStrategy::default()).seed(config.seed ^ step as u64);
    let model = session.model();

    let base = benchmark(|| base_decode(model, prompt, config.generate_length, &sampling));
    let base_elapsed_ms = base.elapsed_ms();
    let base_tokens = base.output?;

    let spec = benchmark(|| {
        speculative_decode(model, prompt, config.generate_length, config.gamma, &sampling)
    });
    let spec_elapsed_ms = spec.elapsed_ms();
    let spec_output = spec.output?;

    info!(step, text = %decode_tokens(&base_tokens), "base decoding");
    info!(step, text = %decode_tokens(&spec_output.tokens), "spec decoding");
    info!(
        step,
        base_ms = %format!("{base_elapsed_ms:.3}"),
        spec_ms = %format!("{spec_elapsed_ms:.3}"),
        avg_accepted = %format!("{:.1} / {}", spec_output.avg_accepted, config.gamma),
        "decoding benchmark"
    );
    Ok(())
}
