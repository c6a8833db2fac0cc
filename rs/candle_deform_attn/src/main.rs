//! Run 1D deformable attention over a synthetic sequence.
//!
//! Weights come from a safetensors file (e.g. exported from the PyTorch module)
//! or are freshly initialized.

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use candle_deform_attn::debug::TensorStats;
use candle_deform_attn::{DeformableAttention1D, DeformableAttention1DConfig};

/// Configuration presets
#[derive(Clone, Copy, ValueEnum, Debug)]
enum Which {
    Tiny,
    Base,
}

impl Which {
    fn config(&self) -> DeformableAttention1DConfig {
        match self {
            Which::Tiny => DeformableAttention1DConfig::tiny(),
            Which::Base => DeformableAttention1DConfig::base(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    /// Enable tracing (generates a trace-timestamp.json file).
    #[arg(long)]
    tracing: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration preset, ignored when --config is given.
    #[arg(long, value_enum, default_value_t = Which::Tiny)]
    which: Which,

    /// JSON configuration file; missing fields take the reference defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to model weights, in safetensors format. Random init when omitted.
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Save freshly initialized weights to this safetensors file.
    #[arg(long)]
    save_weights: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    batch: usize,

    #[arg(long, default_value_t = 64)]
    seq_len: usize,

    /// Apply attention dropout.
    #[arg(long)]
    train: bool,

    /// Print the deformed sampling grid.
    #[arg(long)]
    print_grid: bool,
}

impl Args {
    fn model_config(&self) -> anyhow::Result<DeformableAttention1DConfig> {
        let config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                DeformableAttention1DConfig::from_json(&json)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => self.which.config(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Deterministic input sequence [batch, seq_len, dim] with values in [-1, 1]
fn test_sequence(dims: (usize, usize, usize), device: &Device) -> candle_core::Result<Tensor> {
    let (batch_size, seq_len, dim) = dims;
    let data: Vec<f32> = (0..batch_size * seq_len * dim)
        .map(|i| {
            let (b, rest) = (i / (seq_len * dim), i % (seq_len * dim));
            let (n, c) = (rest / dim, rest % dim);
            let phase = (c + 1) as f32 * 0.1 + b as f32 * 0.7;
            (n as f32 * phase).sin()
        })
        .collect();
    Tensor::from_vec(data, dims, device)
}

fn main() -> anyhow::Result<()> {
    use tracing_chrome::ChromeLayerBuilder;

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let (chrome_layer, _guard) = if args.tracing {
        let (layer, guard) = ChromeLayerBuilder::new().build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };
    tracing_subscriber::registry()
        .with(chrome_layer)
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();

    let device = candle_deform_attn::device(args.cpu)?;
    println!("Using device: {:?}", device);

    let config = args.model_config()?;
    println!("Model config:");
    println!("  dim: {}", config.dim);
    println!("  heads: {} x {}", config.heads, config.dim_head);
    println!("  offset groups: {}", config.offset_groups());
    println!(
        "  downsample factor: {} (kernel {}, scale {})",
        config.downsample_factor, config.offset_kernel_size, config.offset_scale
    );

    let varmap = VarMap::new();
    let vb = match &args.weights {
        Some(path) => {
            println!("Loading weights from: {:?}", path);
            unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? }
        }
        None => {
            println!("Initializing random weights");
            VarBuilder::from_varmap(&varmap, DType::F32, &device)
        }
    };
    let model = DeformableAttention1D::load(&config, vb)?;

    if let Some(path) = &args.save_weights {
        if args.weights.is_some() {
            anyhow::bail!("--save-weights only applies to freshly initialized weights");
        }
        varmap.save(path)?;
        println!("Weights saved to: {:?}", path);
    }

    let xs = test_sequence((args.batch, args.seq_len, config.dim), &device)?;
    println!("Input: {}", TensorStats::from_tensor(&xs)?);

    let start = Instant::now();
    let out = model.forward_detailed(&xs, args.train)?;
    device.synchronize()?;
    println!("Forward pass: {:.3} ms", start.elapsed().as_secs_f64() * 1e3);

    let stats = TensorStats::from_tensor(&out.output)?;
    println!("Output: {}", stats);
    if stats.non_finite > 0 {
        tracing::warn!(count = stats.non_finite, "output contains non-finite values");
    }
    println!("Offsets: {}", TensorStats::from_tensor(&out.offsets)?);

    if args.print_grid {
        let grid = out.vgrid.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let groups = config.offset_groups();
        for (row, positions) in grid.iter().enumerate() {
            let formatted: Vec<String> = positions.iter().map(|p| format!("{:.3}", p)).collect();
            println!(
                "  batch {} group {}: [{}]",
                row / groups,
                row % groups,
                formatted.join(", ")
            );
        }
    }

    Ok(())
}
