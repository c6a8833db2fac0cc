//! 1D deformable attention for candle.
//!
//! [`DeformableAttention1D`] attends from every position of a sequence to a
//! downsampled set of positions whose locations are shifted by learned,
//! per-group offsets. Sampled content is interpolated linearly, and a
//! continuous relative position bias is added to the attention logits.
//!
//! ```no_run
//! use candle_core::{DType, Device, Module, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use candle_deform_attn::{DeformableAttention1D, DeformableAttention1DConfig};
//!
//! # fn main() -> candle_core::Result<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let config = DeformableAttention1DConfig::new(512);
//! let attn = DeformableAttention1D::load(&config, vb)?;
//!
//! let xs = Tensor::randn(0f32, 1.0, (1, 1024, 512), &device)?;
//! let out = attn.forward(&xs)?;
//! assert_eq!(out.dims(), &[1, 1024, 512]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debug;
pub mod error;
pub mod model;

use candle_core::{Device, Result};

pub use config::DeformableAttention1DConfig;
pub use error::ConfigError;
pub use model::{DeformableAttention1D, DeformableAttentionOutput};

/// Select the compute device
pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if candle_core::utils::metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            tracing::info!(
                "Running on CPU, to run on GPU(metal), build with `--features metal`"
            );
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            tracing::info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}
