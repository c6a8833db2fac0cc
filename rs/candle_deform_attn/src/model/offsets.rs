//! Offset prediction from grouped query features.
//!
//! Stages, in order:
//! 1. depthwise strided conv1d (`to_offsets.1`)
//! 2. GELU
//! 3. pointwise conv1d to a single channel, no bias (`to_offsets.3`)
//! 4. tanh
//! 5. scale by `offset_scale`
//!
//! Indices in the weight names follow the PyTorch `nn.Sequential` the weights
//! are exported from (index 0 is a rearrange, 2 the GELU).

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv1d, conv1d_no_bias, Conv1d, Conv1dConfig, VarBuilder};

use crate::config::DeformableAttention1DConfig;

pub struct OffsetPredictor {
    /// Depthwise conv: `offset_dims -> offset_dims`, one filter per channel
    depthwise: Conv1d,
    /// Pointwise conv: `offset_dims -> 1`
    pointwise: Conv1d,
    offset_scale: f64,
    span: tracing::Span,
}

impl OffsetPredictor {
    pub fn load(config: &DeformableAttention1DConfig, vb: VarBuilder) -> Result<Self> {
        let offset_dims = config.offset_dims();

        let depthwise_cfg = Conv1dConfig {
            padding: config.offset_padding(),
            stride: config.downsample_factor,
            groups: offset_dims,
            ..Default::default()
        };
        let depthwise = conv1d(
            offset_dims,
            offset_dims,
            config.offset_kernel_size,
            depthwise_cfg,
            vb.pp("1"),
        )?;
        let pointwise = conv1d_no_bias(offset_dims, 1, 1, Conv1dConfig::default(), vb.pp("3"))?;

        Ok(Self {
            depthwise,
            pointwise,
            offset_scale: config.offset_scale,
            span: tracing::span!(tracing::Level::TRACE, "offsets"),
        })
    }

    /// Predict offsets
    ///
    /// # Arguments
    /// * `grouped` - Grouped query features [(B*G), D, N]
    ///
    /// # Returns
    /// Offsets [(B*G), N_down] inside `(-offset_scale, offset_scale)`; only a
    /// saturated tanh (±1 after f32 rounding) reaches the bounds
    pub fn forward(&self, grouped: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();

        let xs = self.depthwise.forward(grouped)?;
        let xs = xs.gelu_erf()?;
        let xs = self.pointwise.forward(&xs)?;
        // [(B*G), 1, N_down] -> [(B*G), N_down]
        let xs = xs.squeeze(1)?;
        xs.tanh()? * self.offset_scale
    }
}
