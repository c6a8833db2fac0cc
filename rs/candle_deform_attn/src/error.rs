//! Configuration errors for the deformable attention module.
//!
//! Shape problems at call time are reported through `candle_core::Error`
//! like every other tensor failure; only an invalid configuration gets its
//! own type so it can be matched on before any weights are touched.

use thiserror::Error;

/// Reasons a [`DeformableAttention1DConfig`](crate::DeformableAttention1DConfig)
/// cannot be turned into a module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("heads ({heads}) must be divisible by offset_groups ({offset_groups})")]
    HeadsNotDivisible { heads: usize, offset_groups: usize },

    #[error(
        "offset_kernel_size ({kernel}) minus downsample_factor ({downsample}) must be even"
    )]
    OddPadding { kernel: usize, downsample: usize },

    #[error(
        "offset_kernel_size ({kernel}) must not be smaller than downsample_factor ({downsample})"
    )]
    KernelTooSmall { kernel: usize, downsample: usize },

    #[error("dropout must be in [0, 1), got {0}")]
    Dropout(f32),

    #[error("offset_scale must be finite and positive, got {0}")]
    OffsetScale(f64),
}

impl From<ConfigError> for candle_core::Error {
    fn from(err: ConfigError) -> Self {
        candle_core::Error::wrap(err)
    }
}
