//! Deformable Attention 1D Configuration
//!
//! Hyper-parameters are fixed for the lifetime of a module. Defaults follow the
//! reference PyTorch module (`dim_head = 64`, `heads = 8`, `downsample_factor = 4`,
//! `offset_scale = 4`, `offset_kernel_size = 6`).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for [`DeformableAttention1D`](crate::DeformableAttention1D)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeformableAttention1DConfig {
    /// Channel width of the input and output sequences
    pub dim: usize,
    /// Width of a single attention head
    pub dim_head: usize,
    /// Number of attention heads
    pub heads: usize,
    /// Dropout probability on the attention weights (training mode only)
    pub dropout: f32,
    /// Ratio between sequence length and number of sampling positions
    pub downsample_factor: usize,
    /// Maximum magnitude of a predicted offset, in downsampled grid units
    pub offset_scale: f64,
    /// Number of independent offset fields; `None` means one per head
    pub offset_groups: Option<usize>,
    /// Kernel size of the depthwise offset convolution
    pub offset_kernel_size: usize,
    /// Number of hidden layers in the position bias MLP
    pub cpb_depth: usize,
    /// Hidden width of the position bias MLP; `None` means `dim / 4`
    pub cpb_dim: Option<usize>,
}

impl Default for DeformableAttention1DConfig {
    fn default() -> Self {
        Self::base()
    }
}

impl DeformableAttention1DConfig {
    /// Reference defaults for a given channel width
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            dim_head: 64,
            heads: 8,
            dropout: 0.0,
            downsample_factor: 4,
            offset_scale: 4.0,
            offset_groups: None,
            offset_kernel_size: 6,
            cpb_depth: 2,
            cpb_dim: None,
        }
    }

    /// Small configuration: 2 heads of width 4 sharing a single offset field
    pub fn tiny() -> Self {
        Self {
            dim: 16,
            dim_head: 4,
            heads: 2,
            dropout: 0.0,
            downsample_factor: 2,
            offset_scale: 4.0,
            offset_groups: Some(1),
            offset_kernel_size: 6,
            cpb_depth: 2,
            cpb_dim: None,
        }
    }

    /// Reference configuration at width 512
    pub fn base() -> Self {
        Self::new(512)
    }

    /// Number of offset groups after applying the default
    pub fn offset_groups(&self) -> usize {
        self.offset_groups.unwrap_or(self.heads)
    }

    /// Total width of the query/key/value projections
    pub fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }

    /// Channels handled by one offset group
    pub fn offset_dims(&self) -> usize {
        self.inner_dim() / self.offset_groups()
    }

    /// Heads served by one offset group
    pub fn heads_per_group(&self) -> usize {
        self.heads / self.offset_groups()
    }

    /// Hidden width of the position bias MLP, `dim / 4` unless set
    pub fn cpb_dim(&self) -> usize {
        self.cpb_dim.unwrap_or(self.dim / 4)
    }

    /// Padding of the depthwise offset convolution
    pub fn offset_padding(&self) -> usize {
        self.offset_kernel_size.saturating_sub(self.downsample_factor) / 2
    }

    /// Number of sampling positions produced for a sequence of length `seq_len`
    ///
    /// This is the output length of the strided offset convolution,
    /// `(n + 2p - k) / s + 1`, which reduces to `n / s`. Returns 0 when the
    /// sequence is shorter than the downsample factor.
    pub fn downsampled_len(&self, seq_len: usize) -> usize {
        let padded = seq_len + 2 * self.offset_padding();
        if padded < self.offset_kernel_size {
            return 0;
        }
        (padded - self.offset_kernel_size) / self.downsample_factor + 1
    }

    /// Check every construction-time constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dim", self.dim),
            ("dim_head", self.dim_head),
            ("heads", self.heads),
            ("downsample_factor", self.downsample_factor),
            ("offset_kernel_size", self.offset_kernel_size),
            ("offset_groups", self.offset_groups()),
            ("cpb_depth", self.cpb_depth),
            ("cpb_dim", self.cpb_dim()),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        let offset_groups = self.offset_groups();
        if self.heads % offset_groups != 0 {
            return Err(ConfigError::HeadsNotDivisible {
                heads: self.heads,
                offset_groups,
            });
        }

        if self.offset_kernel_size < self.downsample_factor {
            return Err(ConfigError::KernelTooSmall {
                kernel: self.offset_kernel_size,
                downsample: self.downsample_factor,
            });
        }
        if (self.offset_kernel_size - self.downsample_factor) % 2 != 0 {
            return Err(ConfigError::OddPadding {
                kernel: self.offset_kernel_size,
                downsample: self.downsample_factor,
            });
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Dropout(self.dropout));
        }
        if !self.offset_scale.is_finite() || self.offset_scale <= 0.0 {
            return Err(ConfigError::OffsetScale(self.offset_scale));
        }

        Ok(())
    }

    /// Parse a JSON configuration; missing fields take the reference defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_defaults() {
        let config = DeformableAttention1DConfig::new(128);
        assert_eq!(config.offset_groups(), 8);
        assert_eq!(config.inner_dim(), 512);
        assert_eq!(config.offset_dims(), 64);
        assert_eq!(config.cpb_dim(), 32);
        assert_eq!(config.offset_padding(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiny_preset() {
        let config = DeformableAttention1DConfig::tiny();
        assert!(config.validate().is_ok());
        assert_eq!(config.heads_per_group(), 2);
        assert_eq!(config.offset_padding(), 2);
        assert_eq!(config.downsampled_len(8), 4);
    }

    #[test]
    fn test_downsampled_len() {
        let config = DeformableAttention1DConfig::new(64);
        assert_eq!(config.downsampled_len(16), 4);
        assert_eq!(config.downsampled_len(17), 4);
        assert_eq!(config.downsampled_len(4), 1);
        assert_eq!(config.downsampled_len(3), 0);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let config = DeformableAttention1DConfig {
            heads: 6,
            offset_groups: Some(4),
            ..DeformableAttention1DConfig::new(64)
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HeadsNotDivisible {
                heads: 6,
                offset_groups: 4
            })
        );
    }

    #[test]
    fn test_rejects_odd_padding() {
        let config = DeformableAttention1DConfig {
            offset_kernel_size: 5,
            ..DeformableAttention1DConfig::new(64)
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OddPadding {
                kernel: 5,
                downsample: 4
            })
        );
    }

    #[test]
    fn test_rejects_small_kernel() {
        let config = DeformableAttention1DConfig {
            offset_kernel_size: 2,
            ..DeformableAttention1DConfig::new(64)
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KernelTooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_scalars() {
        let base = DeformableAttention1DConfig::new(64);

        let config = DeformableAttention1DConfig {
            dropout: 1.0,
            ..base.clone()
        };
        assert_eq!(config.validate(), Err(ConfigError::Dropout(1.0)));

        let config = DeformableAttention1DConfig {
            offset_scale: 0.0,
            ..base.clone()
        };
        assert_eq!(config.validate(), Err(ConfigError::OffsetScale(0.0)));

        // dim / 4 == 0
        let config = DeformableAttention1DConfig { dim: 3, ..base };
        assert_eq!(config.validate(), Err(ConfigError::Zero { name: "cpb_dim" }));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            DeformableAttention1DConfig::from_json(r#"{"dim": 32, "heads": 4, "dim_head": 8}"#)
                .unwrap();
        assert_eq!(config.dim, 32);
        assert_eq!(config.heads, 4);
        assert_eq!(config.downsample_factor, 4);
        assert_eq!(config.offset_groups(), 4);
        assert_eq!(config.cpb_dim(), 8);
    }
}
