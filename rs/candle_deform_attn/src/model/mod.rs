//! 1D Deformable Attention
//!
//! Each query position attends to a small set of positions on a downsampled
//! grid. Every offset group predicts its own continuous displacement for the
//! grid points, the grouped query features are resampled at the displaced
//! positions, and keys/values are projected from the resampled content. A
//! continuous position bias over the signed log distance between query and
//! sampled positions is added to the logits before the softmax.
//!
//! Shapes used below: B batch, N sequence length, C `dim`, G offset groups,
//! H heads, D `dim_head`, M = N / `downsample_factor` sampled positions.

pub mod cpb;
pub mod layout;
pub mod offsets;
pub mod projector;
pub mod sampler;

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{Dropout, VarBuilder};

use crate::config::DeformableAttention1DConfig;
use cpb::ContinuousPositionBias;
use layout::{expand_groups_to_heads, group_channels, merge_heads, split_heads, ungroup_channels};
use offsets::OffsetPredictor;
use projector::LinearProjector;
use sampler::{grid_sample_1d, normalize_grid};

/// Everything computed by one forward pass
#[derive(Debug, Clone)]
pub struct DeformableAttentionOutput {
    /// Attended sequence [B, N, C]
    pub output: Tensor,
    /// Predicted offsets [(B*G), M]
    pub offsets: Tensor,
    /// Deformed grid in downsampled position units [(B*G), M]
    pub vgrid: Tensor,
    /// Deformed grid normalized to [-1, 1] [(B*G), M]
    pub vgrid_scaled: Tensor,
    /// Deformed grid as seen by each head [B, H, M]
    pub head_grid: Tensor,
    /// Attention weights after softmax and dropout [B, H, N, M]
    pub attention: Tensor,
}

pub struct DeformableAttention1D {
    config: DeformableAttention1DConfig,
    scale: f64,

    /// Query projection
    to_q: LinearProjector,
    /// Joint key/value projection `inner_dim -> 2 * inner_dim` applied to the resampled queries
    to_kv: LinearProjector,
    /// Output projection
    to_out: LinearProjector,
    /// Offset network shared by all groups
    to_offsets: OffsetPredictor,
    /// Continuous position bias
    rel_pos_bias: ContinuousPositionBias,
    dropout: Dropout,

    span: tracing::Span,
}

impl DeformableAttention1D {
    /// Load DeformableAttention1D from weights
    ///
    /// Fails with a wrapped [`ConfigError`](crate::ConfigError) when the
    /// configuration is invalid, before any weight is requested.
    pub fn load(config: &DeformableAttention1DConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let inner_dim = config.inner_dim();
        let to_q = LinearProjector::query(config.dim, inner_dim, vb.pp("to_q"))?;
        let to_kv = LinearProjector::key_value(inner_dim, inner_dim, vb.pp("to_kv"))?;
        let to_out = LinearProjector::output(inner_dim, config.dim, vb.pp("to_out"))?;
        let to_offsets = OffsetPredictor::load(config, vb.pp("to_offsets"))?;
        let rel_pos_bias = ContinuousPositionBias::load(config, vb.pp("rel_pos_bias"))?;

        tracing::debug!(
            dim = config.dim,
            heads = config.heads,
            dim_head = config.dim_head,
            offset_groups = config.offset_groups(),
            downsample_factor = config.downsample_factor,
            "loaded deformable attention"
        );

        Ok(Self {
            config: config.clone(),
            scale: (config.dim_head as f64).powf(-0.5),
            to_q,
            to_kv,
            to_out,
            to_offsets,
            rel_pos_bias,
            dropout: Dropout::new(config.dropout),
            span: tracing::span!(tracing::Level::TRACE, "deform-attn-1d"),
        })
    }

    pub fn config(&self) -> &DeformableAttention1DConfig {
        &self.config
    }

    /// Forward pass, with dropout on the attention weights when `train` is set
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.forward_detailed(xs, train)?.output)
    }

    /// Forward pass returning the output and the unnormalized deformed grid [(B*G), M]
    pub fn forward_with_grid(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let out = self.forward_detailed(xs, train)?;
        Ok((out.output, out.vgrid))
    }

    /// Forward pass exposing every intermediate of interest
    ///
    /// # Arguments
    /// * `xs` - Input sequence [B, N, C]
    /// * `train` - Apply dropout to the attention weights
    pub fn forward_detailed(&self, xs: &Tensor, train: bool) -> Result<DeformableAttentionOutput> {
        let _enter = self.span.enter();

        let (b, n, c) = match xs.dims() {
            &[b, n, c] => (b, n, c),
            dims => candle_core::bail!(
                "expected input [batch, length, {}], got {:?}",
                self.config.dim,
                dims
            ),
        };
        if c != self.config.dim {
            candle_core::bail!("input has {} channels, expected {}", c, self.config.dim);
        }
        if n < self.config.downsample_factor {
            candle_core::bail!(
                "sequence length {} is shorter than downsample_factor {}",
                n,
                self.config.downsample_factor
            );
        }

        let device = xs.device();
        let dtype = xs.dtype();
        let heads = self.config.heads;
        let groups = self.config.offset_groups();

        // Queries: [B, N, H*D]
        let q = self.to_q.forward(xs)?;

        // Grouped queries feed both the offset network and the resampling: [(B*G), D_g, N]
        let grouped = group_channels(&q, groups)?;
        let offsets = self.to_offsets.forward(&grouped)?;
        let m = offsets.dim(D::Minus1)?;

        // Deformed grid: base positions 0..M plus offsets
        let base = Tensor::arange(0u32, m as u32, device)?.to_dtype(dtype)?;
        let vgrid = offsets.broadcast_add(&base)?;
        let vgrid_scaled = normalize_grid(&vgrid)?;

        // Resample grouped queries at the deformed positions: [(B*G), D_g, M] -> [B, M, H*D]
        let kv_feats = grid_sample_1d(&grouped, &vgrid_scaled)?;
        let kv_feats = ungroup_channels(&kv_feats, b)?;

        let kv = self.to_kv.forward_chunks(&kv_feats)?;
        let (k, v) = (&kv[0], &kv[1]);

        let q = (q * self.scale)?;

        // [B, H, N, D] and [B, H, M, D]
        let q = split_heads(&q, heads)?;
        let k = split_heads(k, heads)?;
        let v = split_heads(v, heads)?;

        // Similarity: [B, H, N, M]
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let sim = q.matmul(&k_t)?;

        // Relative position bias between the query grid and the deformed grid
        let seq = Tensor::arange(0u32, n as u32, device)?.to_dtype(dtype)?;
        let seq_scaled = normalize_grid(&seq)?;
        let rel_pos_bias = self.rel_pos_bias.forward(&seq_scaled, &vgrid_scaled)?;
        let sim = (sim + rel_pos_bias)?;

        // Row max is a constant for the backward pass
        let sim = sim.broadcast_sub(&sim.max_keepdim(D::Minus1)?.detach())?;

        let attention = candle_nn::ops::softmax_last_dim(&sim)?;
        let attention = self.dropout.forward(&attention, train)?;

        // [B, H, N, D] -> [B, N, H*D] -> [B, N, C]
        let out = attention.matmul(&v)?;
        let out = merge_heads(&out)?;
        let output = self.to_out.forward(&out)?;

        let head_grid = expand_groups_to_heads(&vgrid, groups, self.config.heads_per_group())?;

        Ok(DeformableAttentionOutput {
            output,
            offsets,
            vgrid,
            vgrid_scaled,
            head_grid,
            attention,
        })
    }
}

impl Module for DeformableAttention1D {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)
    }
}
