//! Continuous position bias (SwinV2 style, https://arxiv.org/abs/2111.09883)
//!
//! Relative positions between query and sampled key positions are encoded as
//! `sign(d) * ln(|d| + 1)` and turned into one bias per head by a small MLP.
//! Keys differ per offset group, so the MLP emits `heads / offset_groups`
//! channels and the group axis is folded into the head axis afterwards.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::config::DeformableAttention1DConfig;
use crate::model::layout::groups_to_heads;

/// Position bias MLP: `depth` hidden layers with ReLU, then a linear head
///
/// Weight names follow `nn.Sequential(nn.Sequential(Linear, ReLU), ..., Linear)`:
/// hidden layer `i` lives at `{i}.0`, the head at `{depth}`.
pub struct Mlp {
    hidden: Vec<Linear>,
    head: Linear,
}

impl Mlp {
    pub fn load(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        depth: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = (0..depth)
            .map(|i| {
                let in_dim = if i == 0 { input_dim } else { hidden_dim };
                linear(in_dim, hidden_dim, vb.pp(format!("{i}.0")))
            })
            .collect::<Result<Vec<_>>>()?;
        let head_in = if depth == 0 { input_dim } else { hidden_dim };
        let head = linear(head_in, output_dim, vb.pp(depth.to_string()))?;
        Ok(Self { hidden, head })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self
            .hidden
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs)?.relu())?;
        self.head.forward(&xs)
    }
}

/// Signed log distance between every query and every sampled position
///
/// # Arguments
/// * `grid_q` - Normalized query positions [N]
/// * `grid_kv` - Normalized sampled positions [(B*G), M]
///
/// # Returns
/// `sign(q_i - kv_j) * ln(|q_i - kv_j| + 1)` as [(B*G), N, M, 1]
pub fn signed_log_distance(grid_q: &Tensor, grid_kv: &Tensor) -> Result<Tensor> {
    let n = grid_q.dims1()?;
    let (bg, m) = grid_kv.dims2()?;

    let q = grid_q.reshape((1, n, 1, 1))?;
    let kv = grid_kv.reshape((bg, 1, m, 1))?;
    let pos = q.broadcast_sub(&kv)?;

    let magnitude = (pos.abs()? + 1.0)?.log()?;
    pos.sign()?.mul(&magnitude)
}

pub struct ContinuousPositionBias {
    mlp: Mlp,
    offset_groups: usize,
    span: tracing::Span,
}

impl ContinuousPositionBias {
    pub fn load(config: &DeformableAttention1DConfig, vb: VarBuilder) -> Result<Self> {
        let mlp = Mlp::load(
            1,
            config.cpb_dim(),
            config.heads_per_group(),
            config.cpb_depth,
            vb.pp("mlp"),
        )?;
        Ok(Self {
            mlp,
            offset_groups: config.offset_groups(),
            span: tracing::span!(tracing::Level::TRACE, "cpb"),
        })
    }

    /// Bias added to the attention logits
    ///
    /// # Arguments
    /// * `grid_q` - Normalized query positions [N]
    /// * `grid_kv` - Normalized deformed positions [(B*G), M]
    ///
    /// # Returns
    /// Bias [B, heads, N, M]
    pub fn forward(&self, grid_q: &Tensor, grid_kv: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();

        let bias = signed_log_distance(grid_q, grid_kv)?;
        // [(B*G), N, M, heads / G]
        let bias = self.mlp.forward(&bias)?;
        groups_to_heads(&bias, self.offset_groups)
    }
}
