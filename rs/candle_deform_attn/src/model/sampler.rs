//! Sub-pixel sampling along the sequence axis.
//!
//! `grid_sample_1d` is the one dimensional counterpart of PyTorch's
//! `F.grid_sample(mode="bilinear", padding_mode="zeros", align_corners=False)`:
//! positions live in `[-1, 1]`, every interpolation tap that lands outside
//! the sequence contributes zero, and positions outside `[-1, 1]` sample zero.

use candle_core::{DType, Result, Tensor, D};

/// Map positions `0..n` on the last axis to `[-1, 1]`
///
/// Index 0 maps to exactly -1 and index `n - 1` to exactly +1. Fractional
/// positions (deformed grids) are mapped by the same affine rule. A field of
/// length 1 has no extent and maps to 0.
pub fn normalize_grid(grid: &Tensor) -> Result<Tensor> {
    let n = grid.dim(D::Minus1)?;
    if n <= 1 {
        return grid.zeros_like();
    }

    // 2x / (n - 1) - 1, written as (2x - (n - 1)) / (n - 1) so both endpoints are exact
    let extent = (n - 1) as f64;
    let denom = Tensor::new(extent, grid.device())?.to_dtype(grid.dtype())?;
    ((grid * 2.0)? - extent)?.broadcast_div(&denom)
}

/// Linear interpolation (1D grid_sample) implementation
///
/// # Arguments
/// * `input` - Feature tensor [N, C, L]
/// * `grid` - Sampling positions [N, M] with values nominally in [-1, 1]
///
/// # Returns
/// Sampled tensor [N, C, M]
///
/// Note: This implements align_corners=False semantics, so a position of -1
/// sits half a sample before the first element. Any position with `|x| > 1`
/// produces a zero vector.
pub fn grid_sample_1d(input: &Tensor, grid: &Tensor) -> Result<Tensor> {
    let _enter = tracing::span!(tracing::Level::TRACE, "grid-sample-1d").entered();

    let (n, c, l) = input.dims3()?;
    let (grid_n, m) = grid.dims2()?;
    if grid_n != n {
        candle_core::bail!("grid batch {} != feature batch {}", grid_n, n);
    }

    let dtype = input.dtype();

    // Unnormalize from [-1, 1] to sample coordinates: x = (x + 1) * L / 2 - 0.5
    let x = (((grid + 1.0)? * (l as f64 / 2.0))? - 0.5)?;

    // Neighbouring samples and their weights
    let x0 = x.floor()?;
    let x1 = (&x0 + 1.0)?;
    let w0 = (&x1 - &x)?;
    let w1 = (&x - &x0)?;

    // A tap is valid inside [0, L - 1], and only for positions inside [-1, 1]
    let in_range = grid.abs()?.le(1.0)?;
    let mask0 = x0
        .ge(0.0)?
        .mul(&x0.lt(l as f64)?)?
        .mul(&in_range)?
        .to_dtype(grid.dtype())?;
    let mask1 = x1
        .ge(0.0)?
        .mul(&x1.lt(l as f64)?)?
        .mul(&in_range)?
        .to_dtype(grid.dtype())?;
    let w0 = w0.mul(&mask0)?.unsqueeze(1)?.to_dtype(dtype)?;
    let w1 = w1.mul(&mask1)?.unsqueeze(1)?.to_dtype(dtype)?;

    // Clamp so invalid taps still gather a real element, the mask zeroes them
    let max_idx = (l - 1) as f64;
    let idx0 = x0.clamp(0.0, max_idx)?.to_dtype(DType::I64)?;
    let idx1 = x1.clamp(0.0, max_idx)?.to_dtype(DType::I64)?;

    // Expand indices for channel dimension: [N, 1, M] -> [N, C, M]
    let idx0 = idx0.reshape((n, 1, m))?.repeat((1, c, 1))?;
    let idx1 = idx1.reshape((n, 1, m))?.repeat((1, c, 1))?;

    let input = input.contiguous()?;
    let v0 = input.gather(&idx0, 2)?;
    let v1 = input.gather(&idx1, 2)?;

    v0.broadcast_mul(&w0)?.add(&v1.broadcast_mul(&w1)?)
}
