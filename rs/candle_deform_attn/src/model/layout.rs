//! Named reshapes between the layouts used by the deformable attention.
//!
//! Axis letters: `b` batch, `g` offset group, `h` head, `n` query position,
//! `m` sampled position, `d` channels of a group or head, `o` heads of a group.
//! Groups and heads are always packed group-major, so head `h` belongs to
//! group `h / (heads / groups)`.

use candle_core::{Result, Tensor};

/// `[b, n, (g d)] -> [(b g), d, n]`
pub fn group_channels(xs: &Tensor, groups: usize) -> Result<Tensor> {
    let (b, n, c) = xs.dims3()?;
    if groups == 0 || c % groups != 0 {
        candle_core::bail!("{} channels cannot be split into {} groups", c, groups);
    }
    let d = c / groups;
    xs.reshape((b, n, groups, d))?
        .permute((0, 2, 3, 1))?
        .contiguous()?
        .reshape((b * groups, d, n))
}

/// `[(b g), d, m] -> [b, m, (g d)]`
pub fn ungroup_channels(xs: &Tensor, batch: usize) -> Result<Tensor> {
    let (bg, d, m) = xs.dims3()?;
    if batch == 0 || bg % batch != 0 {
        candle_core::bail!("leading dim {} is not a multiple of batch {}", bg, batch);
    }
    let g = bg / batch;
    xs.reshape((batch, g, d, m))?
        .permute((0, 3, 1, 2))?
        .contiguous()?
        .reshape((batch, m, g * d))
}

/// `[b, n, (h d)] -> [b, h, n, d]`
pub fn split_heads(xs: &Tensor, heads: usize) -> Result<Tensor> {
    let (b, n, c) = xs.dims3()?;
    if heads == 0 || c % heads != 0 {
        candle_core::bail!("{} channels cannot be split into {} heads", c, heads);
    }
    xs.reshape((b, n, heads, c / heads))?
        .transpose(1, 2)?
        .contiguous()
}

/// `[b, h, n, d] -> [b, n, (h d)]`
pub fn merge_heads(xs: &Tensor) -> Result<Tensor> {
    let (b, h, n, d) = xs.dims4()?;
    xs.transpose(1, 2)?.contiguous()?.reshape((b, n, h * d))
}

/// `[(b g), n, m, o] -> [b, (g o), n, m]`
pub fn groups_to_heads(xs: &Tensor, groups: usize) -> Result<Tensor> {
    let (bg, n, m, o) = xs.dims4()?;
    if groups == 0 || bg % groups != 0 {
        candle_core::bail!("leading dim {} is not a multiple of {} groups", bg, groups);
    }
    let b = bg / groups;
    xs.reshape((b, groups, n, m, o))?
        .permute((0, 1, 4, 2, 3))?
        .contiguous()?
        .reshape((b, groups * o, n, m))
}

/// `[(b g), m] -> [b, (g o), m]`, repeating each group's row for its `o` heads
pub fn expand_groups_to_heads(xs: &Tensor, groups: usize, heads_per_group: usize) -> Result<Tensor> {
    let (bg, m) = xs.dims2()?;
    if groups == 0 || bg % groups != 0 {
        candle_core::bail!("leading dim {} is not a multiple of {} groups", bg, groups);
    }
    let b = bg / groups;
    xs.reshape((b, groups, 1, m))?
        .broadcast_as((b, groups, heads_per_group, m))?
        .contiguous()?
        .reshape((b, groups * heads_per_group, m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};

    fn iota(shape: &[usize]) -> Tensor {
        let len: usize = shape.iter().product();
        Tensor::arange(0u32, len as u32, &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .reshape(shape)
            .unwrap()
    }

    #[test]
    fn test_group_channels_axis_order() {
        // b=1, n=3, g=2, d=2: element (n, g, d) = n * 4 + g * 2 + d
        let xs = iota(&[1, 3, 4]);
        let grouped = group_channels(&xs, 2).unwrap();
        assert_eq!(grouped.dims(), &[2, 2, 3]);
        let grouped = grouped.to_vec3::<f32>().unwrap();
        // group 1, channel 0 across positions
        assert_eq!(grouped[1][0], vec![2.0, 6.0, 10.0]);
        // group 0, channel 1 across positions
        assert_eq!(grouped[0][1], vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn test_ungroup_inverts_group() {
        let xs = iota(&[2, 5, 6]);
        let grouped = group_channels(&xs, 3).unwrap();
        assert_eq!(grouped.dims(), &[6, 2, 5]);
        let back = ungroup_channels(&grouped, 2).unwrap();
        assert_eq!(
            back.to_vec3::<f32>().unwrap(),
            xs.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn test_heads_round_trip() {
        let xs = iota(&[2, 3, 8]);
        let split = split_heads(&xs, 4).unwrap();
        assert_eq!(split.dims(), &[2, 4, 3, 2]);
        // head 3 of batch 0, position 1: channels 6 and 7 of row 1
        let row = split.i((0, 3, 1)).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(row, vec![14.0, 15.0]);
        let merged = merge_heads(&split).unwrap();
        assert_eq!(
            merged.to_vec3::<f32>().unwrap(),
            xs.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn test_groups_to_heads_order() {
        // (b g) = 2 with g = 2, n = 1, m = 1, o = 3
        let xs = iota(&[2, 1, 1, 3]);
        let heads = groups_to_heads(&xs, 2).unwrap();
        assert_eq!(heads.dims(), &[1, 6, 1, 1]);
        let flat = heads.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(flat, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_expand_groups_to_heads() {
        let xs = iota(&[2, 3]);
        let heads = expand_groups_to_heads(&xs, 2, 2).unwrap();
        assert_eq!(heads.dims(), &[1, 4, 3]);
        let heads = heads.squeeze(0).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(heads[0], heads[1]);
        assert_eq!(heads[2], heads[3]);
        assert_eq!(heads[2], vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_rejects_indivisible_split() {
        let xs = iota(&[1, 2, 6]);
        assert!(group_channels(&xs, 4).is_err());
        assert!(split_heads(&xs, 4).is_err());
    }
}
