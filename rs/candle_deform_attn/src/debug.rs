use std::fmt;

use candle_core::{DType, Result, Tensor};

/// Tensor statistics for inspecting forward outputs
#[derive(Debug)]
pub struct TensorStats {
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub sum: f32,
    /// Number of NaN or infinite elements
    pub non_finite: usize,
}

impl TensorStats {
    /// Compute statistics for a tensor
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let flat = tensor.flatten_all()?.to_dtype(DType::F32)?;
        let data: Vec<f32> = flat.to_vec1()?;

        let non_finite = data.iter().filter(|v| !v.is_finite()).count();
        let min = data.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = data.iter().sum();
        let mean = sum / data.len().max(1) as f32;

        Ok(Self {
            shape,
            min,
            max,
            mean,
            sum,
            non_finite,
        })
    }
}

impl fmt::Display for TensorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape={:?} min={:.6} max={:.6} mean={:.6} sum={:.6}",
            self.shape, self.min, self.max, self.mean, self.sum
        )?;
        if self.non_finite > 0 {
            write!(f, " non_finite={}", self.non_finite)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_stats() {
        let t = Tensor::from_vec(vec![1.0f32, -2.0, 3.0, 6.0], (2, 2), &Device::Cpu).unwrap();
        let stats = TensorStats::from_tensor(&t).unwrap();
        assert_eq!(stats.shape, vec![2, 2]);
        assert_eq!(stats.min, -2.0);
        assert_eq!(stats.max, 6.0);
        assert_eq!(stats.sum, 8.0);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.non_finite, 0);
        assert_eq!(
            stats.to_string(),
            "shape=[2, 2] min=-2.000000 max=6.000000 mean=2.000000 sum=8.000000"
        );
    }

    #[test]
    fn test_stats_counts_non_finite() {
        let t = Tensor::from_vec(vec![1.0f32, f32::NAN, f32::INFINITY], 3, &Device::Cpu).unwrap();
        let stats = TensorStats::from_tensor(&t).unwrap();
        assert_eq!(stats.non_finite, 2);
        assert!(stats.to_string().ends_with("non_finite=2"));
    }
}
