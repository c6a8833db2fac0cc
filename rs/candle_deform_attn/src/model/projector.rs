//! Dense projections into and out of the attention space.

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};

/// Affine map `dim -> chunks * width`, optionally split into `chunks` outputs
#[derive(Debug, Clone)]
pub struct LinearProjector {
    inner: Linear,
    chunks: usize,
    span: tracing::Span,
}

impl LinearProjector {
    /// Queries: `dim -> inner_dim`, no bias
    pub fn query(dim: usize, inner_dim: usize, vb: VarBuilder) -> Result<Self> {
        let inner = linear_no_bias(dim, inner_dim, vb)?;
        Ok(Self::from_linear(inner, 1, "to-q"))
    }

    /// Keys and values jointly: `dim -> 2 * inner_dim`, no bias
    pub fn key_value(dim: usize, inner_dim: usize, vb: VarBuilder) -> Result<Self> {
        let inner = linear_no_bias(dim, 2 * inner_dim, vb)?;
        Ok(Self::from_linear(inner, 2, "to-kv"))
    }

    /// Output: `inner_dim -> dim`, with bias
    pub fn output(inner_dim: usize, dim: usize, vb: VarBuilder) -> Result<Self> {
        let inner = linear(inner_dim, dim, vb)?;
        Ok(Self::from_linear(inner, 1, "to-out"))
    }

    fn from_linear(inner: Linear, chunks: usize, which: &'static str) -> Self {
        let span = tracing::span!(tracing::Level::TRACE, "linear", which);
        Self {
            inner,
            chunks,
            span,
        }
    }

    /// Project and split the last axis into this projector's chunks
    pub fn forward_chunks(&self, xs: &Tensor) -> Result<Vec<Tensor>> {
        self.forward(xs)?.chunk(self.chunks, D::Minus1)
    }
}

impl Module for LinearProjector {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        self.inner.forward(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarMap};

    #[test]
    fn test_key_value_chunks() {
        let device = Device::Cpu;
        let vs = VarMap::new();
        let vb = VarBuilder::from_varmap(&vs, DType::F32, &device);

        // Rows 0..4 produce keys, rows 4..8 values
        let _ = vb.get_with_hints((8, 3), "to_kv.weight", Init::Const(1.0));
        let to_kv = LinearProjector::key_value(3, 4, vb.pp("to_kv")).unwrap();

        let xs = Tensor::ones((2, 5, 3), DType::F32, &device).unwrap();
        let chunks = to_kv.forward_chunks(&xs).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].dims(), &[2, 5, 4]);
        assert_eq!(chunks[1].dims(), &[2, 5, 4]);
        let k = chunks[0].flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(k.iter().all(|v| (*v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_output_bias() {
        let device = Device::Cpu;
        let vs = VarMap::new();
        let vb = VarBuilder::from_varmap(&vs, DType::F32, &device);

        let _ = vb.get_with_hints((2, 4), "to_out.weight", Init::Const(0.0));
        let _ = vb.get_with_hints(2, "to_out.bias", Init::Const(0.5));
        let to_out = LinearProjector::output(4, 2, vb.pp("to_out")).unwrap();

        let xs = Tensor::ones((1, 3, 4), DType::F32, &device).unwrap();
        let out = to_out.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[1, 3, 2]);
        let out = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(out.iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_rejects_wrong_width() {
        let device = Device::Cpu;
        let vs = VarMap::new();
        let vb = VarBuilder::from_varmap(&vs, DType::F32, &device);
        let to_q = LinearProjector::query(8, 4, vb.pp("to_q")).unwrap();

        let xs = Tensor::ones((1, 3, 6), DType::F32, &device).unwrap();
        assert!(to_q.forward(&xs).is_err());
    }
}
