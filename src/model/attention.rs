//! Multi-head self-attention with key padding.
//!
//! Parameters follow the `torch.nn.MultiheadAttention` layout: one packed
//! `in_proj_weight [3C, C]` / `in_proj_bias [3C]` and an `out_proj` linear.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Dropout, Init, Linear, VarBuilder};

/// Scaled dot-product self-attention over `[B, T, C]` inputs.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    pub fn new(channels: usize, num_heads: usize, dropout_p: f32, vb: VarBuilder) -> Result<Self> {
        let in_proj_weight = vb.get_with_hints(
            (3 * channels, channels),
            "in_proj_weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let in_proj_bias = vb.get_with_hints(3 * channels, "in_proj_bias", Init::Const(0.))?;
        let split = |idx: usize| -> Result<Linear> {
            let weight = in_proj_weight.narrow(0, idx * channels, channels)?;
            let bias = in_proj_bias.narrow(0, idx * channels, channels)?;
            Ok(Linear::new(weight, Some(bias)))
        };
        let q_proj = split(0)?;
        let k_proj = split(1)?;
        let v_proj = split(2)?;
        let out_proj = candle_nn::linear(channels, channels, vb.pp("out_proj"))?;
        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            dropout: Dropout::new(dropout_p),
            num_heads,
            head_dim: channels / num_heads,
        })
    }

    /// Forward pass.
    ///
    /// - `xs`: `[B, T, C]`
    /// - `key_bias`: optional additive `[B, 1, 1, T]` padding bias
    ///
    /// Returns `[B, T, C]`.
    pub fn forward(&self, xs: &Tensor, key_bias: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let (batch, seq_len, channels) = xs.dims3()?;
        let heads = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = heads(self.q_proj.forward(xs)?)?;
        let k = heads(self.k_proj.forward(xs)?)?;
        let v = heads(self.v_proj.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let scores = match key_bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let probs = self.dropout.forward_t(&probs, train)?;

        let out = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, channels))?;
        self.out_proj.forward(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mask::{key_padding_bias, sequence_mask};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_attention_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = SelfAttention::new(16, 4, 0.0, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (2, 7, 16), &dev).unwrap();
        let ys = attn.forward(&xs, None, false).unwrap();
        assert_eq!(ys.dims(), &[2, 7, 16]);
    }

    #[test]
    fn test_padded_keys_are_ignored() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = SelfAttention::new(8, 2, 0.0, vb).unwrap();

        let lengths = Tensor::new(&[3u32], &dev).unwrap();
        let mask = sequence_mask(&lengths, Some(5), DType::F32)
            .unwrap()
            .unsqueeze(1)
            .unwrap();
        let bias = key_padding_bias(&mask, DType::F32).unwrap();

        let valid = Tensor::randn(0f32, 1.0, (1, 3, 8), &dev).unwrap();
        let pad_a = Tensor::randn(0f32, 1.0, (1, 2, 8), &dev).unwrap();
        let pad_b = (Tensor::randn(0f32, 1.0, (1, 2, 8), &dev).unwrap() * 100.0).unwrap();
        let xs_a = Tensor::cat(&[&valid, &pad_a], 1).unwrap();
        let xs_b = Tensor::cat(&[&valid, &pad_b], 1).unwrap();

        let ys_a = attn.forward(&xs_a, Some(&bias), false).unwrap().narrow(1, 0, 3).unwrap();
        let ys_b = attn.forward(&xs_b, Some(&bias), false).unwrap().narrow(1, 0, 3).unwrap();
        let diff: f32 = (ys_a - ys_b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-4, "padding leaked into valid positions: {diff}");
    }
}
