//! Feed-forward transformer (FFT) stack.
//!
//! Each layer: masked self-attention → residual + LayerNorm →
//! Conv1d(k) → ReLU → Conv1d(k) → residual + LayerNorm. Inputs and outputs
//! are channels-first `[B, C, T]`.

use candle_core::{ModuleT, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, LayerNorm, VarBuilder};

use super::attention::SelfAttention;
use super::mask::key_padding_bias;
use crate::config::FfTransformerParams;

#[derive(Debug, Clone)]
pub struct FfTransformerLayer {
    self_attn: SelfAttention,
    conv1: Conv1d,
    conv2: Conv1d,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
}

impl FfTransformerLayer {
    pub fn new(channels: usize, params: &FfTransformerParams, vb: VarBuilder) -> Result<Self> {
        let self_attn = SelfAttention::new(
            channels,
            params.num_heads,
            params.dropout_p,
            vb.pp("self_attn"),
        )?;
        let cfg = Conv1dConfig {
            padding: (params.kernel_size_fft - 1) / 2,
            ..Default::default()
        };
        let conv1 = candle_nn::conv1d(
            channels,
            params.hidden_channels_ffn,
            params.kernel_size_fft,
            cfg,
            vb.pp("conv1"),
        )?;
        let conv2 = candle_nn::conv1d(
            params.hidden_channels_ffn,
            channels,
            params.kernel_size_fft,
            cfg,
            vb.pp("conv2"),
        )?;
        let norm1 = candle_nn::layer_norm(channels, 1e-5, vb.pp("norm1"))?;
        let norm2 = candle_nn::layer_norm(channels, 1e-5, vb.pp("norm2"))?;
        Ok(Self {
            self_attn,
            conv1,
            conv2,
            norm1,
            norm2,
            dropout: Dropout::new(params.dropout_p),
        })
    }

    /// - `xs`: `[B, C, T]`
    /// - `mask`: `[B, 1, T]`
    /// - `key_bias`: `[B, 1, 1, T]` from [`key_padding_bias`]
    pub fn forward(
        &self,
        xs: &Tensor,
        mask: &Tensor,
        key_bias: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        // [B, C, T] → [B, T, C]
        let h = xs.transpose(1, 2)?.contiguous()?;
        let attn = self.self_attn.forward(&h, Some(key_bias), train)?;
        let h = (h + self.dropout.forward_t(&attn, train)?)?.apply(&self.norm1)?;

        // [B, T, C] → [B, C, T], masked before the convolutions see it
        let h = h.transpose(1, 2)?.broadcast_mul(mask)?;
        let ff = h.apply(&self.conv1)?.relu()?.apply(&self.conv2)?;
        let h = (h + self.dropout.forward_t(&ff, train)?)?;

        let h = h.transpose(1, 2)?.apply(&self.norm2)?.transpose(1, 2)?;
        h.broadcast_mul(mask)
    }
}

/// Stack of [`FfTransformerLayer`]s sharing one padding mask.
#[derive(Debug, Clone)]
pub struct FfTransformerBlock {
    fft_layers: Vec<FfTransformerLayer>,
}

impl FfTransformerBlock {
    pub fn new(channels: usize, params: &FfTransformerParams, vb: VarBuilder) -> Result<Self> {
        let mut fft_layers = Vec::with_capacity(params.num_layers);
        for i in 0..params.num_layers {
            fft_layers.push(FfTransformerLayer::new(
                channels,
                params,
                vb.pp(format!("fft_layers.{i}")),
            )?);
        }
        Ok(Self { fft_layers })
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let key_bias = key_padding_bias(mask, xs.dtype())?;
        let mut xs = xs.broadcast_mul(mask)?;
        for layer in &self.fft_layers {
            xs = layer.forward(&xs, mask, &key_bias, train)?;
        }
        Ok(xs)
    }
}
