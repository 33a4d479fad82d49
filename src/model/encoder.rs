//! Text encoder: contextual hidden states from embedded tokens.
//!
//! ```text
//! residual_conv_bn:
//!   x ─→ Conv1d(1×1) + ReLU ─→ mask ─→ ResidualConvBnBlock ─┐
//!   └───────────────────────────────────────────────────── + ─→ postnet ─→ mask
//!   postnet = Conv1d(1×1) → ReLU → BatchNorm → Conv1d(1×1)
//!
//! fftransformer:
//!   x ─→ FfTransformerBlock ─→ mask
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Conv1d, VarBuilder};

use super::conv_bn::ResidualConvBnBlock;
use super::fft::FfTransformerBlock;
use crate::config::{ResidualConvBnParams, StackConfig};

#[derive(Debug, Clone)]
pub struct ResidualConvBnEncoder {
    prenet: Conv1d,
    res_conv_block: ResidualConvBnBlock,
    post_conv1: Conv1d,
    post_norm: BatchNorm,
    post_conv2: Conv1d,
}

impl ResidualConvBnEncoder {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        hidden_channels: usize,
        params: &ResidualConvBnParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let prenet = candle_nn::conv1d(
            in_channels,
            hidden_channels,
            1,
            Default::default(),
            vb.pp("prenet.0"),
        )?;
        let res_conv_block = ResidualConvBnBlock::new(
            hidden_channels,
            params.kernel_size,
            &params.dilations,
            params.num_conv_blocks,
            vb.pp("res_conv_block"),
        )?;
        let post_conv1 = candle_nn::conv1d(
            hidden_channels,
            hidden_channels,
            1,
            Default::default(),
            vb.pp("postnet.0"),
        )?;
        let post_norm = candle_nn::batch_norm(
            hidden_channels,
            BatchNormConfig::default(),
            vb.pp("postnet.2"),
        )?;
        let post_conv2 = candle_nn::conv1d(
            hidden_channels,
            out_channels,
            1,
            Default::default(),
            vb.pp("postnet.3"),
        )?;
        Ok(Self {
            prenet,
            res_conv_block,
            post_conv1,
            post_norm,
            post_conv2,
        })
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let o = self.prenet.forward(xs)?.relu()?.broadcast_mul(mask)?;
        let o = self.res_conv_block.forward(&o, Some(mask), train)?;
        let o = (o + xs)?
            .apply(&self.post_conv1)?
            .relu()?
            .apply_t(&self.post_norm, train)?
            .apply(&self.post_conv2)?;
        o.broadcast_mul(mask)
    }
}

/// Encoder selected by [`StackConfig`].
#[derive(Debug, Clone)]
pub enum Encoder {
    ResidualConvBn(ResidualConvBnEncoder),
    FfTransformer(FfTransformerBlock),
}

impl Encoder {
    /// Build an encoder mapping `hidden_channels → hidden_channels`.
    ///
    /// Parameters live under `<vb>.encoder.*`.
    pub fn new(hidden_channels: usize, stack: &StackConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("encoder");
        Ok(match stack {
            StackConfig::ResidualConvBn(params) => Self::ResidualConvBn(ResidualConvBnEncoder::new(
                hidden_channels,
                hidden_channels,
                hidden_channels,
                params,
                vb,
            )?),
            StackConfig::FfTransformer(params) => {
                Self::FfTransformer(FfTransformerBlock::new(hidden_channels, params, vb)?)
            }
        })
    }

    /// - `xs`: `[B, H, T]` embedded tokens
    /// - `mask`: `[B, 1, T]`
    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let o = match self {
            Self::ResidualConvBn(encoder) => encoder.forward(xs, mask, train)?,
            Self::FfTransformer(block) => block.forward(xs, mask, train)?,
        };
        o.broadcast_mul(mask)
    }
}
