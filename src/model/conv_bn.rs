//! Residual convolution + batch-norm blocks.
//!
//! ```text
//! ConvBn:              Conv1d(k, dilation, valid) → pad → ReLU → BatchNorm1d
//! ConvBnBlock:         num_conv_blocks × ConvBn
//! ResidualConvBnBlock: for d in dilations { x = mask * (x + ConvBnBlock_d(x)) }
//! ```
//!
//! The convolution output is zero-padded `(d·(k−1))/2` left and the rest
//! right, so even kernel sizes keep the sequence length. Edge frames hold
//! zeros, not convolved values.

use candle_core::{D, Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Conv1d, VarBuilder};

/// Conv1d + ReLU + BatchNorm with length-preserving zero padding.
#[derive(Debug, Clone)]
pub struct ConvBn {
    conv1d: Conv1d,
    norm: BatchNorm,
    out_channels: usize,
    pad_left: usize,
    pad_right: usize,
}

impl ConvBn {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let padding = dilation * (kernel_size - 1);
        let pad_left = padding / 2;
        let pad_right = padding - pad_left;
        let cfg = candle_nn::Conv1dConfig {
            dilation,
            ..Default::default()
        };
        let conv1d = candle_nn::conv1d(
            in_channels,
            out_channels,
            kernel_size,
            cfg,
            vb.pp("conv1d"),
        )?;
        let norm = candle_nn::batch_norm(out_channels, BatchNormConfig::default(), vb.pp("norm"))?;
        Ok(Self {
            conv1d,
            norm,
            out_channels,
            pad_left,
            pad_right,
        })
    }
}

impl ModuleT for ConvBn {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _, len) = xs.dims3()?;
        let span = self.pad_left + self.pad_right + 1;
        let o = if len < span {
            // No valid output frame: everything is padding.
            Tensor::zeros((batch, self.out_channels, len), xs.dtype(), xs.device())?
        } else {
            self.conv1d
                .forward(xs)?
                .pad_with_zeros(D::Minus1, self.pad_left, self.pad_right)?
        };
        o.relu()?.apply_t(&self.norm, train)
    }
}

/// Sequential stack of [`ConvBn`] layers.
///
/// The first layer maps `in_channels → hidden`, the last `hidden → out_channels`.
#[derive(Debug, Clone)]
pub struct ConvBnBlock {
    conv_bn_blocks: Vec<ConvBn>,
}

impl ConvBnBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        hidden_channels: usize,
        kernel_size: usize,
        dilation: usize,
        num_conv_blocks: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut conv_bn_blocks = Vec::with_capacity(num_conv_blocks);
        for idx in 0..num_conv_blocks {
            let in_c = if idx == 0 { in_channels } else { hidden_channels };
            let out_c = if idx + 1 == num_conv_blocks {
                out_channels
            } else {
                hidden_channels
            };
            conv_bn_blocks.push(ConvBn::new(
                in_c,
                out_c,
                kernel_size,
                dilation,
                vb.pp(format!("conv_bn_blocks.{idx}")),
            )?);
        }
        Ok(Self { conv_bn_blocks })
    }
}

impl ModuleT for ConvBnBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.conv_bn_blocks {
            xs = layer.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}

/// Residual stack of dilated [`ConvBnBlock`]s, re-masked after every block.
#[derive(Debug, Clone)]
pub struct ResidualConvBnBlock {
    res_blocks: Vec<ConvBnBlock>,
}

impl ResidualConvBnBlock {
    pub fn new(
        channels: usize,
        kernel_size: usize,
        dilations: &[usize],
        num_conv_blocks: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut res_blocks = Vec::with_capacity(dilations.len());
        for (idx, &dilation) in dilations.iter().enumerate() {
            res_blocks.push(ConvBnBlock::new(
                channels,
                channels,
                channels,
                kernel_size,
                dilation,
                num_conv_blocks,
                vb.pp(format!("res_blocks.{idx}")),
            )?);
        }
        Ok(Self { res_blocks })
    }

    /// - `xs`: `[B, C, T]`
    /// - `mask`: optional `[B, 1, T]`
    pub fn forward(&self, xs: &Tensor, mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let mut out = xs.clone();
        for block in &self.res_blocks {
            let residual = &out;
            let next = (block.forward_t(residual, train)? + residual)?;
            out = match mask {
                Some(mask) => next.broadcast_mul(mask)?,
                None => next,
            };
        }
        Ok(out)
    }
}
