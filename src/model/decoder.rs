//! Acoustic decoder: frame-rate hidden states → output features.
//!
//! ```text
//! residual_conv_bn:
//!   x ─→ ResidualConvBnBlock ─→ Conv1d(1×1) ─┐
//!   └─────────────────────────────────────── + ─→ ConvBnBlock(k, d=1, 2 layers)
//!                                              ─→ Conv1d(1×1, out_channels) ─→ mask
//!
//! fftransformer:
//!   x ─→ FfTransformerBlock ─→ Conv1d(1×1, out_channels) ─→ mask
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv1d, VarBuilder};

use super::conv_bn::{ConvBnBlock, ResidualConvBnBlock};
use super::fft::FfTransformerBlock;
use crate::config::{ResidualConvBnParams, StackConfig};

#[derive(Debug, Clone)]
pub struct ResidualConvBnDecoder {
    res_conv_block: ResidualConvBnBlock,
    post_conv: Conv1d,
    post_block: ConvBnBlock,
    post_proj: Conv1d,
}

impl ResidualConvBnDecoder {
    pub fn new(
        hidden_channels: usize,
        out_channels: usize,
        params: &ResidualConvBnParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let res_conv_block = ResidualConvBnBlock::new(
            hidden_channels,
            params.kernel_size,
            &params.dilations,
            params.num_conv_blocks,
            vb.pp("res_conv_block"),
        )?;
        let post_conv = candle_nn::conv1d(
            hidden_channels,
            hidden_channels,
            1,
            Default::default(),
            vb.pp("post_conv"),
        )?;
        let post_block = ConvBnBlock::new(
            hidden_channels,
            hidden_channels,
            hidden_channels,
            params.kernel_size,
            1,
            2,
            vb.pp("post_net.0"),
        )?;
        let post_proj = candle_nn::conv1d(
            hidden_channels,
            out_channels,
            1,
            Default::default(),
            vb.pp("post_net.1"),
        )?;
        Ok(Self {
            res_conv_block,
            post_conv,
            post_block,
            post_proj,
        })
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let o = self.res_conv_block.forward(xs, Some(mask), train)?;
        let o = (self.post_conv.forward(&o)? + xs)?;
        o.apply_t(&self.post_block, train)?
            .apply(&self.post_proj)?
            .broadcast_mul(mask)
    }
}

#[derive(Debug, Clone)]
pub struct FfTransformerDecoder {
    block: FfTransformerBlock,
    postnet: Conv1d,
}

impl FfTransformerDecoder {
    pub fn new(
        hidden_channels: usize,
        out_channels: usize,
        params: &crate::config::FfTransformerParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let block = FfTransformerBlock::new(hidden_channels, params, vb.pp("decoder"))?;
        let postnet = candle_nn::conv1d(
            hidden_channels,
            out_channels,
            1,
            Default::default(),
            vb.pp("postnet"),
        )?;
        Ok(Self { block, postnet })
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        self.block
            .forward(xs, mask, train)?
            .apply(&self.postnet)?
            .broadcast_mul(mask)
    }
}

/// Decoder selected by [`StackConfig`].
#[derive(Debug, Clone)]
pub enum Decoder {
    ResidualConvBn(ResidualConvBnDecoder),
    FfTransformer(FfTransformerDecoder),
}

impl Decoder {
    /// Parameters live under `<vb>.decoder.*` for the residual stack and
    /// `<vb>.{decoder, postnet}.*` for the transformer stack.
    pub fn new(
        hidden_channels: usize,
        out_channels: usize,
        stack: &StackConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match stack {
            StackConfig::ResidualConvBn(params) => Self::ResidualConvBn(
                ResidualConvBnDecoder::new(hidden_channels, out_channels, params, vb.pp("decoder"))?,
            ),
            StackConfig::FfTransformer(params) => Self::FfTransformer(FfTransformerDecoder::new(
                hidden_channels,
                out_channels,
                params,
                vb,
            )?),
        })
    }

    /// - `xs`: `[B, H, T_y]` expanded hidden states
    /// - `mask`: `[B, 1, T_y]`
    ///
    /// Returns `[B, out_channels, T_y]`.
    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::ResidualConvBn(decoder) => decoder.forward(xs, mask, train),
            Self::FfTransformer(decoder) => decoder.forward(xs, mask, train),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FfTransformerParams;
    use crate::model::mask::sequence_mask;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn run(stack: StackConfig) {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let decoder = Decoder::new(16, 10, &stack, vb).unwrap();

        let lengths = Tensor::new(&[12u32, 7], &dev).unwrap();
        let mask = sequence_mask(&lengths, None, DType::F32)
            .unwrap()
            .unsqueeze(1)
            .unwrap();
        let xs = Tensor::randn(0f32, 1.0, (2, 16, 12), &dev)
            .unwrap()
            .broadcast_mul(&mask)
            .unwrap();
        let ys = decoder.forward(&xs, &mask, false).unwrap();
        assert_eq!(ys.dims(), &[2, 10, 12]);

        let padded: f32 = ys
            .narrow(0, 1, 1)
            .unwrap()
            .narrow(2, 7, 5)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(padded, 0.0);
    }

    #[test]
    fn test_residual_decoder() {
        run(StackConfig::ResidualConvBn(ResidualConvBnParams {
            kernel_size: 4,
            dilations: vec![1, 2, 4, 1],
            num_conv_blocks: 2,
            num_res_blocks: 4,
        }));
    }

    #[test]
    fn test_fft_decoder() {
        run(StackConfig::FfTransformer(FfTransformerParams {
            num_heads: 4,
            hidden_channels_ffn: 24,
            num_layers: 2,
            ..Default::default()
        }));
    }
}
