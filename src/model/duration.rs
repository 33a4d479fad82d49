//! Duration predictor and inference-time duration post-processing.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Conv1d, VarBuilder};

use super::conv_bn::ConvBn;

/// Regresses one log-duration per token.
///
/// `ConvBn(k=4) → ConvBn(k=3) → ConvBn(k=1) → Conv1d(1×1, 1)`, masked after
/// every layer.
#[derive(Debug, Clone)]
pub struct DurationPredictor {
    conv_layers: Vec<ConvBn>,
    proj: Conv1d,
}

impl DurationPredictor {
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("layers");
        let mut conv_layers = Vec::with_capacity(3);
        for (idx, kernel_size) in [4, 3, 1].into_iter().enumerate() {
            conv_layers.push(ConvBn::new(
                channels,
                channels,
                kernel_size,
                1,
                vb.pp(idx.to_string()),
            )?);
        }
        let proj = candle_nn::conv1d(channels, 1, 1, Default::default(), vb.pp("3"))?;
        Ok(Self { conv_layers, proj })
    }

    /// - `xs`: `[B, C, T]`, detached by the caller
    /// - `mask`: `[B, 1, T]`
    ///
    /// Returns log-durations `[B, 1, T]`.
    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut o = xs.clone();
        for layer in &self.conv_layers {
            o = layer.forward_t(&o, train)?.broadcast_mul(mask)?;
        }
        self.proj.forward(&o)?.broadcast_mul(mask)
    }
}

/// Turn predicted log-durations into integer frame counts.
///
/// `round(max((exp(log_d) − 1) · mask · length_scale, 1)) · mask`
///
/// Every valid token keeps at least one frame; padding tokens get zero.
/// Shapes of `log_durations` and `mask` must broadcast together.
pub fn format_durations(log_durations: &Tensor, mask: &Tensor, length_scale: f64) -> Result<Tensor> {
    let durations = (log_durations.exp()? - 1.0)?
        .broadcast_mul(mask)?
        .affine(length_scale, 0.0)?;
    durations
        .maximum(1.0)?
        .round()?
        .broadcast_mul(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_very_negative_log_durations_clamp_to_one() {
        let dev = Device::Cpu;
        let log_d = Tensor::new(&[[[-50f32, -10.0, -1.0, 0.0]]], &dev).unwrap();
        let mask = Tensor::ones((1, 1, 4), DType::F32, &dev).unwrap();
        let d: Vec<f32> = format_durations(&log_d, &mask, 1.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(d, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rounding_and_length_scale() {
        let dev = Device::Cpu;
        // exp(2) - 1 = 6.389, exp(1) - 1 = 1.718
        let log_d = Tensor::new(&[[[2f32, 1.0]]], &dev).unwrap();
        let mask = Tensor::ones((1, 1, 2), DType::F32, &dev).unwrap();

        let d: Vec<f32> = format_durations(&log_d, &mask, 1.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(d, [6.0, 2.0]);

        let d: Vec<f32> = format_durations(&log_d, &mask, 2.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(d, [13.0, 3.0]);
    }

    #[test]
    fn test_padding_gets_zero_frames() {
        let dev = Device::Cpu;
        let log_d = Tensor::new(&[[[1.5f32, -3.0, 4.0, 4.0]]], &dev).unwrap();
        let mask = Tensor::new(&[[[1f32, 1.0, 0.0, 0.0]]], &dev).unwrap();
        let d: Vec<f32> = format_durations(&log_d, &mask, 1.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(&d[2..], &[0.0, 0.0]);
        assert!(d[..2].iter().all(|&v| v >= 1.0));
    }

    #[test]
    fn test_predictor_shape_and_mask() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let predictor = DurationPredictor::new(12, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (2, 12, 6), &dev).unwrap();
        let mask = Tensor::new(
            &[[[1f32, 1., 1., 1., 1., 1.]], [[1f32, 1., 1., 0., 0., 0.]]],
            &dev,
        )
        .unwrap();
        let log_d = predictor.forward(&xs, &mask, false).unwrap();
        assert_eq!(log_d.dims(), &[2, 1, 6]);
        let padded: Vec<f32> = log_d
            .narrow(0, 1, 1)
            .unwrap()
            .narrow(2, 3, 3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(padded, [0.0, 0.0, 0.0]);
    }
}
