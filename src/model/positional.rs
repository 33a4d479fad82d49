//! Sinusoidal positional encoding for channels-first sequences.

use candle_core::{D, DType, Device, Tensor};

use crate::{Error, Result};

/// Precomputed `[1, channels, max_len]` sinusoid table.
///
/// `pe[2i, p] = sin(p / 10000^(2i / C))`, `pe[2i + 1, p] = cos(...)`.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    pe: Tensor,
    channels: usize,
    max_len: usize,
}

impl PositionalEncoding {
    pub fn new(channels: usize, max_len: usize, dtype: DType, device: &Device) -> Result<Self> {
        let mut table = vec![0f32; channels * max_len];
        for c in (0..channels).step_by(2) {
            let inv_freq = 1.0 / 10000f64.powf(c as f64 / channels as f64);
            for pos in 0..max_len {
                let angle = pos as f64 * inv_freq;
                table[c * max_len + pos] = angle.sin() as f32;
                if c + 1 < channels {
                    table[(c + 1) * max_len + pos] = angle.cos() as f32;
                }
            }
        }
        let pe = Tensor::from_vec(table, (1, channels, max_len), device)?.to_dtype(dtype)?;
        Ok(Self {
            pe,
            channels,
            max_len,
        })
    }

    /// `xs · sqrt(C) + pe` for `xs` `[B, C, T]`, with `pe` zeroed on padded
    /// frames.
    pub fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let len = xs.dim(D::Minus1)?;
        if len > self.max_len {
            return Err(Error::SequenceTooLong {
                len,
                max: self.max_len,
            });
        }
        let pe = self.pe.narrow(2, 0, len)?;
        let pe = match mask {
            Some(mask) => pe.broadcast_mul(mask)?,
            None => pe,
        };
        let scale = (self.channels as f64).sqrt();
        Ok((xs * scale)?.broadcast_add(&pe)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_position_values() {
        let pos = PositionalEncoding::new(6, 16, DType::F32, &Device::Cpu).unwrap();
        let xs = Tensor::zeros((1, 6, 4), DType::F32, &Device::Cpu).unwrap();
        let out = pos.forward(&xs, None).unwrap();
        let rows: Vec<Vec<f32>> = out.squeeze(0).unwrap().to_vec2().unwrap();
        // sin(0) = 0 on even channels, cos(0) = 1 on odd channels
        for c in 0..6 {
            let expected = if c % 2 == 0 { 0.0 } else { 1.0 };
            assert!((rows[c][0] - expected).abs() < 1e-6);
        }
        // channel 0 runs at the highest frequency: sin(1)
        assert!((rows[0][1] - 1f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_inputs_scaled_by_sqrt_channels() {
        let dev = Device::Cpu;
        let pos = PositionalEncoding::new(4, 16, DType::F32, &dev).unwrap();
        let xs = Tensor::ones((1, 4, 3), DType::F32, &dev).unwrap();
        let mask = Tensor::new(&[[[1f32, 0., 0.]]], &dev).unwrap();
        let rows: Vec<Vec<f32>> = pos
            .forward(&xs, Some(&mask))
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec2()
            .unwrap();
        // frame 0: 2 + [sin 0, cos 0, sin 0, cos 0]; padded frames: 2 only
        assert_eq!(rows[0][0], 2.0);
        assert_eq!(rows[1][0], 3.0);
        assert_eq!(rows[0][2], 2.0);
        assert_eq!(rows[1][2], 2.0);
    }

    #[test]
    fn test_mask_zeroes_padding() {
        let dev = Device::Cpu;
        let pos = PositionalEncoding::new(4, 16, DType::F32, &dev).unwrap();
        let xs = Tensor::zeros((1, 4, 5), DType::F32, &dev).unwrap();
        let mask = Tensor::new(&[[[1f32, 1., 1., 0., 0.]]], &dev).unwrap();
        let out = pos.forward(&xs, Some(&mask)).unwrap();
        let tail: f32 = out
            .narrow(2, 3, 2)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(tail, 0.0);
    }

    #[test]
    fn test_too_long_rejected() {
        let dev = Device::Cpu;
        let pos = PositionalEncoding::new(4, 8, DType::F32, &dev).unwrap();
        let xs = Tensor::zeros((1, 4, 9), DType::F32, &dev).unwrap();
        assert!(matches!(
            pos.forward(&xs, None),
            Err(Error::SequenceTooLong { len: 9, max: 8 })
        ));
    }
}
