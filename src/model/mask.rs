//! Sequence masks built from per-item lengths.
//!
//! All masks are float tensors (1.0 valid, 0.0 padding) so they can be
//! multiplied straight into `[B, C, T]` activations.

use candle_core::{DType, Result, Tensor};

/// Build a `[B, T]` mask with `mask[b, t] = t < lengths[b]`.
///
/// `lengths` may be any numeric dtype. When `max_len` is `None` the mask is
/// as long as the largest length in the batch.
pub fn sequence_mask(lengths: &Tensor, max_len: Option<usize>, dtype: DType) -> Result<Tensor> {
    let lengths = lengths.to_dtype(DType::F32)?;
    let max_len = match max_len {
        Some(len) => len,
        None => max_length(&lengths)?,
    };
    let positions = Tensor::arange(0u32, max_len as u32, lengths.device())?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?;
    positions
        .broadcast_lt(&lengths.unsqueeze(1)?)?
        .to_dtype(dtype)
}

/// Largest value of a 1-D lengths tensor, rounded to the nearest integer.
pub fn max_length(lengths: &Tensor) -> Result<usize> {
    if lengths.elem_count() == 0 {
        return Ok(0);
    }
    let max = lengths
        .to_dtype(DType::F32)?
        .max(0)?
        .to_scalar::<f32>()?;
    Ok(max.round().max(0.0) as usize)
}

/// Additive key-padding bias `[B, 1, 1, T]` for attention scores: 0.0 for
/// valid keys, the dtype minimum for padded keys.
///
/// `mask` is a `[B, 1, T]` sequence mask.
pub fn key_padding_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let min_val = match dtype {
        DType::F32 => f64::from(f32::MIN),
        DType::F16 => f64::from(half::f16::MIN),
        DType::BF16 => f64::from(half::bf16::MIN),
        DType::F64 => f64::MIN,
        _ => f64::from(f32::MIN),
    };
    let padding = (1.0 - mask.to_dtype(dtype)?)?;
    (padding * min_val)?.unsqueeze(1)
}
