//! Hard monotonic alignment from integer durations.
//!
//! ```text
//! durations  [B, T_x]          e.g. [2, 1, 3]
//! cumsum     [B, T_x]               [2, 3, 6]
//! path[i, j] = cum[i-1] <= j < cum[i]
//!
//!            frames →
//! token 0    1 1 0 0 0 0
//! token 1    0 0 1 0 0 0
//! token 2    0 0 0 1 1 1
//! ```
//!
//! Expansion is then a single matmul: `[B, C, T_x] · [B, T_x, T_y]`.

use candle_core::{DType, Result, Tensor};

use super::mask::sequence_mask;

/// Build the binary alignment path `[B, T_x, T_y]`.
///
/// - `durations`: `[B, T_x]`, integer-valued
/// - `mask`: `[B, T_x, T_y]` joint validity mask
///
/// Token `i` covers the `durations[i]` frames following token `i - 1`.
/// Frames past the end of `mask` are dropped; durations are not validated.
///
/// Frame offsets are accumulated in f32 whatever the input dtype, so half
/// precision models keep exact integer offsets; the path has `mask`'s dtype.
pub fn generate_path(durations: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (b, t_x, t_y) = mask.dims3()?;
    let cum_durations = durations.to_dtype(DType::F32)?.cumsum(1)?;
    let cum_flat = cum_durations.reshape(b * t_x)?;
    let path = sequence_mask(&cum_flat, Some(t_y), DType::F32)?.reshape((b, t_x, t_y))?;
    // Subtract the previous token's coverage so each row keeps only its own span.
    let previous = path.pad_with_zeros(1, 1, 0)?.narrow(1, 0, t_x)?;
    (path - previous)?
        .mul(&mask.to_dtype(DType::F32)?)?
        .to_dtype(mask.dtype())
}

/// Expand encoder outputs to frame resolution.
///
/// - `encoded`: `[B, C, T_x]`
/// - `durations`: `[B, T_x]`
/// - `x_mask`: `[B, 1, T_x]`
/// - `y_mask`: `[B, 1, T_y]`
///
/// Returns `(expanded [B, C, T_y], alignment [B, T_x, T_y])`.
pub fn expand_encoder_outputs(
    encoded: &Tensor,
    durations: &Tensor,
    x_mask: &Tensor,
    y_mask: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let attn_mask = x_mask
        .to_dtype(DType::F32)?
        .transpose(1, 2)?
        .broadcast_mul(&y_mask.to_dtype(DType::F32)?)?;
    let alignment = generate_path(durations, &attn_mask)?.to_dtype(encoded.dtype())?;
    let expanded = encoded.contiguous()?.matmul(&alignment)?;
    Ok((expanded, alignment))
}
