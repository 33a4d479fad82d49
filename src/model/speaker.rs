//! Speaker conditioning.
//!
//! A speaker vector reaches the network two ways:
//!
//! - duration path: concatenated to the encoder output along channels
//! - decoder path: projected to the hidden size (1×1 conv, only when the sizes
//!   differ) and added to the expanded frames

use candle_core::{D, DType, Module, Tensor};
use candle_nn::{Conv1d, Embedding, Init, VarBuilder};

use crate::config::SpeakerMode;
use crate::{Error, Result};

/// Speaker argument for a forward or inference call.
#[derive(Debug, Clone, Copy)]
pub enum Speaker<'a> {
    /// Speaker ids `[B]` (`u32`), looked up in the learned table.
    Id(&'a Tensor),
    /// Precomputed speaker vectors `[B, C]`, used as-is.
    Embedding(&'a Tensor),
}

#[derive(Debug, Clone)]
pub struct SpeakerConditioning {
    mode: SpeakerMode,
    emb_g: Option<Embedding>,
    proj_g: Option<Conv1d>,
}

impl SpeakerConditioning {
    /// Loads `emb_g` (table mode) and `proj_g` (speaker size ≠ hidden size).
    pub fn new(mode: SpeakerMode, hidden_channels: usize, vb: VarBuilder) -> Result<Self> {
        let emb_g = match mode {
            SpeakerMode::Table {
                num_speakers,
                channels,
            } => {
                let weight = vb.pp("emb_g").get_with_hints(
                    (num_speakers, channels),
                    "weight",
                    Init::Uniform { lo: -0.1, up: 0.1 },
                )?;
                Some(Embedding::new(weight, channels))
            }
            SpeakerMode::None | SpeakerMode::External { .. } => None,
        };
        let proj_g = match mode {
            SpeakerMode::Table { channels, .. } | SpeakerMode::External { channels }
                if channels != hidden_channels =>
            {
                Some(candle_nn::conv1d(
                    channels,
                    hidden_channels,
                    1,
                    Default::default(),
                    vb.pp("proj_g"),
                )?)
            }
            _ => None,
        };
        Ok(Self {
            mode,
            emb_g,
            proj_g,
        })
    }

    pub fn mode(&self) -> SpeakerMode {
        self.mode
    }

    /// Whether a learned speaker table exists.
    pub fn has_table(&self) -> bool {
        self.emb_g.is_some()
    }

    /// Resolve the call argument to a `[B, C, 1]` speaker vector.
    ///
    /// Table lookups are L2-normalized; external vectors are passed through.
    pub fn resolve(&self, speaker: Option<Speaker<'_>>) -> Result<Option<Tensor>> {
        let vector = match (speaker, &self.emb_g) {
            (None, _) => return Ok(None),
            (Some(Speaker::Id(ids)), Some(emb_g)) => l2_normalize(&emb_g.forward(ids)?)?,
            (Some(Speaker::Id(_)), None) => {
                return Err(Error::Speaker(
                    "speaker ids given but the model has no speaker table".into(),
                ));
            }
            (Some(Speaker::Embedding(vector)), _) => {
                if self.mode == SpeakerMode::None {
                    return Err(Error::Speaker(
                        "speaker vector given but speaker conditioning is disabled".into(),
                    ));
                }
                vector.clone()
            }
        };
        Ok(Some(vector.unsqueeze(D::Minus1)?))
    }

    /// Concatenate `g` `[B, C, 1]` to every frame of `xs` `[B, H, T]`.
    pub fn concat(xs: &Tensor, g: &Tensor) -> Result<Tensor> {
        let (b, _, t) = xs.dims3()?;
        let c = g.dim(1)?;
        let g = g.broadcast_as((b, c, t))?.contiguous()?;
        Ok(Tensor::cat(&[xs, &g], 1)?)
    }

    /// Add `g` `[B, C, 1]` to every frame of `xs` `[B, H, T]`, projecting first
    /// when `C != H`.
    pub fn sum(&self, xs: &Tensor, g: &Tensor) -> Result<Tensor> {
        let g = match &self.proj_g {
            Some(proj) => proj.forward(g)?,
            None => g.clone(),
        };
        Ok(xs.broadcast_add(&g)?)
    }
}

/// `x / max(‖x‖₂, 1e-12)` along dim 1.
fn l2_normalize(xs: &Tensor) -> Result<Tensor> {
    let dtype = xs.dtype();
    let xs_f32 = xs.to_dtype(DType::F32)?;
    let norm = xs_f32.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
    Ok(xs_f32.broadcast_div(&norm)?.to_dtype(dtype)?)
}
