//! SpeedySpeech acoustic model.
//!
//! ```text
//! tokens ─→ Embedding ─→ Encoder ─┬─────────────────────────────┐
//!                                 │                             ↓
//!              (+ speaker concat) └─→ detach ─→ DurationPredictor ─→ log durations
//!                                                               │
//!                durations (ground truth | formatted predictions)
//!                                                               ↓
//!                              expand (hard monotonic path) ─→ + positions
//!                                                               ↓
//!                                       (+ speaker sum) ─→ Decoder ─→ features
//! ```

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, VarBuilder};

use super::alignment::expand_encoder_outputs;
use super::decoder::Decoder;
use super::duration::{DurationPredictor, format_durations};
use super::encoder::Encoder;
use super::mask::{max_length, sequence_mask};
use super::positional::PositionalEncoding;
use super::speaker::{Speaker, SpeakerConditioning};
use crate::Result;
use crate::config::SpeedySpeechConfig;

/// Training-mode outputs.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Predicted features `[B, out_channels, T_y]`.
    pub features: Tensor,
    /// Predicted log-durations `[B, T_x]`.
    pub log_durations: Tensor,
    /// Hard alignment `[B, T_x, T_y]`.
    pub alignment: Tensor,
}

/// Inference outputs.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// Predicted features `[B, out_channels, T_y]`, zero past each item's length.
    pub features: Tensor,
    /// Hard alignment `[B, T_x + padding, T_y]`.
    pub alignment: Tensor,
    /// Post-processed durations `[B, T_x + padding]`, always f32.
    pub durations: Tensor,
    /// Frames per item (sum of `durations`).
    pub frame_lengths: Vec<usize>,
}

/// Encoder-side activations shared by both entry points.
struct Encoded {
    hidden: Tensor,
    for_duration: Tensor,
    x_mask: Tensor,
    speaker: Option<Tensor>,
}

/// Non-autoregressive acoustic model with explicit durations.
#[derive(Debug, Clone)]
pub struct SpeedySpeech {
    emb: Embedding,
    encoder: Encoder,
    pos_encoder: Option<PositionalEncoding>,
    decoder: Decoder,
    duration_predictor: DurationPredictor,
    speaker: SpeakerConditioning,
    cfg: SpeedySpeechConfig,
}

impl SpeedySpeech {
    /// Build the model, loading or initializing parameters through `vb`.
    pub fn new(cfg: &SpeedySpeechConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let hidden = cfg.hidden_channels;

        let emb = candle_nn::embedding(cfg.num_chars, hidden, vb.pp("emb"))?;
        let encoder = Encoder::new(hidden, &cfg.encoder, vb.pp("encoder"))?;
        let pos_encoder = if cfg.positional_encoding {
            Some(PositionalEncoding::new(
                hidden,
                cfg.max_positions,
                vb.dtype(),
                vb.device(),
            )?)
        } else {
            None
        };
        let decoder = Decoder::new(hidden, cfg.out_channels, &cfg.decoder, vb.pp("decoder"))?;
        let duration_predictor =
            DurationPredictor::new(cfg.duration_predictor_channels(), vb.pp("duration_predictor"))?;
        let speaker = SpeakerConditioning::new(cfg.speaker_mode(), hidden, vb.clone())?;

        tracing::debug!(
            "SpeedySpeech: vocab={} hidden={} out={} speakers={:?} pos_enc={}",
            cfg.num_chars,
            hidden,
            cfg.out_channels,
            speaker.mode(),
            cfg.positional_encoding
        );

        Ok(Self {
            emb,
            encoder,
            pos_encoder,
            decoder,
            duration_predictor,
            speaker,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &SpeedySpeechConfig {
        &self.cfg
    }

    /// Whether speaker ids are resolved through a learned table.
    pub fn has_speaker_table(&self) -> bool {
        self.speaker.has_table()
    }

    /// Training forward pass with ground-truth durations.
    ///
    /// - `tokens`: `[B, T_x]` u32 ids
    /// - `token_lengths`: `[B]`
    /// - `frame_lengths`: `[B]` ground-truth frame counts
    /// - `durations`: `[B, T_x]` ground-truth frames per token
    /// - `train`: batch statistics and dropout on/off
    ///
    /// Durations and frame lengths are trusted as given.
    pub fn forward(
        &self,
        tokens: &Tensor,
        token_lengths: &Tensor,
        frame_lengths: &Tensor,
        durations: &Tensor,
        speaker: Option<Speaker<'_>>,
        train: bool,
    ) -> Result<ForwardOutput> {
        let enc = self.encode(tokens, token_lengths, speaker, train)?;
        let log_durations = self
            .duration_predictor
            .forward(&enc.for_duration.detach(), &enc.x_mask, train)?
            .squeeze(1)?;
        let (features, alignment) = self.decode(
            &enc.hidden,
            durations,
            &enc.x_mask,
            frame_lengths,
            enc.speaker.as_ref(),
            train,
        )?;
        Ok(ForwardOutput {
            features,
            log_durations,
            alignment,
        })
    }

    /// Synthesize features from tokens alone.
    ///
    /// Tokens are padded with `inference_padding` trailing zeros; durations
    /// come from the predictor (see [`format_durations`]) and the frame
    /// count of each item is the sum of its durations.
    pub fn inference(
        &self,
        tokens: &Tensor,
        token_lengths: &Tensor,
        speaker: Option<Speaker<'_>>,
    ) -> Result<InferenceOutput> {
        let tokens = tokens.pad_with_zeros(1, 0, self.cfg.inference_padding)?;
        let enc = self.encode(&tokens, token_lengths, speaker, false)?;

        let log_durations =
            self.duration_predictor
                .forward(&enc.for_duration.detach(), &enc.x_mask, false)?;
        // Integer frame counts stay in f32 regardless of the model dtype.
        let durations = format_durations(
            &log_durations.to_dtype(DType::F32)?,
            &enc.x_mask.to_dtype(DType::F32)?,
            self.cfg.length_scale,
        )?
        .squeeze(1)?;
        let frame_totals = durations.sum(1)?;

        let (features, alignment) = self.decode(
            &enc.hidden,
            &durations,
            &enc.x_mask,
            &frame_totals,
            enc.speaker.as_ref(),
            false,
        )?;

        let frame_lengths: Vec<usize> = frame_totals
            .to_vec1::<f32>()?
            .into_iter()
            .map(|n| n.round() as usize)
            .collect();
        tracing::debug!(
            "inference: padded tokens={} frames={:?}",
            tokens.dim(1)?,
            frame_lengths
        );

        Ok(InferenceOutput {
            features,
            alignment,
            durations,
            frame_lengths,
        })
    }

    fn encode(
        &self,
        tokens: &Tensor,
        token_lengths: &Tensor,
        speaker: Option<Speaker<'_>>,
        train: bool,
    ) -> Result<Encoded> {
        let g = self.speaker.resolve(speaker)?;
        let (_b, t_x) = tokens.dims2()?;

        // [B, T, H] → [B, H, T]
        let x_emb = self.emb.forward(tokens)?.transpose(1, 2)?.contiguous()?;
        let x_mask = sequence_mask(token_lengths, Some(t_x), x_emb.dtype())?.unsqueeze(1)?;

        let hidden = self.encoder.forward(&x_emb, &x_mask, train)?;
        let for_duration = match &g {
            Some(g) => SpeakerConditioning::concat(&hidden, g)?,
            None => hidden.clone(),
        };
        Ok(Encoded {
            hidden,
            for_duration,
            x_mask,
            speaker: g,
        })
    }

    fn decode(
        &self,
        hidden: &Tensor,
        durations: &Tensor,
        x_mask: &Tensor,
        frame_lengths: &Tensor,
        g: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let t_y = max_length(frame_lengths)?;
        let y_mask = sequence_mask(frame_lengths, Some(t_y), hidden.dtype())?.unsqueeze(1)?;

        let (expanded, alignment) = expand_encoder_outputs(hidden, durations, x_mask, &y_mask)?;
        // Positions are added at frame resolution, after expansion.
        let expanded = match &self.pos_encoder {
            Some(pos) => pos.forward(&expanded, Some(&y_mask))?,
            None => expanded,
        };
        let expanded = match g {
            Some(g) => self.speaker.sum(&expanded, g)?,
            None => expanded,
        };
        let features = self.decoder.forward(&expanded, &y_mask, train)?;
        Ok((features, alignment))
    }
}
