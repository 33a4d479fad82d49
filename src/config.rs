//! Configuration for the SpeedySpeech acoustic model.
//!
//! Defaults match the reference LJSpeech recipe: residual ConvBN encoder
//! (13 blocks) and decoder (17 blocks), 128 hidden channels, 80 mel bins.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hyperparameters of a residual ConvBN stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualConvBnParams {
    pub kernel_size: usize,
    /// One dilation per residual block.
    pub dilations: Vec<usize>,
    /// ConvBN layers inside each residual block.
    pub num_conv_blocks: usize,
    pub num_res_blocks: usize,
}

impl ResidualConvBnParams {
    /// Encoder defaults: `4 * [1, 2, 4] + [1]`.
    pub fn encoder_default() -> Self {
        let mut dilations = [1, 2, 4].repeat(4);
        dilations.push(1);
        Self {
            kernel_size: 4,
            num_res_blocks: dilations.len(),
            dilations,
            num_conv_blocks: 2,
        }
    }

    /// Decoder defaults: `4 * [1, 2, 4, 8] + [1]`.
    pub fn decoder_default() -> Self {
        let mut dilations = [1, 2, 4, 8].repeat(4);
        dilations.push(1);
        Self {
            kernel_size: 4,
            num_res_blocks: dilations.len(),
            dilations,
            num_conv_blocks: 2,
        }
    }

    fn validate(&self, which: &str) -> Result<()> {
        if self.kernel_size == 0 {
            return Err(Error::Config(format!("{which}: kernel_size must be > 0")));
        }
        if self.num_conv_blocks == 0 {
            return Err(Error::Config(format!(
                "{which}: num_conv_blocks must be > 0"
            )));
        }
        if self.dilations.len() != self.num_res_blocks {
            return Err(Error::Config(format!(
                "{which}: {} dilations given for {} residual blocks",
                self.dilations.len(),
                self.num_res_blocks
            )));
        }
        if self.dilations.contains(&0) {
            return Err(Error::Config(format!("{which}: dilation 0 is invalid")));
        }
        Ok(())
    }
}

/// Hyperparameters of a feed-forward transformer stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfTransformerParams {
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default = "default_hidden_channels_ffn")]
    pub hidden_channels_ffn: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Kernel size of the convolutional feed-forward layers.
    #[serde(default = "default_kernel_size_fft")]
    pub kernel_size_fft: usize,
    #[serde(default = "default_dropout_p")]
    pub dropout_p: f32,
}

impl Default for FfTransformerParams {
    fn default() -> Self {
        Self {
            num_heads: default_num_heads(),
            hidden_channels_ffn: default_hidden_channels_ffn(),
            num_layers: default_num_layers(),
            kernel_size_fft: default_kernel_size_fft(),
            dropout_p: default_dropout_p(),
        }
    }
}

impl FfTransformerParams {
    fn validate(&self, which: &str, hidden_channels: usize) -> Result<()> {
        if self.num_heads == 0 || hidden_channels % self.num_heads != 0 {
            return Err(Error::Config(format!(
                "{which}: hidden_channels {hidden_channels} not divisible by num_heads {}",
                self.num_heads
            )));
        }
        if self.kernel_size_fft % 2 == 0 {
            return Err(Error::Config(format!(
                "{which}: kernel_size_fft must be odd, got {}",
                self.kernel_size_fft
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(Error::Config(format!(
                "{which}: dropout_p must be in [0, 1), got {}",
                self.dropout_p
            )));
        }
        Ok(())
    }
}

fn default_num_heads() -> usize {
    2
}

fn default_hidden_channels_ffn() -> usize {
    1024
}

fn default_num_layers() -> usize {
    6
}

fn default_kernel_size_fft() -> usize {
    3
}

fn default_dropout_p() -> f32 {
    0.1
}

/// Encoder/decoder architecture selector with its hyperparameters.
///
/// Serialized as `{"type": "residual_conv_bn", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum StackConfig {
    ResidualConvBn(ResidualConvBnParams),
    #[serde(rename = "fftransformer")]
    FfTransformer(FfTransformerParams),
}

impl StackConfig {
    fn validate(&self, which: &str, hidden_channels: usize) -> Result<()> {
        match self {
            Self::ResidualConvBn(params) => params.validate(which),
            Self::FfTransformer(params) => params.validate(which, hidden_channels),
        }
    }
}

/// How speaker identity reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerMode {
    /// No speaker conditioning.
    None,
    /// Learned `num_speakers x channels` table indexed by speaker id.
    Table { num_speakers: usize, channels: usize },
    /// Caller supplies a speaker vector of `channels` values per item.
    External { channels: usize },
}

/// Top-level model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedySpeechConfig {
    /// Vocabulary size of the token embedding.
    pub num_chars: usize,
    /// Output feature channels (mel bins).
    pub out_channels: usize,
    pub hidden_channels: usize,
    pub positional_encoding: bool,
    /// Inference duration multiplier; > 1 slows speech down.
    pub length_scale: f64,
    pub encoder: StackConfig,
    pub decoder: StackConfig,
    /// 0 disables speakers, 1 is a single speaker, > 1 enables a table.
    pub num_speakers: usize,
    pub external_speaker_embedding: bool,
    pub speaker_embedding_channels: usize,
    /// Trailing zero tokens appended before inference.
    pub inference_padding: usize,
    /// Length of the positional encoding table.
    pub max_positions: usize,
}

impl Default for SpeedySpeechConfig {
    fn default() -> Self {
        Self {
            num_chars: 130,
            out_channels: 80,
            hidden_channels: 128,
            positional_encoding: true,
            length_scale: 1.0,
            encoder: StackConfig::ResidualConvBn(ResidualConvBnParams::encoder_default()),
            decoder: StackConfig::ResidualConvBn(ResidualConvBnParams::decoder_default()),
            num_speakers: 0,
            external_speaker_embedding: false,
            speaker_embedding_channels: 0,
            inference_padding: 5,
            max_positions: 5000,
        }
    }
}

impl SpeedySpeechConfig {
    /// Load a JSON config file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that cannot build a consistent model.
    pub fn validate(&self) -> Result<()> {
        if self.num_chars == 0 || self.out_channels == 0 || self.hidden_channels == 0 {
            return Err(Error::Config(
                "num_chars, out_channels and hidden_channels must be > 0".into(),
            ));
        }
        if !(self.length_scale > 0.0) {
            return Err(Error::Config(format!(
                "length_scale must be > 0, got {}",
                self.length_scale
            )));
        }
        if self.positional_encoding && self.max_positions == 0 {
            return Err(Error::Config(
                "max_positions must be > 0 with positional_encoding".into(),
            ));
        }
        self.encoder.validate("encoder", self.hidden_channels)?;
        self.decoder.validate("decoder", self.hidden_channels)?;

        let wants_vectors = self.num_speakers > 1 || self.external_speaker_embedding;
        if wants_vectors && self.speaker_embedding_channels == 0 {
            return Err(Error::Config(
                "speaker_embedding_channels must be > 0 for multi-speaker or external embeddings"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Resolve the speaker options into one mode.
    pub fn speaker_mode(&self) -> SpeakerMode {
        let channels = self.speaker_embedding_channels;
        if self.num_speakers > 1 && !self.external_speaker_embedding {
            SpeakerMode::Table {
                num_speakers: self.num_speakers,
                channels,
            }
        } else if channels > 0 && (self.external_speaker_embedding || self.num_speakers == 1) {
            SpeakerMode::External { channels }
        } else {
            SpeakerMode::None
        }
    }

    /// Channels seen by the duration predictor (hidden + speaker).
    pub fn duration_predictor_channels(&self) -> usize {
        match self.speaker_mode() {
            SpeakerMode::None => self.hidden_channels,
            SpeakerMode::Table { channels, .. } | SpeakerMode::External { channels } => {
                self.hidden_channels + channels
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SpeedySpeechConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.hidden_channels, 128);
        assert_eq!(cfg.out_channels, 80);
        assert_eq!(cfg.speaker_mode(), SpeakerMode::None);
        assert_eq!(cfg.duration_predictor_channels(), 128);
        match (&cfg.encoder, &cfg.decoder) {
            (StackConfig::ResidualConvBn(enc), StackConfig::ResidualConvBn(dec)) => {
                assert_eq!(enc.num_res_blocks, 13);
                assert_eq!(enc.dilations[..4], [1, 2, 4, 1]);
                assert_eq!(dec.num_res_blocks, 17);
                assert_eq!(*dec.dilations.last().unwrap(), 1);
            }
            other => panic!("unexpected stacks: {other:?}"),
        }
    }

    #[test]
    fn test_parse_json_selector() {
        let json = r#"{
            "num_chars": 64,
            "hidden_channels": 32,
            "encoder": {"type": "fftransformer", "params": {"num_heads": 4, "num_layers": 2}},
            "decoder": {"type": "residual_conv_bn", "params": {
                "kernel_size": 3, "dilations": [1, 2], "num_conv_blocks": 1, "num_res_blocks": 2
            }}
        }"#;
        let cfg: SpeedySpeechConfig = serde_json::from_str(json).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.num_chars, 64);
        assert_eq!(cfg.out_channels, 80);
        match cfg.encoder {
            StackConfig::FfTransformer(p) => {
                assert_eq!(p.num_heads, 4);
                assert_eq!(p.num_layers, 2);
                assert_eq!(p.hidden_channels_ffn, 1024);
            }
            other => panic!("expected fftransformer, got {other:?}"),
        }
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"num_chars": 40, "length_scale": 1.5}"#).unwrap();
        let cfg = SpeedySpeechConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.num_chars, 40);
        assert_eq!(cfg.length_scale, 1.5);
    }

    #[test]
    fn dilation_count_mismatch_rejected() {
        let cfg = SpeedySpeechConfig {
            encoder: StackConfig::ResidualConvBn(ResidualConvBnParams {
                kernel_size: 4,
                dilations: vec![1, 2],
                num_conv_blocks: 2,
                num_res_blocks: 3,
            }),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn head_divisibility_rejected() {
        let cfg = SpeedySpeechConfig {
            hidden_channels: 30,
            decoder: StackConfig::FfTransformer(FfTransformerParams {
                num_heads: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn multi_speaker_needs_channels() {
        let cfg = SpeedySpeechConfig {
            num_speakers: 4,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SpeedySpeechConfig {
            num_speakers: 4,
            speaker_embedding_channels: 16,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(
            cfg.speaker_mode(),
            SpeakerMode::Table {
                num_speakers: 4,
                channels: 16
            }
        );
        assert_eq!(cfg.duration_predictor_channels(), 144);
    }

    #[test]
    fn external_speaker_mode() {
        let cfg = SpeedySpeechConfig {
            num_speakers: 10,
            external_speaker_embedding: true,
            speaker_embedding_channels: 256,
            ..Default::default()
        };
        assert_eq!(cfg.speaker_mode(), SpeakerMode::External { channels: 256 });
    }

    #[test]
    fn non_positive_length_scale_rejected() {
        let cfg = SpeedySpeechConfig {
            length_scale: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
