//! SpeedySpeech CLI — token ids to mel features.
//!
//! Loads a JSON config and safetensors weights, runs inference on one or
//! more token sequences and writes the batched features as `.npy`.
//!
//! # Output
//!
//! Writes `[B, out_channels, T_y]` features to the path given by --output.
//! Also prints a one-line JSON summary to stdout on success:
//!
//! ```json
//! {"path":"mel.npy","batch":2,"channels":80,"frames":[153,97]}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use clap::Parser;
use speedy_speech::{Speaker, SpeedySpeech, SpeedySpeechConfig};

#[derive(Parser, Debug)]
#[command(
    name = "speedy-speech",
    about = "SpeedySpeech text-to-mel inference",
    long_about = "Synthesize mel features from token id sequences.\n\
                  Repeat --tokens to build a batch; shorter sequences are zero-padded.\n\
                  Output is written to --output; a JSON summary line is printed to stdout."
)]
struct Args {
    /// Model config (JSON).
    #[arg(long)]
    config: String,

    /// Model weights (safetensors).
    #[arg(long, short = 'w')]
    weights: String,

    /// Comma-separated token ids, e.g. "12,5,33". Repeat for a batch.
    #[arg(long, short = 't', required = true)]
    tokens: Vec<String>,

    /// Speaker id, applied to every item. Requires a multi-speaker model.
    #[arg(long)]
    speaker_id: Option<u32>,

    /// Overrides the config's length scale (>1 slows speech down).
    #[arg(long)]
    length_scale: Option<f64>,

    /// Output .npy path.
    #[arg(long, short = 'o')]
    output: String,

    /// Run on CPU even if a GPU is available.
    #[arg(long)]
    cpu: bool,
}

fn parse_tokens(raw: &str) -> anyhow::Result<Vec<u32>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| anyhow::anyhow!("bad token id '{s}': {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if ids.is_empty() {
        anyhow::bail!("empty token sequence");
    }
    Ok(ids)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut cfg = SpeedySpeechConfig::from_json_file(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    if let Some(scale) = args.length_scale {
        cfg.length_scale = scale;
    }

    let sequences = args
        .tokens
        .iter()
        .map(|raw| parse_tokens(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if let Some(bad) = sequences.iter().flatten().find(|&&id| id as usize >= cfg.num_chars) {
        anyhow::bail!("token id {bad} out of range for vocabulary of {}", cfg.num_chars);
    }

    // Ensure output directory exists
    let output_path = std::path::Path::new(&args.output);
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    tracing::info!("Using device: {:?}", device);
    tracing::info!("Loading weights from {}", args.weights);

    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&args.weights], DType::F32, &device)? };
    let model = SpeedySpeech::new(&cfg, vb)
        .map_err(|e| anyhow::anyhow!("failed to build model: {e}"))?;

    let batch = sequences.len();
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(batch * max_len);
    for seq in &sequences {
        flat.extend_from_slice(seq);
        flat.resize(flat.len() + max_len - seq.len(), 0);
    }
    let tokens = Tensor::from_vec(flat, (batch, max_len), &device)?;
    let lengths: Vec<u32> = sequences.iter().map(|s| s.len() as u32).collect();
    let lengths = Tensor::from_vec(lengths, batch, &device)?;
    let speaker_ids = args
        .speaker_id
        .map(|id| Tensor::from_vec(vec![id; batch], batch, &device))
        .transpose()?;

    tracing::info!("Synthesizing {} sequence(s), max {} tokens...", batch, max_len);

    let out = model
        .inference(&tokens, &lengths, speaker_ids.as_ref().map(Speaker::Id))
        .map_err(|e| anyhow::anyhow!("inference failed: {e}"))?;

    out.features
        .write_npy(&args.output)
        .map_err(|e| anyhow::anyhow!("failed to write features: {e}"))?;

    // Print machine-readable summary to stdout for the caller
    println!(
        "{}",
        summary(
            &args.output,
            batch,
            model.config().out_channels,
            &out.frame_lengths
        )
    );

    Ok(())
}

fn summary(path: &str, batch: usize, channels: usize, frames: &[usize]) -> serde_json::Value {
    serde_json::json!({
        "path": path,
        "batch": batch,
        "channels": channels,
        "frames": frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert_eq!(parse_tokens("12, 5,33,").unwrap(), vec![12, 5, 33]);
        assert!(parse_tokens("1,x").is_err());
        assert!(parse_tokens(" , ").is_err());
    }

    #[test]
    fn test_summary_escapes_path() {
        let path = r#"out\dir/"mel".npy"#;
        let line = summary(path, 2, 80, &[153, 97]).to_string();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["path"], path);
        assert_eq!(parsed["channels"], 80);
        assert_eq!(parsed["frames"], serde_json::json!([153, 97]));
    }
}
