//! SpeedySpeech acoustic model in pure Rust.
//!
//! A candle-based implementation of SpeedySpeech, a non-autoregressive
//! text-to-spectrogram model with explicit per-token durations. Loads
//! safetensors weights exported from the reference training code.
//!
//! ## Architecture
//!
//! ```text
//! tokens → Embedding → Encoder ──────────────┐
//!                         │                  ↓
//!                         └→ (detach) DurationPredictor → log durations
//!                                            │
//!           durations → hard monotonic path ─┘
//!                         ↓
//!              expand to frames + positions (+ speaker)
//!                         ↓
//!                      Decoder → mel features
//! ```
//!
//! ## Modules
//!
//! - [`config`] — model hyperparameters (JSON)
//! - [`model`] — encoder, decoder, duration predictor, alignment, speaker conditioning

pub mod config;
pub mod model;

mod error;

pub use config::SpeedySpeechConfig;
pub use error::{Error, Result};
pub use model::speaker::Speaker;
pub use model::speedy_speech::{ForwardOutput, InferenceOutput, SpeedySpeech};
