//! Model components for SpeedySpeech.
//!
//! ## Components
//!
//! - [`speedy_speech`] — the full model: `forward` (training) and `inference`
//! - [`encoder`] / [`decoder`] — residual ConvBN or feed-forward transformer stacks
//! - [`duration`] — log-duration predictor and duration post-processing
//! - [`alignment`] — hard monotonic path from durations, expansion to frames
//! - [`speaker`] — speaker table lookup, concat and sum conditioning
//! - [`conv_bn`], [`fft`], [`attention`], [`positional`], [`mask`] — building blocks

pub mod alignment;
pub mod attention;
pub mod conv_bn;
pub mod decoder;
pub mod duration;
pub mod encoder;
pub mod fft;
pub mod mask;
pub mod positional;
pub mod speaker;
pub mod speedy_speech;
