//! # roomcast
//!
//! Synchronized whole-house PCM audio distribution.
//!
//! One source node captures a raw PCM stream, slices it into 20 ms frames,
//! stamps each frame with its monotonic clock and fans the frames out to
//! every connected sink over WebSocket. Sinks estimate the clock offset to
//! the source with NTP-style exchanges, schedule every frame a fixed
//! playout delay past its translated source time, and hand frames to the
//! playback device exactly at their deadline, so all rooms render the same
//! audio in phase.
//!
//! ## Architecture Overview
//!
//! ```text
//!   capture shim ─► framer ─► stamp/encode ─► fanout ─► WebSocket ─┐
//!                                                                  │
//!       playback shim ◄─ playout clock ◄─ jitter buffer ◄──────────┘
//!                                │
//!                        sync estimator ◄─► sync exchanges
//! ```

pub mod audio;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod framer;
pub mod jitter;
pub mod server;
pub mod stats;
pub mod timesync;

pub use error::{CastError, Result};
