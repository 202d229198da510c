//! Session-wide tuning parameters.
//!
//! These are compile-time constants; the source announces the PCM set in its
//! session descriptor and a sink refusing the announced values disconnects.

/// PCM sample rate (Hz).
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count (stereo).
pub const CHANNELS: u16 = 2;

/// Bits per sample, signed little-endian.
pub const BIT_DEPTH: u16 = 16;

/// Duration of one broadcast frame (ms).
pub const CHUNK_DURATION_MS: u32 = 20;

/// Default WebSocket listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Interval between sink-initiated sync exchanges (ms).
pub const SYNC_INTERVAL_MS: u32 = 1_000;

/// Size of the sync sample window.
pub const SYNC_SAMPLES: usize = 5;

/// Playout delay added past translated source time (ms). Absorbs network
/// jitter, scheduler latency and one-sided drift between syncs.
pub const TARGET_BUFFER_MS: u32 = 60;

/// Lower buffering guidance (ms).
pub const MIN_BUFFER_MS: u32 = 30;

/// Jitter buffer eviction threshold: maximum playout-time span (ms).
pub const MAX_BUFFER_MS: u32 = 200;

/// Diagnostic clock drift threshold (ms per second).
pub const MAX_DRIFT_MS: u32 = 5;

/// Samples per frame per channel.
pub const fn samples_per_chunk() -> usize {
    (SAMPLE_RATE / 1000 * CHUNK_DURATION_MS) as usize
}

/// Frame payload size in bytes.
pub const fn bytes_per_chunk() -> usize {
    samples_per_chunk() * CHANNELS as usize * (BIT_DEPTH / 8) as usize
}

/// The PCM parameter set a session runs at. Announced by the source in
/// `server_info`; a sink validates the announcement against its own set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub chunk_duration_ms: u32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bit_depth: BIT_DEPTH,
            chunk_duration_ms: CHUNK_DURATION_MS,
        }
    }
}

impl StreamParams {
    pub fn bytes_per_chunk(&self) -> usize {
        (self.sample_rate / 1000 * self.chunk_duration_ms) as usize
            * self.channels as usize
            * (self.bit_depth / 8) as usize
    }

    /// Playout poll period: `max(1, chunk_duration / 4)` ms.
    pub fn poll_interval_ms(&self) -> u64 {
        ((self.chunk_duration_ms / 4) as u64).max(1)
    }
}

/// Dump the configuration table for the `info` subcommand.
pub fn print_info() {
    println!("roomcast configuration");
    println!("  sampleRate       {}", SAMPLE_RATE);
    println!("  channels         {}", CHANNELS);
    println!("  bitDepth         {}", BIT_DEPTH);
    println!("  chunkDurationMs  {}", CHUNK_DURATION_MS);
    println!("  bytesPerChunk    {}", bytes_per_chunk());
    println!("  defaultPort      {}", DEFAULT_PORT);
    println!("  syncIntervalMs   {}", SYNC_INTERVAL_MS);
    println!("  syncSamples      {}", SYNC_SAMPLES);
    println!("  targetBufferMs   {}", TARGET_BUFFER_MS);
    println!("  minBufferMs      {}", MIN_BUFFER_MS);
    println!("  maxBufferMs      {}", MAX_BUFFER_MS);
    println!("  maxDriftMs       {}", MAX_DRIFT_MS);
}
