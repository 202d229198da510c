use crate::audio::AudioError;
use crate::config::StreamParams;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::bounded;
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Sink-side playback shim. Writes must not be reordered; the shim owns a
/// small output buffer of its own, so the playout loop never assumes
/// zero-latency writes.
pub trait PlaybackSink: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

/// Output queue ceiling in milliseconds. Anything beyond this means the
/// device stopped draining; old samples are shed to bound latency.
const MAX_QUEUE_MS: usize = 1_000;

/// Playback through a cpal output device with an internal sample queue.
pub struct CpalPlayback {
    queue: Arc<Mutex<VecDeque<i16>>>,
    max_queue_samples: usize,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalPlayback {
    pub fn open(device_name: Option<&str>, params: StreamParams) -> Result<Self, AudioError> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let device_name = device_name.map(str::to_string);
        let callback_queue = Arc::clone(&queue);

        let stream_thread = thread::spawn(move || {
            let stream = match build_output_stream(device_name.as_deref(), params, callback_queue)
            {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            thread::park();
            drop(stream);
        });

        let max_queue_samples =
            params.sample_rate as usize / 1000 * MAX_QUEUE_MS * params.channels as usize;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                queue,
                max_queue_samples,
                stream_thread: Some(stream_thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Playback(
                "timeout waiting for playback stream".to_string(),
            )),
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| AudioError::Playback("output queue poisoned".to_string()))?;

        for pair in pcm.chunks_exact(2) {
            queue.push_back(i16::from_le_bytes([pair[0], pair[1]]));
        }

        if queue.len() > self.max_queue_samples {
            let excess = queue.len() - self.max_queue_samples;
            queue.drain(..excess);
            warn!("output device not draining, shed {} samples", excess);
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if let Some(thread) = self.stream_thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

fn build_output_stream(
    device_name: Option<&str>,
    params: StreamParams,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                AudioError::Device(format!("output device '{}' not found", name))
            })?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no output device available".to_string()))?,
    };
    info!("🔊 playing to {:?}", device.name());

    let config = cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queue = match queue.lock() {
                Ok(queue) => queue,
                Err(_) => return,
            };
            for slot in data.iter_mut() {
                *slot = match queue.pop_front() {
                    Some(sample) => sample as f32 / 32_768.0,
                    None => 0.0,
                };
            }
        },
        move |err| {
            warn!("playback stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;

    Ok(stream)
}

/// Test sink that records every block it is handed, in write order.
#[derive(Clone, Default)]
pub struct CollectingSink {
    blocks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<Vec<u8>> {
        self.blocks.lock().expect("collector lock").clone()
    }
}

impl PlaybackSink for CollectingSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.blocks.lock().expect("collector lock").push(pcm.to_vec());
        Ok(())
    }
}
