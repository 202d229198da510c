use crate::audio::AudioError;
use crate::config::StreamParams;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Source-side capture shim: an append-only stream of S16LE interleaved
/// byte blocks at the session rate and channel count.
///
/// `Ok(None)` marks end of stream; errors terminate streaming.
pub trait CaptureSource: Send {
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, AudioError>;
}

/// Capture from a cpal input device (a loopback/monitor device for
/// whole-system audio, or any microphone-style input).
pub struct CpalCapture {
    rx: Receiver<Vec<u8>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalCapture {
    /// Open the named device, or the host default when `device_name` is
    /// `None`. The cpal stream lives on its own parked thread because it is
    /// not `Send`.
    pub fn open(device_name: Option<&str>, params: StreamParams) -> Result<Self, AudioError> {
        let (tx, rx) = bounded::<Vec<u8>>(64);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let device_name = device_name.map(str::to_string);

        let stream_thread = thread::spawn(move || {
            let stream = match build_input_stream(device_name.as_deref(), params, tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Keep the stream alive until the capture handle is dropped.
            thread::park();
            drop(stream);
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                rx,
                stream_thread: Some(stream_thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Capture(
                "timeout waiting for capture stream".to_string(),
            )),
        }
    }
}

impl CaptureSource for CpalCapture {
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, AudioError> {
        // A closed channel means the stream thread died with the device.
        Ok(self.rx.recv().ok())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Some(thread) = self.stream_thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    params: StreamParams,
    tx: Sender<Vec<u8>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                AudioError::Device(format!("input device '{}' not found", name))
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::Device("no input device available".to_string()))?,
    };
    info!("🎤 capturing from {:?}", device.name());

    let config = cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mut block = Vec::with_capacity(data.len() * 2);
            for &sample in data {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                block.extend_from_slice(&value.to_le_bytes());
            }
            if tx.try_send(block).is_err() {
                // Consumer stalled; the frame is lost rather than the device.
                warn!("capture consumer behind, dropping a block");
            }
        },
        move |err| {
            warn!("capture stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;

    Ok(stream)
}

/// Channel-fed capture source for tests and in-process piping: whatever is
/// sent into the paired sender comes out as capture blocks, and dropping the
/// sender ends the stream.
pub struct ChannelCapture {
    rx: Receiver<Vec<u8>>,
}

impl ChannelCapture {
    pub fn pair(capacity: usize) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self { rx })
    }
}

impl CaptureSource for ChannelCapture {
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, AudioError> {
        Ok(self.rx.recv().ok())
    }
}
