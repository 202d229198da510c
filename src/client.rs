//! Sink node session loop.
//!
//! `Dialing → DescriptorPending → Syncing → Ready → Playing → Closed`. The
//! receive thread owns the socket: it validates the session descriptor,
//! drives sync exchanges on the sync interval and files incoming frames into
//! the jitter buffer. The playout thread polls the buffer and hands due
//! frames to the playback shim; the two never block each other.

use crate::audio::PlaybackSink;
use crate::clock::MonoClock;
use crate::config::{self, StreamParams};
use crate::error::{CastError, Result};
use crate::jitter::{JitterBuffer, PlayoutStats};
use crate::stats::ReceiverStats;
use crate::timesync::SyncEstimator;
use cast_protocol::{ClientStream, Connection, Message, ProtocolError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct ClientConfig {
    pub url: String,
    pub client_id: String,
    pub params: StreamParams,
    pub target_buffer_ms: f64,
    pub max_buffer_ms: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}", config::DEFAULT_PORT),
            client_id: "sink".to_string(),
            params: StreamParams::default(),
            target_buffer_ms: config::TARGET_BUFFER_MS as f64,
            max_buffer_ms: config::MAX_BUFFER_MS as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    DescriptorPending,
    Syncing,
    Ready,
    Playing,
    Closed,
}

pub struct CastClient {
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    buffer: Arc<Mutex<JitterBuffer>>,
    receive_thread: Option<thread::JoinHandle<Result<()>>>,
    playout_thread: Option<thread::JoinHandle<()>>,
}

impl CastClient {
    /// Dial the source and start the session. The playback shim is acquired
    /// up front; playout begins once the buffer holds two frames.
    pub fn connect(config: ClientConfig, sink: Box<dyn PlaybackSink>) -> Result<Self> {
        let parsed = Url::parse(&config.url)
            .map_err(|e| CastError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(CastError::InvalidUrl(format!(
                "{}: expected a ws:// URL",
                config.url
            )));
        }

        info!("📡 dialing {}", config.url);
        let conn = cast_protocol::connect(&config.url)?;
        conn.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(SessionState::DescriptorPending));
        let clock = Arc::new(MonoClock::new());
        let buffer = Arc::new(Mutex::new(JitterBuffer::new(config.max_buffer_ms)));

        let poll_ms = config.params.poll_interval_ms();
        let receive_thread = {
            let stop = Arc::clone(&stop);
            let state = Arc::clone(&state);
            let clock = Arc::clone(&clock);
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let result = receive_loop(conn, config, &clock, &buffer, &state, &stop);
                *state.lock().unwrap() = SessionState::Closed;
                stop.store(true, Ordering::SeqCst);
                if let Err(ref e) = result {
                    error!("session failed: {}", e);
                }
                result
            })
        };

        let playout_thread = {
            let stop = Arc::clone(&stop);
            let state = Arc::clone(&state);
            let clock = Arc::clone(&clock);
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || playout_loop(sink, buffer, clock, state, stop, poll_ms))
        };

        Ok(Self {
            stop,
            state,
            buffer,
            receive_thread: Some(receive_thread),
            playout_thread: Some(playout_thread),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> PlayoutStats {
        self.buffer.lock().unwrap().stats()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Shared stop flag, for wiring into signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Wait for the session to end, surfacing the receive thread's outcome.
    pub fn join(mut self) -> Result<()> {
        let result = match self.receive_thread.take() {
            Some(thread) => thread.join().unwrap_or(Ok(())),
            None => Ok(()),
        };
        if let Some(thread) = self.playout_thread.take() {
            let _ = thread.join();
        }
        result
    }
}

impl Drop for CastClient {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.receive_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.playout_thread.take() {
            let _ = thread.join();
        }
    }
}

fn receive_loop(
    mut conn: Connection<ClientStream>,
    config: ClientConfig,
    clock: &MonoClock,
    buffer: &Mutex<JitterBuffer>,
    state: &Mutex<SessionState>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut estimator = SyncEstimator::new();
    let mut stats = ReceiverStats::new();
    let mut ready_sent = false;
    let mut last_sync_sent = f64::NEG_INFINITY;

    let result = loop {
        if stop.load(Ordering::SeqCst) {
            break Ok(());
        }

        let mut did_work = false;
        match conn.try_read() {
            Ok(Some(message)) => {
                did_work = true;
                if let Err(e) = handle_message(
                    &mut conn,
                    message,
                    &config,
                    clock,
                    buffer,
                    state,
                    &mut estimator,
                    &mut ready_sent,
                ) {
                    break Err(e);
                }
            }
            Ok(None) => {}
            Err(ProtocolError::Closed) => {
                info!("source closed the connection");
                break Ok(());
            }
            Err(e) if e.is_malformed() => {
                warn!("dropping malformed message: {}", e);
            }
            Err(e) => break Err(e.into()),
        }

        let now = clock.now_ms();
        let session = *state.lock().unwrap();
        let syncing = matches!(
            session,
            SessionState::Syncing | SessionState::Ready | SessionState::Playing
        );
        if syncing
            && estimator.needs_resync(now)
            && now - last_sync_sent >= config::SYNC_INTERVAL_MS as f64
        {
            conn.send(&Message::SyncRequest { t1: clock.now_ms() })?;
            last_sync_sent = now;
            did_work = true;
        }

        if estimator.converged() && stats.should_report(now) {
            let (playout, buffered) = {
                let buffer = buffer.lock().unwrap();
                (buffer.stats(), buffer.len())
            };
            info!(
                "{}",
                stats.format_status_line(
                    &playout,
                    buffered,
                    estimator.offset(),
                    estimator.rtt(),
                    estimator.drift(),
                )
            );
        }

        conn.flush()?;
        if !did_work {
            thread::sleep(Duration::from_millis(1));
        }
    };

    conn.close();
    result
}

fn handle_message(
    conn: &mut Connection<ClientStream>,
    message: Message,
    config: &ClientConfig,
    clock: &MonoClock,
    buffer: &Mutex<JitterBuffer>,
    state: &Mutex<SessionState>,
    estimator: &mut SyncEstimator,
    ready_sent: &mut bool,
) -> Result<()> {
    match message {
        Message::ServerInfo {
            sample_rate,
            channels,
            bit_depth,
            chunk_duration_ms,
            server_start_time,
        } => {
            let mut session = state.lock().unwrap();
            if *session != SessionState::DescriptorPending {
                debug!("ignoring duplicate server_info");
                return Ok(());
            }

            let params = config.params;
            if sample_rate != params.sample_rate
                || channels != params.channels
                || bit_depth != params.bit_depth
                || chunk_duration_ms != params.chunk_duration_ms
            {
                return Err(CastError::ProtocolMismatch(format!(
                    "source streams {} Hz / {} ch / {} bit / {} ms, \
                     this sink is built for {} Hz / {} ch / {} bit / {} ms",
                    sample_rate,
                    channels,
                    bit_depth,
                    chunk_duration_ms,
                    params.sample_rate,
                    params.channels,
                    params.bit_depth,
                    params.chunk_duration_ms,
                )));
            }

            info!(
                "session descriptor accepted (source start time {:.1} ms)",
                server_start_time
            );
            *session = SessionState::Syncing;
        }
        Message::SyncResponse { t1, t2, t3 } => {
            let t4 = clock.now_ms();
            let sample = estimator.add_exchange(t1, t2, t3, t4);
            debug!(
                "sync sample: offset {:.2} ms, rtt {:.2} ms",
                sample.offset, sample.rtt
            );

            if !*ready_sent {
                conn.send(&Message::ClientReady {
                    client_id: config.client_id.clone(),
                })?;
                *ready_sent = true;
                let mut session = state.lock().unwrap();
                if *session == SessionState::Syncing {
                    *session = SessionState::Ready;
                }
                info!(
                    "✅ synchronized: offset {:+.2} ms, rtt {:.2} ms",
                    estimator.offset(),
                    estimator.rtt()
                );
            }
        }
        Message::AudioChunk {
            timestamp,
            sequence,
            data,
        } => {
            if !estimator.converged() {
                debug!("frame #{} before first sync, dropping", sequence);
                return Ok(());
            }
            let play_at = estimator.source_to_local(timestamp) + config.target_buffer_ms;
            buffer
                .lock()
                .unwrap()
                .insert(sequence, play_at, data, clock.now_ms());
        }
        Message::Error { message } => {
            warn!("source reported: {}", message);
        }
        other => {
            debug!("ignoring unexpected {} message", other.tag());
        }
    }
    Ok(())
}

fn playout_loop(
    mut sink: Box<dyn PlaybackSink>,
    buffer: Arc<Mutex<JitterBuffer>>,
    clock: Arc<MonoClock>,
    state: Arc<Mutex<SessionState>>,
    stop: Arc<AtomicBool>,
    poll_ms: u64,
) {
    let mut playing = false;

    while !stop.load(Ordering::SeqCst) {
        let now = clock.now_ms();

        if !playing {
            let armed = matches!(
                *state.lock().unwrap(),
                SessionState::Ready | SessionState::Playing
            );
            if armed && buffer.lock().unwrap().len() >= 2 {
                playing = true;
                *state.lock().unwrap() = SessionState::Playing;
                info!("▶️  playout started");
            } else {
                thread::sleep(Duration::from_millis(poll_ms));
                continue;
            }
        }

        // Drain everything due this tick, then yield briefly so back-to-back
        // frames go out without waiting a full poll period.
        let mut dispatched = false;
        loop {
            let frame = buffer.lock().unwrap().pop_due(now);
            match frame {
                Some(frame) => {
                    if let Err(e) = sink.write(&frame.data) {
                        error!("playback failed: {}", e);
                        *state.lock().unwrap() = SessionState::Closed;
                        stop.store(true, Ordering::SeqCst);
                        return;
                    }
                    dispatched = true;
                }
                None => break,
            }
        }

        let delay = if dispatched { 1 } else { poll_ms };
        thread::sleep(Duration::from_millis(delay));
    }
}
