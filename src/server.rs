//! Source node: accepts sinks, drives capture, stamps and broadcasts frames.
//!
//! Three kinds of task run here, all plain threads:
//! - the accept loop (single writer of the sink table),
//! - one receive/send thread per sink, owning that sink's socket,
//! - the capture pump, which frames the byte stream, stamps each frame at
//!   enqueue and fans the encoded bytes out through per-sink channels.
//!
//! Sequence and timestamp advance from the moment capture starts, whether or
//! not any sink is ready, so late joiners see a meaningful sequence origin.

use crate::audio::CaptureSource;
use crate::clock::MonoClock;
use crate::config::StreamParams;
use crate::error::Result;
use crate::framer::Framer;
use cast_protocol::{accept, Connection, Message};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Outbound frames queued per sink before sends start failing. At 20 ms per
/// frame this is over a second of backlog.
const SINK_QUEUE_DEPTH: usize = 64;

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub params: StreamParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", crate::config::DEFAULT_PORT),
            params: StreamParams::default(),
        }
    }
}

/// One registered sink. `ready` flips when `client_ready` arrives; frames
/// are only fanned out to ready sinks.
struct SinkRecord {
    tx: Sender<Vec<u8>>,
    ready: bool,
    send_errors: u64,
}

type SinkTable = Arc<Mutex<HashMap<u64, SinkRecord>>>;

/// Cheap clonable view of a running server, for operator logging, tests and
/// shutdown.
#[derive(Clone)]
pub struct ServerHandle {
    sinks: SinkTable,
    stop: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().map(|table| table.len()).unwrap_or(0)
    }

    pub fn ready_count(&self) -> usize {
        self.sinks
            .lock()
            .map(|table| table.values().filter(|sink| sink.ready).count())
            .unwrap_or(0)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

pub struct CastServer {
    config: ServerConfig,
    listener: TcpListener,
    sinks: SinkTable,
    stop: Arc<AtomicBool>,
    clock: Arc<MonoClock>,
    start_time: f64,
}

impl CastServer {
    /// Bind the listener. The server is `Listening` from here; `Streaming`
    /// starts once capture yields and a sink is registered.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address)?;
        listener.set_nonblocking(true)?;
        let clock = Arc::new(MonoClock::new());
        let start_time = clock.now_ms();

        info!("🎵 listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            sinks: Arc::new(Mutex::new(HashMap::new())),
            stop: Arc::new(AtomicBool::new(false)),
            clock,
            start_time,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            sinks: Arc::clone(&self.sinks),
            stop: Arc::clone(&self.stop),
        }
    }

    /// Run until capture ends or the stop flag is raised (blocking).
    pub fn run(self, capture: Box<dyn CaptureSource>) -> Result<()> {
        let pump = {
            let sinks = Arc::clone(&self.sinks);
            let clock = Arc::clone(&self.clock);
            let stop = Arc::clone(&self.stop);
            let params = self.config.params;
            thread::spawn(move || pump_capture(capture, sinks, clock, stop, params))
        };

        let mut next_sink_id: u64 = 0;
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = next_sink_id;
                    next_sink_id += 1;
                    info!("🔌 sink {} connected from {}", id, addr);

                    let sinks = Arc::clone(&self.sinks);
                    let clock = Arc::clone(&self.clock);
                    let stop = Arc::clone(&self.stop);
                    let params = self.config.params;
                    let start_time = self.start_time;
                    thread::spawn(move || {
                        if let Err(e) =
                            serve_sink(stream, id, sinks.clone(), clock, stop, params, start_time)
                        {
                            debug!("sink {} closed: {}", id, e);
                        }
                        if let Ok(mut table) = sinks.lock() {
                            table.remove(&id);
                        }
                        info!("🔌 sink {} disconnected", id);
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        info!("🛑 server shutting down");
        let _ = pump.join();
        Ok(())
    }
}

/// Per-sink thread: handshake, session descriptor, then interleaved outbound
/// frame writes and inbound message handling on one socket.
fn serve_sink(
    stream: TcpStream,
    id: u64,
    sinks: SinkTable,
    clock: Arc<MonoClock>,
    stop: Arc<AtomicBool>,
    params: StreamParams,
    start_time: f64,
) -> Result<()> {
    // The accepted socket can inherit the listener's non-blocking flag on
    // some platforms; the handshake needs a blocking socket.
    stream.set_nonblocking(false)?;
    let mut conn = accept(stream)?;

    // Every connection gets the descriptor immediately, ready or not.
    conn.send(&Message::ServerInfo {
        sample_rate: params.sample_rate,
        channels: params.channels,
        bit_depth: params.bit_depth,
        chunk_duration_ms: params.chunk_duration_ms,
        server_start_time: start_time,
    })?;
    conn.set_nonblocking(true)?;

    let rx = register_sink(&sinks, id);

    let result = sink_loop(&mut conn, id, &sinks, &clock, &stop, rx);
    conn.close();
    result
}

fn register_sink(sinks: &SinkTable, id: u64) -> Receiver<Vec<u8>> {
    let (tx, rx) = bounded(SINK_QUEUE_DEPTH);
    if let Ok(mut table) = sinks.lock() {
        table.insert(
            id,
            SinkRecord {
                tx,
                ready: false,
                send_errors: 0,
            },
        );
    }
    rx
}

fn sink_loop(
    conn: &mut Connection<TcpStream>,
    id: u64,
    sinks: &SinkTable,
    clock: &MonoClock,
    stop: &AtomicBool,
    rx: Receiver<Vec<u8>>,
) -> Result<()> {
    while !stop.load(Ordering::SeqCst) {
        let mut did_work = false;

        // Outbound: drain every frame queued since the last pass.
        crossbeam::channel::select! {
            recv(rx) -> frame => {
                if let Ok(frame) = frame {
                    conn.send_encoded(frame)?;
                    did_work = true;
                }
            }
            default(Duration::from_millis(1)) => {}
        }
        while let Ok(frame) = rx.try_recv() {
            conn.send_encoded(frame)?;
            did_work = true;
        }

        // Inbound: service everything available. Sync requests are answered
        // before the next message is dequeued to keep t3 - t2 small.
        loop {
            match conn.try_read() {
                Ok(Some(message)) => {
                    did_work = true;
                    handle_sink_message(conn, id, sinks, clock, message)?;
                }
                Ok(None) => break,
                Err(e) if e.is_malformed() => {
                    warn!("sink {}: dropping malformed message: {}", id, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        conn.flush()?;
        if !did_work {
            thread::sleep(Duration::from_millis(1));
        }
    }

    // Best-effort drain of frames queued before shutdown.
    while let Ok(frame) = rx.try_recv() {
        conn.send_encoded(frame)?;
    }
    conn.flush()?;
    Ok(())
}

fn handle_sink_message(
    conn: &mut Connection<TcpStream>,
    id: u64,
    sinks: &SinkTable,
    clock: &MonoClock,
    message: Message,
) -> Result<()> {
    match message {
        Message::SyncRequest { t1 } => {
            let t2 = clock.now_ms();
            let t3 = clock.now_ms();
            conn.send(&Message::SyncResponse { t1, t2, t3 })?;
        }
        Message::ClientReady { client_id } => {
            if let Ok(mut table) = sinks.lock() {
                if let Some(record) = table.get_mut(&id) {
                    // Repeated client_ready messages are idempotent.
                    if !record.ready {
                        record.ready = true;
                        info!("✅ sink {} ({}) ready", id, client_id);
                    }
                }
            }
        }
        Message::Error { message } => {
            warn!("sink {} reported: {}", id, message);
        }
        other => {
            debug!("sink {}: ignoring unexpected {} message", id, other.tag());
        }
    }
    Ok(())
}

/// Capture pump: byte stream → framer → stamp at enqueue → encode once →
/// fan out to ready sinks.
fn pump_capture(
    mut capture: Box<dyn CaptureSource>,
    sinks: SinkTable,
    clock: Arc<MonoClock>,
    stop: Arc<AtomicBool>,
    params: StreamParams,
) {
    let mut framer = Framer::new(params.bytes_per_chunk());
    let mut sequence: u64 = 0;
    let mut streaming = false;

    while !stop.load(Ordering::SeqCst) {
        match capture.next_block() {
            Ok(Some(block)) => {
                for frame in framer.push(&block) {
                    if !streaming {
                        let has_sinks = sinks.lock().map(|t| !t.is_empty()).unwrap_or(false);
                        if has_sinks {
                            streaming = true;
                            info!("🎵 streaming (sequence {})", sequence);
                        }
                    }
                    broadcast_frame(&sinks, &clock, &mut sequence, frame);
                }
            }
            Ok(None) => {
                if let Some(rest) = framer.flush() {
                    broadcast_frame(&sinks, &clock, &mut sequence, rest);
                }
                info!("capture stream ended after {} frames", sequence);
                break;
            }
            Err(e) => {
                error!("capture failed: {}", e);
                break;
            }
        }
    }
    stop.store(true, Ordering::SeqCst);
}

fn broadcast_frame(sinks: &SinkTable, clock: &MonoClock, sequence: &mut u64, data: Vec<u8>) {
    let message = Message::AudioChunk {
        timestamp: clock.now_ms(),
        sequence: *sequence,
        data,
    };
    *sequence += 1;

    let encoded = message.encode();
    broadcast_encoded(sinks, &encoded);
}

/// Send pre-encoded bytes to every ready sink. Individual failures are
/// counted against the failing sink and never abort the broadcast.
fn broadcast_encoded(sinks: &SinkTable, encoded: &[u8]) -> usize {
    let mut table = match sinks.lock() {
        Ok(table) => table,
        Err(_) => return 0,
    };

    let mut sent = 0;
    for (id, record) in table.iter_mut() {
        if !record.ready {
            continue;
        }
        match record.tx.try_send(encoded.to_vec()) {
            Ok(()) => sent += 1,
            Err(TrySendError::Full(_)) => {
                record.send_errors += 1;
                warn!(
                    "sink {} not keeping up ({} send errors)",
                    id, record.send_errors
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                // The sink thread is gone; it unregisters itself.
                record.send_errors += 1;
            }
        }
    }
    sent
}
