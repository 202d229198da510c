use crate::message::{Message, ProtocolError};
use log::{debug, trace};
use std::io::{Read, Write};
use std::net::TcpStream;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message as WsMessage, WebSocket};

/// Stream type produced by a client-side `connect`.
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// Wrapper pairing a WebSocket with the wire codec: exactly one encoded
/// message per binary frame.
///
/// Reads are non-blocking friendly: `try_read` surfaces `WouldBlock` as
/// `Ok(None)` so callers can interleave sends and receives on one thread.
pub struct Connection<S: Read + Write> {
    ws: WebSocket<S>,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(ws: WebSocket<S>) -> Self {
        Connection { ws }
    }

    /// Encode and send one message. A `WouldBlock` during the flush leaves
    /// the frame queued inside the socket; a later `flush` or send completes
    /// it.
    pub fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        trace!("sending {} message", message.tag());
        match self.ws.send(WsMessage::Binary(message.encode())) {
            Ok(()) => Ok(()),
            Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Err(ProtocolError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send bytes that were already encoded with [`Message::encode`]. The
    /// broadcast path encodes each frame once and fans the same bytes out to
    /// every sink.
    pub fn send_encoded(&mut self, frame: Vec<u8>) -> Result<(), ProtocolError> {
        match self.ws.send(WsMessage::Binary(frame)) {
            Ok(()) => Ok(()),
            Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Err(ProtocolError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Push any queued frames toward the socket.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        match self.ws.flush() {
            Ok(()) => Ok(()),
            Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Err(ProtocolError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the next message if one is available.
    ///
    /// Returns `Ok(None)` when the socket has no complete frame yet. Decode
    /// failures are returned as errors carrying `is_malformed() == true`; the
    /// caller decides whether the channel stays open.
    pub fn try_read(&mut self) -> Result<Option<Message>, ProtocolError> {
        loop {
            match self.ws.read() {
                Ok(WsMessage::Binary(bytes)) => return Message::decode(&bytes).map(Some),
                Ok(WsMessage::Ping(payload)) => {
                    trace!("ping received, replying");
                    let _ = self.ws.send(WsMessage::Pong(payload));
                }
                Ok(WsMessage::Close(_)) => return Err(ProtocolError::Closed),
                Ok(other) => {
                    debug!("ignoring unexpected {} frame", frame_kind(&other));
                }
                Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(None)
                }
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    return Err(ProtocolError::Closed)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Initiate a clean close. Errors are ignored; the peer may already be
    /// gone.
    pub fn close(&mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }

    pub fn get_ref(&self) -> &S {
        self.ws.get_ref()
    }
}

impl Connection<TcpStream> {
    /// Switch the accepted socket to non-blocking reads. Call after the
    /// WebSocket handshake, which needs a blocking socket.
    pub fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        self.ws.get_ref().set_nonblocking(nonblocking)
    }
}

impl Connection<ClientStream> {
    pub fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self.ws.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.set_nonblocking(nonblocking),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "non-blocking mode requires a plain TCP stream",
            )),
        }
    }
}

/// Dial a source node. The handshake runs in blocking mode; callers that
/// poll should call `set_nonblocking(true)` afterwards.
pub fn connect(url: &str) -> Result<Connection<ClientStream>, ProtocolError> {
    let (ws, response) = tungstenite::connect(url)?;
    debug!("connected to {}, status {}", url, response.status());
    Ok(Connection::new(ws))
}

/// Accept an inbound sink connection on an already-established TCP stream.
pub fn accept(stream: TcpStream) -> Result<Connection<TcpStream>, ProtocolError> {
    let ws = tungstenite::accept(stream).map_err(|e| match e {
        tungstenite::HandshakeError::Failure(e) => ProtocolError::WebSocket(e),
        tungstenite::HandshakeError::Interrupted(_) => ProtocolError::Closed,
    })?;
    Ok(Connection::new(ws))
}

fn frame_kind(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "raw",
    }
}
