//! Loopback TCP session between the bridge and the viewer process.
//!
//! The session listens on an ephemeral loopback port, accepts exactly one
//! viewer connection and then stops listening, so later connection attempts
//! are never promoted to the active client.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use super::codec::FrameCodec;
use super::protocol::Message;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not start TCP server: {0}")]
    Bind(#[source] io::Error),

    #[error("no clients connected to the viewer server within {0:?}")]
    AcceptTimeout(Duration),

    #[error("no viewer connection")]
    NotConnected,

    #[error("viewer closed the connection")]
    Closed,

    #[error("send did not complete within {0:?}")]
    SendTimeout(Duration),

    /// Framing is lost; there is no way to resynchronize the stream.
    #[error("stream desynchronized: {0}")]
    Protocol(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    pub(crate) fn from_stream(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData => Self::Protocol(e),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(e),
        }
    }

    /// Whether the connection is unusable after this error.
    ///
    /// A send that timed out may have left part of a frame on the socket, so
    /// nothing written after it can be framed correctly.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AcceptTimeout(_))
    }
}

pub struct Session {
    port: u16,
    listener: Option<TcpListener>,
    connection: Option<Framed<TcpStream, FrameCodec>>,
    peer: Option<SocketAddr>,
}

impl Session {
    /// Bind an ephemeral loopback port for the viewer to connect to.
    pub async fn listen() -> Result<Self, TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(TransportError::Bind)?;
        let port = listener.local_addr().map_err(TransportError::Bind)?.port();

        tracing::info!(port, "Listening for viewer connection");

        Ok(Self {
            port,
            listener: Some(listener),
            connection: None,
            peer: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Wait up to `wait` for the first viewer connection.
    ///
    /// Once a client is accepted the listener is closed; calling this again
    /// returns the already-accepted peer.
    pub async fn accept(&mut self, wait: Duration) -> Result<SocketAddr, TransportError> {
        if let Some(peer) = self.peer {
            return Ok(peer);
        }
        let listener = self.listener.as_ref().ok_or(TransportError::NotConnected)?;

        tracing::debug!(port = self.port, ?wait, "Waiting for viewer to connect");
        let (stream, peer) = match tokio::time::timeout(wait, listener.accept()).await {
            Ok(accepted) => accepted.map_err(TransportError::Io)?,
            Err(_) => return Err(TransportError::AcceptTimeout(wait)),
        };
        stream.set_nodelay(true).map_err(TransportError::Io)?;

        self.listener = None;
        self.connection = Some(Framed::new(stream, FrameCodec::new()));
        self.peer = Some(peer);

        tracing::info!(%peer, "Viewer connected");
        Ok(peer)
    }

    /// Write one complete frame, waiting at most `wait` for the socket to drain.
    ///
    /// On timeout an unknown prefix of the frame has been written; the caller
    /// must drop the connection.
    pub async fn send(&mut self, message: Message, wait: Duration) -> Result<(), TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        match tokio::time::timeout(wait, connection.send(message)).await {
            Ok(sent) => sent.map_err(TransportError::from_stream),
            Err(_) => Err(TransportError::SendTimeout(wait)),
        }
    }

    /// Wait up to `wait` for inbound data, then decode every frame that is
    /// already available, handing each to `on_frame` in arrival order.
    ///
    /// Returns the number of frames delivered; zero means nothing arrived in time.
    /// A frame that is only partially received stays buffered for the next call.
    pub async fn try_read_frames<F>(
        &mut self,
        wait: Duration,
        mut on_frame: F,
    ) -> Result<usize, TransportError>
    where
        F: FnMut(Message),
    {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;

        let mut next = match tokio::time::timeout(wait, connection.next()).await {
            Ok(frame) => frame,
            Err(_) => return Ok(0),
        };

        let mut delivered = 0;
        loop {
            match next {
                Some(Ok(message)) => {
                    delivered += 1;
                    on_frame(message);
                }
                Some(Err(e)) => return Err(TransportError::from_stream(e)),
                None => return Err(TransportError::Closed),
            }

            // Keep going only while complete frames are ready without waiting.
            match connection.next().now_or_never() {
                Some(frame) => next = frame,
                None => break,
            }
        }

        tracing::trace!(frames = delivered, "Drained viewer frames");
        Ok(delivered)
    }

    /// Drop the connection and stop listening.
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!(port = self.port, "Closed viewer connection");
        }
        self.listener = None;
    }
}
