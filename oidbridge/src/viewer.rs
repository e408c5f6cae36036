//! Viewer side of the protocol.
//!
//! A rendering process is launched as `<executable> -style <name> -p <port>`
//! and connects back to the bridge on that loopback port. [`ViewerArgs`] parses
//! that command line and [`ViewerConnection`] speaks the protocol from the
//! viewer's end of the socket.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::bridge::codec::FrameCodec;
use crate::bridge::protocol::Message;
use crate::bridge::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("missing required argument {0}")]
    MissingArgument(&'static str),
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Command line handed to the viewer by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerArgs {
    pub style: Option<String>,
    pub port: u16,
}

impl ViewerArgs {
    /// Parse arguments, excluding the program name. Unrecognized arguments are ignored.
    pub fn parse<I, S>(args: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut style = None;
        let mut port = None;

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-style" => style = Some(args.next().ok_or(ArgsError::MissingValue("-style"))?),
                "-p" => {
                    let value = args.next().ok_or(ArgsError::MissingValue("-p"))?;
                    let parsed = value
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p != 0)
                        .ok_or(ArgsError::InvalidPort(value))?;
                    port = Some(parsed);
                }
                other => tracing::debug!(argument = other, "Ignoring viewer argument"),
            }
        }

        Ok(Self {
            style,
            port: port.ok_or(ArgsError::MissingArgument("-p"))?,
        })
    }
}

/// The viewer's single connection to the bridge.
pub struct ViewerConnection {
    framed: Framed<TcpStream, FrameCodec>,
}

impl ViewerConnection {
    pub async fn connect(port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let stream = TcpStream::connect(addr).await.map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        tracing::info!(%addr, "Viewer connected to bridge");
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
        })
    }

    /// Next message from the bridge, or `None` if nothing arrives within `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<Message>, TransportError> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(TransportError::Closed),
            Ok(Some(frame)) => frame.map(Some).map_err(TransportError::from_stream),
        }
    }

    pub async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.framed
            .send(message)
            .await
            .map_err(TransportError::from_stream)
    }

    /// Ask the bridge to plot the named buffer.
    pub async fn request_plot_buffer(&mut self, buffer_name: &str) -> Result<(), TransportError> {
        self.send(Message::PlotBufferRequest {
            buffer_name: buffer_name.to_string(),
        })
        .await
    }

    pub async fn respond_observed_symbols(
        &mut self,
        symbols: Vec<String>,
    ) -> Result<(), TransportError> {
        self.send(Message::GetObservedSymbolsResponse { symbols }).await
    }
}
