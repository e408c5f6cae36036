//! Orchestrator - the bridge facade the host drives.
//!
//! Flow:
//! 1. Listen on an ephemeral loopback port
//! 2. Spawn the viewer with that port on its command line
//! 3. Wait for the viewer to connect
//! 4. Host calls request/response, push and polling-drain operations
//! 5. On stop, drop, or viewer exit: kill the viewer, close the connection
//!
//! The orchestrator owns a current-thread runtime and never spawns tasks on
//! it. All I/O happens inside the host's own calls, each bounded by a timeout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;

use crate::bridge::protocol::{Message, MessageType};
use crate::bridge::transport::{Session, TransportError};
use crate::buffer::{BufferDescriptor, BufferError};
use crate::pending::PendingMessages;
use crate::supervisor::{CommandSpawner, SpawnError, ViewerLaunch, ViewerProcess, ViewerSpawner};

pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_EVENT_LOOP_TIMEOUT: Duration = Duration::from_millis(200);

/// Upper bound on how long an accept wait goes without checking the viewer is alive.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long teardown waits for the killed viewer to be reaped.
const VIEWER_REAP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Starting,
    Ready,
    /// Stopped or lost the viewer. A terminated bridge is never restarted.
    Terminated,
}

pub struct OrchestratorConfig {
    pub viewer_dir: Option<PathBuf>,
    pub viewer_binary: String,
    pub style: String,
    pub accept_timeout: Duration,
    pub request_timeout: Duration,
    pub event_loop_timeout: Duration,
    pub spawner: Arc<dyn ViewerSpawner>,
}

impl OrchestratorConfig {
    pub fn new(viewer_binary: impl Into<String>) -> Self {
        Self {
            viewer_dir: None,
            viewer_binary: viewer_binary.into(),
            style: "fusion".to_string(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_loop_timeout: DEFAULT_EVENT_LOOP_TIMEOUT,
            spawner: Arc::new(CommandSpawner),
        }
    }

    pub fn with_viewer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.viewer_dir = Some(dir.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_loop_timeout(mut self, timeout: Duration) -> Self {
        self.event_loop_timeout = timeout;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ViewerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Full path of the viewer executable.
    pub fn viewer_executable(&self) -> PathBuf {
        match &self.viewer_dir {
            Some(dir) => dir.join(&self.viewer_binary),
            None => PathBuf::from(&self.viewer_binary),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("viewer_dir", &self.viewer_dir)
            .field("viewer_binary", &self.viewer_binary)
            .field("style", &self.style)
            .field("accept_timeout", &self.accept_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("event_loop_timeout", &self.event_loop_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new("oidwindow")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to create bridge runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("bridge was already started")]
    AlreadyStarted,
    #[error("bridge is not ready (state {0:?})")]
    NotReady(BridgeState),
    #[error("viewer process exited before connecting")]
    ViewerExited,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

type PlotRequestCallback = Box<dyn FnMut(&str) + Send>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    state: BridgeState,
    session: Option<Session>,
    viewer: ViewerProcess,
    pending: PendingMessages,
    on_plot_request: PlotRequestCallback,
    // Dropped last: the session and child are torn down inside its context.
    runtime: Runtime,
}

impl Orchestrator {
    /// Create an idle bridge. `on_plot_request` is called with the buffer name
    /// of every plot request the viewer sends, from inside [`Self::run_event_loop`].
    pub fn new(
        config: OrchestratorConfig,
        on_plot_request: impl FnMut(&str) + Send + 'static,
    ) -> Result<Self, OrchestratorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(OrchestratorError::Runtime)?;

        Ok(Self {
            config,
            state: BridgeState::Uninitialized,
            session: None,
            viewer: ViewerProcess::new(),
            pending: PendingMessages::new(),
            on_plot_request: Box::new(on_plot_request),
            runtime,
        })
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Port the bridge listens on, once started.
    pub fn port(&self) -> Option<u16> {
        self.session.as_ref().map(Session::port)
    }

    pub fn pending(&self) -> &PendingMessages {
        &self.pending
    }

    /// Listen, spawn the viewer and wait for it to connect.
    ///
    /// On failure the viewer is killed and the bridge is left terminated.
    pub fn start(&mut self) -> Result<(), OrchestratorError> {
        if self.state != BridgeState::Uninitialized {
            return Err(OrchestratorError::AlreadyStarted);
        }
        self.state = BridgeState::Starting;

        match self.try_start() {
            Ok(()) => {
                self.state = BridgeState::Ready;
                tracing::info!(port = ?self.port(), pid = ?self.viewer.id(), "Bridge ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start viewer bridge");
                self.teardown();
                Err(e)
            }
        }
    }

    fn try_start(&mut self) -> Result<(), OrchestratorError> {
        let session = self.session.insert(self.runtime.block_on(Session::listen())?);

        let launch = ViewerLaunch {
            executable: self.config.viewer_executable(),
            style: self.config.style.clone(),
            port: session.port(),
        };
        {
            let _guard = self.runtime.enter();
            self.viewer.start(self.config.spawner.as_ref(), &launch)?;
        }
        if !self.viewer.wait_for_start() {
            return Err(OrchestratorError::ViewerExited);
        }

        let deadline = Instant::now() + self.config.accept_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::AcceptTimeout(self.config.accept_timeout).into());
            }
            match self
                .runtime
                .block_on(session.accept(remaining.min(ACCEPT_POLL_INTERVAL)))
            {
                Ok(_) => return Ok(()),
                Err(TransportError::AcceptTimeout(_)) if !self.viewer.is_running() => {
                    return Err(OrchestratorError::ViewerExited);
                }
                Err(TransportError::AcceptTimeout(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Connected and the viewer process is still alive.
    ///
    /// A viewer that has exited or dropped its connection terminates the bridge.
    pub fn is_ready(&mut self) -> bool {
        if self.state != BridgeState::Ready {
            return false;
        }

        let connected = self.session.as_ref().is_some_and(Session::is_connected);
        if !connected || !self.viewer.is_running() {
            tracing::warn!(connected, "Viewer is gone, terminating bridge");
            self.teardown();
            return false;
        }
        true
    }

    /// Ask the viewer which symbols it is watching.
    ///
    /// Returns an empty list if the bridge is not ready or no answer arrives
    /// within the request timeout.
    pub fn get_observed_symbols(&mut self) -> Vec<String> {
        match self.fetch(
            Message::GetObservedSymbols,
            MessageType::GetObservedSymbolsResponse,
        ) {
            Some(Message::GetObservedSymbolsResponse { symbols }) => symbols,
            _ => Vec::new(),
        }
    }

    pub fn set_available_symbols(&mut self, symbols: Vec<String>) -> Result<(), OrchestratorError> {
        self.push(Message::SetAvailableSymbols { symbols })
    }

    /// Validate `descriptor` and send a copy of its payload to the viewer.
    ///
    /// Validation happens first, so an invalid descriptor never reaches the wire.
    pub fn plot_buffer(&mut self, descriptor: &BufferDescriptor<'_>) -> Result<(), OrchestratorError> {
        let contents = descriptor.to_contents()?;
        tracing::debug!(
            variable_name = descriptor.variable_name,
            size = ?contents.visualized_size(),
            bytes = contents.payload.len(),
            "Plotting buffer"
        );
        self.push(Message::PlotBufferContents(contents))
    }

    /// Ingest what the viewer sent within the event-loop timeout, then invoke the
    /// plot callback once per pending plot request, in arrival order.
    ///
    /// Returns the number of callbacks fired.
    pub fn run_event_loop(&mut self) -> usize {
        let requests = self.take_plot_requests();
        for buffer_name in &requests {
            tracing::debug!(buffer_name = %buffer_name, "Dispatching plot request");
            (self.on_plot_request)(buffer_name);
        }
        requests.len()
    }

    /// The draining half of [`Self::run_event_loop`]: ingest what the viewer sent
    /// within the event-loop timeout and hand back the names of every pending
    /// plot request, in arrival order, without invoking the callback.
    ///
    /// For callers whose callback needs the bridge itself, e.g. to plot the
    /// requested buffer right away.
    pub fn take_plot_requests(&mut self) -> Vec<String> {
        if !self.is_ready() {
            return Vec::new();
        }

        let mut requests = Vec::new();
        requests.extend(self.pending.take(MessageType::PlotBufferRequest));

        let wait = self.config.event_loop_timeout;
        self.drain(wait, |pending| {
            requests.extend(pending.take(MessageType::PlotBufferRequest));
        });

        requests
            .into_iter()
            .filter_map(|request| match request {
                Message::PlotBufferRequest { buffer_name } => Some(buffer_name),
                _ => None,
            })
            .collect()
    }

    /// Kill the viewer and close the connection. Idempotent.
    pub fn stop(&mut self) {
        if self.state == BridgeState::Terminated {
            return;
        }
        tracing::info!(port = ?self.port(), "Stopping viewer bridge");
        self.teardown();
    }

    fn teardown(&mut self) {
        self.runtime.block_on(self.viewer.shutdown(VIEWER_REAP_TIMEOUT));
        let _guard = self.runtime.enter();
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.pending.clear();
        self.state = BridgeState::Terminated;
    }

    /// Fire-and-forget send.
    fn push(&mut self, message: Message) -> Result<(), OrchestratorError> {
        if !self.is_ready() {
            return Err(OrchestratorError::NotReady(self.state));
        }
        self.send(message)
    }

    fn send(&mut self, message: Message) -> Result<(), OrchestratorError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        let kind = message.kind();
        let wait = self.config.request_timeout;

        match self.runtime.block_on(session.send(message, wait)) {
            Ok(()) => {
                tracing::debug!(message_type = ?kind, "Sent message to viewer");
                Ok(())
            }
            Err(e) => {
                self.handle_transport_error(&e);
                Err(e.into())
            }
        }
    }

    /// Send `request` and wait for a message of type `expected`.
    ///
    /// Other messages read while waiting stay pending for later calls.
    fn fetch(&mut self, request: Message, expected: MessageType) -> Option<Message> {
        if !self.is_ready() {
            tracing::warn!(message_type = ?expected, state = ?self.state, "Bridge not ready");
            return None;
        }
        self.send(request).ok()?;

        let deadline = Instant::now() + self.config.request_timeout;
        loop {
            if let Some(message) = self.pending.take(expected) {
                return Some(message);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.state != BridgeState::Ready {
                tracing::warn!(message_type = ?expected, "No response from viewer");
                return None;
            }
            self.drain(remaining, |_| {});
        }
    }

    /// Read available frames into the pending table. `after_insert` runs after
    /// each stored frame.
    fn drain<F>(&mut self, wait: Duration, mut after_insert: F) -> usize
    where
        F: FnMut(&mut PendingMessages),
    {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let pending = &mut self.pending;

        let result = self.runtime.block_on(session.try_read_frames(wait, |message| {
            let kind = message.kind();
            if !kind.is_viewer_to_host() {
                tracing::warn!(message_type = ?kind, "Dropping unexpected message from viewer");
                return;
            }
            tracing::debug!(message_type = ?kind, "Received message from viewer");
            pending.insert(message);
            after_insert(pending);
        }));

        match result {
            Ok(frames) => frames,
            Err(e) => {
                self.handle_transport_error(&e);
                0
            }
        }
    }

    fn handle_transport_error(&mut self, error: &TransportError) {
        if error.is_fatal() {
            tracing::error!(error = %error, "Viewer connection failed, terminating bridge");
            self.teardown();
        } else {
            tracing::warn!(error = %error, "Viewer transport error");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
