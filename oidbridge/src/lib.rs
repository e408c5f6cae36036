//! oidbridge: hand live debugger buffers to a separate viewer process.
//!
//! The bridge listens on a loopback port, spawns the viewer with that port on
//! its command line, and exchanges binary frames with it over the single
//! connection the viewer opens back.

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod pending;
pub mod supervisor;
pub mod viewer;

pub use bridge::protocol::{BufferContents, BufferType, Message, MessageType};
pub use bridge::transport::TransportError;
pub use buffer::{BufferDescriptor, BufferError};
pub use config::{BridgeOptions, ConfigError};
pub use orchestrator::{BridgeState, Orchestrator, OrchestratorConfig, OrchestratorError};
pub use pending::PendingMessages;
pub use supervisor::{CommandSpawner, ProcessState, SpawnError, ViewerLaunch, ViewerSpawner};
pub use viewer::{ViewerArgs, ViewerConnection};
