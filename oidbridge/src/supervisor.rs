//! Viewer process supervision.
//!
//! The viewer is started once per bridge and killed unconditionally when the
//! bridge goes away. There is no shutdown handshake: anything still in flight
//! when the process is killed is lost.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessState {
    #[default]
    NotStarted,
    /// Spawned, OS start not yet confirmed.
    Starting,
    Running,
    Exited,
}

/// Everything needed to launch one viewer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerLaunch {
    pub executable: PathBuf,
    pub style: String,
    /// Loopback port the viewer must connect back to.
    pub port: u16,
}

impl ViewerLaunch {
    pub fn args(&self) -> Vec<String> {
        vec![
            "-style".to_string(),
            self.style.clone(),
            "-p".to_string(),
            self.port.to_string(),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("viewer process was already started")]
    AlreadyStarted,
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for how the viewer process is launched.
///
/// Called from within the bridge's runtime context, so implementations may use
/// `tokio::process` directly.
pub trait ViewerSpawner: Send + Sync {
    fn spawn(&self, launch: &ViewerLaunch) -> Result<Child, SpawnError>;
}

/// Launches the viewer executable directly.
pub struct CommandSpawner;

impl ViewerSpawner for CommandSpawner {
    fn spawn(&self, launch: &ViewerLaunch) -> Result<Child, SpawnError> {
        Command::new(&launch.executable)
            .args(launch.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                path: launch.executable.clone(),
                source,
            })
    }
}

/// Owns the viewer child process. Dropping it kills the child.
#[derive(Default)]
pub struct ViewerProcess {
    state: ProcessState,
    child: Option<Child>,
}

impl ViewerProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn start(
        &mut self,
        spawner: &dyn ViewerSpawner,
        launch: &ViewerLaunch,
    ) -> Result<(), SpawnError> {
        if self.state != ProcessState::NotStarted {
            return Err(SpawnError::AlreadyStarted);
        }

        let child = spawner.spawn(launch)?;
        tracing::info!(
            pid = ?child.id(),
            executable = %launch.executable.display(),
            port = launch.port,
            "Spawned viewer process"
        );

        self.child = Some(child);
        self.state = ProcessState::Starting;
        Ok(())
    }

    /// Confirm the OS reports the process as started and not yet exited.
    ///
    /// This is not a readiness handshake; the connection accept is what proves
    /// the viewer is up.
    pub fn wait_for_start(&mut self) -> bool {
        let state = self.state;
        match state {
            ProcessState::Running => true,
            ProcessState::Starting if self.is_running() => {
                self.state = ProcessState::Running;
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(%status, "Viewer process exited");
                self.state = ProcessState::Exited;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll viewer process");
                false
            }
        }
    }

    /// Kill the process if it is still alive, without waiting for it. Safe to
    /// call repeatedly.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.kill() {
            let _ = child.try_wait();
        }
    }

    /// Kill the process if it is still alive and wait up to `wait` for it to be
    /// reaped. Safe to call repeatedly.
    pub async fn shutdown(&mut self, wait: Duration) {
        let Some(mut child) = self.kill() else {
            return;
        };
        match tokio::time::timeout(wait, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Reaped viewer process"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to reap viewer process"),
            Err(_) => tracing::warn!(?wait, "Viewer process not reaped in time"),
        }
    }

    /// Send the kill signal. Returns the child if it still needs reaping.
    fn kill(&mut self) -> Option<Child> {
        if self.state != ProcessState::NotStarted {
            self.state = ProcessState::Exited;
        }

        let mut child = self.child.take()?;
        if let Ok(Some(_)) = child.try_wait() {
            return None;
        }
        match child.start_kill() {
            Ok(()) => tracing::info!(pid = ?child.id(), "Killed viewer process"),
            Err(e) => tracing::warn!(error = %e, "Failed to kill viewer process"),
        }
        Some(child)
    }
}

impl Drop for ViewerProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
