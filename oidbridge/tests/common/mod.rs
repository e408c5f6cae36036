#![allow(dead_code)]

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use oidbridge::{
    Message, Orchestrator, OrchestratorConfig, SpawnError, ViewerConnection, ViewerLaunch,
    ViewerSpawner,
};
use tokio::process::{Child, Command};
use tokio::runtime::Runtime;

pub const WAIT: Duration = Duration::from_secs(5);

type Script = Box<dyn FnOnce(u16) + Send>;

/// Spawns a placeholder OS process in place of the viewer and runs `script` on
/// a thread with the bridge's port, standing in for the viewer's networking.
pub struct MockSpawner {
    program: &'static str,
    args: Vec<&'static str>,
    script: Mutex<Option<Script>>,
    pids: Arc<Mutex<Vec<u32>>>,
}

impl MockSpawner {
    /// A long-lived viewer that connects and then runs `script`.
    pub fn connecting(script: impl FnOnce(MockViewer) + Send + 'static) -> Self {
        Self::process("sleep", &["30"]).with_script(move |port| script(MockViewer::connect(port)))
    }

    /// A process that never connects.
    pub fn process(program: &'static str, args: &[&'static str]) -> Self {
        Self {
            program,
            args: args.to_vec(),
            script: Mutex::new(None),
            pids: Arc::default(),
        }
    }

    /// Pids of every process this spawner has started.
    pub fn pids(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.pids)
    }

    pub fn with_script(self, script: impl FnOnce(u16) + Send + 'static) -> Self {
        *self.script.lock().unwrap() = Some(Box::new(script));
        self
    }
}

impl ViewerSpawner for MockSpawner {
    fn spawn(&self, launch: &ViewerLaunch) -> Result<Child, SpawnError> {
        assert_eq!(launch.args()[..2], ["-style", "fusion"]);

        let child = Command::new(self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::Other(e.to_string()))?;
        self.pids.lock().unwrap().extend(child.id());

        if let Some(script) = self.script.lock().unwrap().take() {
            let port = launch.port;
            thread::spawn(move || script(port));
        }
        Ok(child)
    }
}

/// Blocking wrapper over [`ViewerConnection`] for use on a mock viewer thread.
pub struct MockViewer {
    runtime: Runtime,
    connection: ViewerConnection,
}

impl MockViewer {
    pub fn connect(port: u16) -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let connection = runtime.block_on(ViewerConnection::connect(port)).unwrap();
        Self {
            runtime,
            connection,
        }
    }

    pub fn recv(&mut self) -> Message {
        self.try_recv(WAIT).expect("no message from bridge")
    }

    pub fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        self.runtime
            .block_on(self.connection.recv(wait))
            .ok()
            .flatten()
    }

    pub fn send(&mut self, message: Message) {
        self.runtime.block_on(self.connection.send(message)).unwrap();
    }

    pub fn request_plot_buffer(&mut self, name: &str) {
        self.runtime
            .block_on(self.connection.request_plot_buffer(name))
            .unwrap();
    }

    pub fn respond_observed_symbols(&mut self, symbols: &[&str]) {
        let symbols = symbols.iter().map(|s| s.to_string()).collect();
        self.runtime
            .block_on(self.connection.respond_observed_symbols(symbols))
            .unwrap();
    }

    /// Keep the connection open until the bridge closes it.
    pub fn hold(mut self) {
        while self
            .runtime
            .block_on(self.connection.recv(Duration::from_secs(1)))
            .is_ok()
        {}
    }
}

pub fn config(spawner: MockSpawner) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_spawner(Arc::new(spawner))
        .with_accept_timeout(WAIT)
        .with_request_timeout(WAIT)
}

/// Start a bridge against `spawner`, recording plot requests in the returned list.
pub fn start_bridge(spawner: MockSpawner) -> (Orchestrator, Arc<Mutex<Vec<String>>>) {
    start_with(config(spawner))
}

pub fn start_with(config: OrchestratorConfig) -> (Orchestrator, Arc<Mutex<Vec<String>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    let mut bridge = Orchestrator::new(config, move |name| {
        sink.lock().unwrap().push(name.to_string());
    })
    .unwrap();
    bridge.start().unwrap();
    (bridge, requests)
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Whether `pid` names a process, zombies included.
pub fn alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Panic unless every pid is gone, reaped included, within [`WAIT`].
pub fn assert_gone(pids: &Mutex<Vec<u32>>) {
    let pids = pids.lock().unwrap().clone();
    assert!(!pids.is_empty(), "no viewer was spawned");
    let deadline = Instant::now() + WAIT;
    for pid in pids {
        while alive(pid) {
            assert!(Instant::now() < deadline, "viewer {pid} is still present");
            thread::sleep(Duration::from_millis(20));
        }
    }
}
