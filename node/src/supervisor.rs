//! Lifecycle of a locally spawned zipd process.
//!
//! The supervisor clears out a daemon left behind by an unclean shutdown,
//! launches the configured executable, relaunches it whenever it exits
//! while the service is running and interrupts it on stop.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zipcore_types::network::PID_FILE_NAME;
use zipcore_types::Network;

use crate::daemon_conf::SpawnConfiguration;
use crate::events::{EventBus, ServiceEvent};
use crate::metrics::ServiceMetrics;
use crate::node_record::NodeRecord;
use crate::shutdown::ShutdownController;
use crate::tip::TipTracker;
use crate::NodeError;

/// Connection attempts before start-up gives up on a daemon.
pub const START_RETRIES: u32 = 60;

/// Exit state of the current process: `None` while running, then the exit
/// code (`None` inside when killed by a signal).
type ExitState = Option<Option<i32>>;

#[derive(Clone, Copy, Debug)]
pub struct SupervisorTiming {
    pub spawn_restart_time: Duration,
    pub spawn_stop_time: Duration,
    pub shutdown_timeout: Duration,
}

struct RunningDaemon {
    pid: Arc<Mutex<Option<u32>>>,
    exit: watch::Receiver<ExitState>,
    watcher: JoinHandle<()>,
}

pub struct Supervisor {
    network: Network,
    timing: SupervisorTiming,
    shutdown: Arc<ShutdownController>,
    events: Arc<EventBus>,
    metrics: Arc<ServiceMetrics>,
    running: Mutex<Option<RunningDaemon>>,
    respawned: Arc<watch::Sender<u64>>,
}

impl Supervisor {
    pub fn new(
        network: Network,
        timing: SupervisorTiming,
        shutdown: Arc<ShutdownController>,
        events: Arc<EventBus>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            network,
            timing,
            shutdown,
            events,
            metrics,
            running: Mutex::new(None),
            respawned: Arc::new(watch::channel(0).0),
        }
    }

    /// Ticks once per successful relaunch of the spawned daemon.
    pub fn subscribe_respawns(&self) -> watch::Receiver<u64> {
        self.respawned.subscribe()
    }

    /// Pid of the running daemon, if one was spawned and is alive.
    pub fn pid(&self) -> Option<u32> {
        let running = self.running.lock().ok()?;
        let daemon = running.as_ref()?;
        let pid = daemon.pid.lock().ok()?;
        *pid
    }

    pub fn pid_file(&self, datadir: &Path) -> PathBuf {
        match self.network.data_subdir() {
            Some(dir) => datadir.join(dir).join(PID_FILE_NAME),
            None => datadir.join(PID_FILE_NAME),
        }
    }

    /// Interrupt a daemon still recorded in the pid file and wait until it
    /// removes the file.
    pub async fn stop_stale_daemon(&self, datadir: &Path) -> Result<(), NodeError> {
        let pid_path = self.pid_file(datadir);
        let Some(pid) = read_pid(&pid_path).await? else {
            return Ok(());
        };

        warn!(pid, path = %pid_path.display(), "unclean zipd process shutdown detected, stopping previous process");
        if !send_sigint(pid)? {
            warn!(pid, "previous zipd process not found, removing stale pid file");
            match tokio::fs::remove_file(&pid_path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.timing.spawn_stop_time) => {}
            }
            match tokio::fs::metadata(&pid_path).await {
                Ok(_) => debug!(pid, "waiting for previous zipd process to exit"),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Launch the daemon described by `spawn` and keep it running.
    pub async fn spawn(&self, spawn: &SpawnConfiguration) -> Result<(), NodeError> {
        self.stop_stale_daemon(&spawn.datadir).await?;
        if self.shutdown.is_stopping() {
            return Err(NodeError::Startup(
                "Stopping while trying to spawn zipd".into(),
            ));
        }

        let exec = spawn.exec.clone();
        let args = spawn.args(self.network);
        let child = launch(&exec, &args)?;
        info!(exec = %exec.display(), pid = ?child.id(), "spawned zipd");

        let pid = Arc::new(Mutex::new(child.id()));
        let (exit_tx, exit_rx) = watch::channel(None);
        let watcher = tokio::spawn(watch_daemon(
            child,
            Relauncher {
                exec,
                args,
                pid: Arc::clone(&pid),
                exit: exit_tx,
                restart: self.timing.spawn_restart_time,
                respawned: Arc::clone(&self.respawned),
                shutdown: Arc::clone(&self.shutdown),
                events: Arc::clone(&self.events),
                metrics: Arc::clone(&self.metrics),
            },
        ));

        let previous = self.running.lock().ok().and_then(|mut r| {
            r.replace(RunningDaemon {
                pid,
                exit: exit_rx,
                watcher,
            })
        });
        if let Some(previous) = previous {
            previous.watcher.abort();
        }
        Ok(())
    }

    /// Interrupt the spawned daemon and wait for it to exit. Succeeds at
    /// once when nothing was spawned.
    pub async fn stop(&self) -> Result<(), NodeError> {
        let Some(running) = self.running.lock().ok().and_then(|mut r| r.take()) else {
            return Ok(());
        };
        let Some(pid) = running.pid.lock().ok().and_then(|p| *p) else {
            running.watcher.abort();
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| NodeError::process(format!("invalid zipd pid {pid}")))?;

        info!(pid, "stopping zipd");
        send_sigint(pid)?;

        let mut exit = running.exit;
        let waited = tokio::time::timeout(
            self.timing.shutdown_timeout,
            exit.wait_for(|state| state.is_some()),
        )
        .await;

        let code = match waited {
            Err(_) => return Err(NodeError::process("Spawned process did not exit")),
            // watcher gone, nothing left to wait for
            Ok(Err(_)) => return Ok(()),
            Ok(Ok(state)) => (*state).flatten(),
        };

        match code {
            Some(0) => {
                info!(pid, "zipd exited");
                Ok(())
            }
            Some(code) => Err(NodeError::Process {
                message: format!("zipd process exited with code {code}"),
                code: Some(code),
            }),
            None => Err(NodeError::process("zipd process was terminated by a signal")),
        }
    }
}

struct Relauncher {
    exec: PathBuf,
    args: Vec<String>,
    pid: Arc<Mutex<Option<u32>>>,
    exit: watch::Sender<ExitState>,
    restart: Duration,
    respawned: Arc<watch::Sender<u64>>,
    shutdown: Arc<ShutdownController>,
    events: Arc<EventBus>,
    metrics: Arc<ServiceMetrics>,
}

impl Relauncher {
    fn set_pid(&self, pid: Option<u32>) {
        if let Ok(mut current) = self.pid.lock() {
            *current = pid;
        }
    }
}

async fn watch_daemon(mut child: Child, ctx: Relauncher) {
    loop {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "failed waiting on zipd process");
                None
            }
        };
        ctx.set_pid(None);
        ctx.exit.send_replace(Some(code));

        if ctx.shutdown.is_stopping() {
            return;
        }
        warn!(?code, "zipd process exited unexpectedly, restarting");
        tokio::select! {
            _ = ctx.shutdown.cancelled() => return,
            _ = tokio::time::sleep(ctx.restart) => {}
        }

        match launch(&ctx.exec, &ctx.args) {
            Ok(next) => {
                ctx.metrics.daemon_respawns.inc();
                info!(pid = ?next.id(), "respawned zipd");
                ctx.set_pid(next.id());
                ctx.exit.send_replace(None);
                ctx.respawned.send_modify(|count| *count += 1);
                child = next;
            }
            Err(e) => {
                error!(error = %e, "failed to respawn zipd");
                ctx.events.emit(&ServiceEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

fn launch(exec: &Path, args: &[String]) -> Result<Child, NodeError> {
    Command::new(exec)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| NodeError::process(format!("failed to spawn {}: {e}", exec.display())))
}

/// Pid recorded in `path`. Missing, empty or unparsable files yield `None`.
async fn read_pid(path: &Path) -> Result<Option<i32>, NodeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text.trim().parse::<i32>().ok().filter(|pid| *pid > 0)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Send SIGINT to `pid`. Returns `false` when no such process exists.
#[cfg(unix)]
fn send_sigint(pid: i32) -> Result<bool, NodeError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGINT) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(NodeError::process(format!("failed to signal zipd ({pid}): {e}"))),
    }
}

#[cfg(not(unix))]
fn send_sigint(pid: i32) -> Result<bool, NodeError> {
    Err(NodeError::process(format!(
        "cannot interrupt zipd ({pid}) on this platform"
    )))
}

/// Load the tip from `node` until it answers, at most [`START_RETRIES`]
/// times `interval` apart.
pub async fn verify_connection(
    tip: &TipTracker,
    node: &NodeRecord,
    shutdown: &ShutdownController,
    interval: Duration,
) -> Result<(), NodeError> {
    let stopping = || NodeError::Startup("Stopping while trying to connect to zipd".into());
    let mut last_error = None;

    for attempt in 1..=START_RETRIES {
        if shutdown.is_stopping() {
            return Err(stopping());
        }
        match tip.load_tip_from_node(node).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(attempt, error = %e, "zipd not ready yet");
                last_error = Some(e);
            }
        }
        if attempt < START_RETRIES {
            tokio::select! {
                _ = shutdown.cancelled() => return Err(stopping()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(NodeError::Startup(format!(
        "could not connect to zipd after {START_RETRIES} attempts: {reason}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSet;
    use crate::pool::NodePool;
    use serde_json::json;
    use zipcore_nullables::NullRpc;

    const STALE_PID: i32 = 0x3fff_fff0;

    fn timing() -> SupervisorTiming {
        SupervisorTiming {
            spawn_restart_time: Duration::from_millis(50),
            spawn_stop_time: Duration::from_millis(10),
            shutdown_timeout: Duration::from_millis(3000),
        }
    }

    fn supervisor(network: Network) -> (Supervisor, Arc<ShutdownController>, Arc<ServiceMetrics>) {
        let shutdown = Arc::new(ShutdownController::new());
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let supervisor = Supervisor::new(
            network,
            timing(),
            shutdown.clone(),
            Arc::new(EventBus::new()),
            metrics.clone(),
        );
        (supervisor, shutdown, metrics)
    }

    #[test]
    fn pid_file_follows_network() {
        let (livenet, _, _) = supervisor(Network::Livenet);
        let (testnet, _, _) = supervisor(Network::Testnet);
        let dir = Path::new("/data");
        assert_eq!(livenet.pid_file(dir), Path::new("/data/zipd.pid"));
        assert_eq!(testnet.pid_file(dir), Path::new("/data/testnet3/zipd.pid"));
    }

    #[tokio::test]
    async fn missing_pid_file_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _, _) = supervisor(Network::Livenet);
        sup.stop_stale_daemon(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn blank_or_garbage_pid_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _, _) = supervisor(Network::Livenet);
        for content in ["", "     ", "abc"] {
            std::fs::write(dir.path().join(PID_FILE_NAME), content).unwrap();
            sup.stop_stale_daemon(dir.path()).await.unwrap();
            assert!(dir.path().join(PID_FILE_NAME).exists());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn vanished_process_removes_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(PID_FILE_NAME);
        std::fs::write(&pid_file, STALE_PID.to_string()).unwrap();
        let (sup, _, _) = supervisor(Network::Livenet);
        sup.stop_stale_daemon(dir.path()).await.unwrap();
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn stop_without_spawn_succeeds() {
        let (sup, _, _) = supervisor(Network::Livenet);
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_refused_while_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, shutdown, _) = supervisor(Network::Livenet);
        shutdown.shutdown();
        let spawn = spawn_config(dir.path(), Path::new("/nonexistent/zipd"));
        let err = sup.spawn(&spawn).await.unwrap_err();
        assert_eq!(err.to_string(), "Stopping while trying to spawn zipd");
    }

    #[tokio::test]
    async fn spawn_failure_is_a_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _, _) = supervisor(Network::Livenet);
        let spawn = spawn_config(dir.path(), &dir.path().join("missing-zipd"));
        let err = sup.spawn(&spawn).await.unwrap_err();
        assert!(matches!(err, NodeError::Process { .. }));
    }

    fn spawn_config(datadir: &Path, exec: &Path) -> SpawnConfiguration {
        SpawnConfiguration {
            datadir: datadir.to_path_buf(),
            exec: exec.to_path_buf(),
            config_path: datadir.join("zip.conf"),
            conf: Default::default(),
            reindex: false,
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-zipd");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawns_with_conf_and_datadir_then_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(
            dir.path(),
            "echo \"$@\" > \"$(dirname \"$0\")/args.txt\"\ntrap 'exit 0' INT\nwhile true; do sleep 0.1; done",
        );
        let (sup, shutdown, _) = supervisor(Network::Testnet);
        sup.spawn(&spawn_config(dir.path(), &exec)).await.unwrap();
        assert!(sup.pid().is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(
            args.trim(),
            format!(
                "--conf={} --datadir={} --testnet",
                dir.path().join("zip.conf").display(),
                dir.path().display()
            )
        );

        shutdown.shutdown();
        sup.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_on_stop_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "trap 'exit 3' INT\nwhile true; do sleep 0.1; done");
        let (sup, shutdown, _) = supervisor(Network::Livenet);
        sup.spawn(&spawn_config(dir.path(), &exec)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown.shutdown();
        let err = sup.stop().await.unwrap_err();
        assert!(matches!(err, NodeError::Process { code: Some(3), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_times_out_when_process_ignores_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "trap '' INT\nwhile true; do sleep 0.1; done");
        let shutdown = Arc::new(ShutdownController::new());
        let sup = Supervisor::new(
            Network::Livenet,
            SupervisorTiming {
                shutdown_timeout: Duration::from_millis(300),
                ..timing()
            },
            shutdown.clone(),
            Arc::new(EventBus::new()),
            Arc::new(ServiceMetrics::new().unwrap()),
        );
        sup.spawn(&spawn_config(dir.path(), &exec)).await.unwrap();
        let pid = sup.pid().unwrap() as i32;
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown.shutdown();
        let err = sup.stop().await.unwrap_err();
        assert_eq!(err.to_string(), "Spawned process did not exit");

        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_daemon_is_respawned_until_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "exit 1");
        let (sup, shutdown, metrics) = supervisor(Network::Livenet);
        sup.spawn(&spawn_config(dir.path(), &exec)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(metrics.daemon_respawns.get() >= 1);

        shutdown.shutdown();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let settled = metrics.daemon_respawns.get();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(metrics.daemon_respawns.get(), settled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relaunch_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "sleep 0.1\nexit 1");
        let (sup, shutdown, _) = supervisor(Network::Livenet);
        let mut respawns = sup.subscribe_respawns();
        sup.spawn(&spawn_config(dir.path(), &exec)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(3), respawns.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*respawns.borrow() >= 1);

        shutdown.shutdown();
        sup.stop().await.ok();
    }

    fn tip_for(rpc: Arc<NullRpc>) -> (TipTracker, NodeRecord, Arc<ShutdownController>) {
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let shutdown = Arc::new(ShutdownController::new());
        let node = NodeRecord::new(rpc, Duration::from_millis(10000), Duration::from_millis(15000));
        let tip = TipTracker::new(
            Arc::new(NodePool::new(Duration::from_millis(1000), metrics.clone())),
            Arc::new(CacheSet::new(metrics.clone())),
            Arc::new(EventBus::new()),
            shutdown.clone(),
            metrics,
        );
        (tip, node, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn verify_connection_gives_up_after_sixty_attempts() {
        let rpc = Arc::new(NullRpc::new());
        rpc.set_error("getbestblockhash", -28, "Loading block index...");
        let (tip, node, shutdown) = tip_for(rpc.clone());

        let err = verify_connection(&tip, &node, &shutdown, Duration::from_millis(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Startup(_)));
        assert_eq!(rpc.call_count("getbestblockhash"), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_connection_succeeds_after_warmup() {
        let rpc = Arc::new(NullRpc::new());
        rpc.push_error("getbestblockhash", -28, "Verifying blocks...")
            .set_result("getbestblockhash", json!("00ab"))
            .set_result("getblock", json!({ "hash": "00ab", "height": 42, "tx": [] }));
        let (tip, node, shutdown) = tip_for(rpc.clone());

        verify_connection(&tip, &node, &shutdown, Duration::from_millis(5000))
            .await
            .unwrap();
        assert_eq!(tip.height(), 42);
        assert_eq!(rpc.call_count("getbestblockhash"), 2);
    }

    #[tokio::test]
    async fn verify_connection_aborts_when_stopping() {
        let rpc = Arc::new(NullRpc::new());
        let (tip, node, shutdown) = tip_for(rpc);
        shutdown.shutdown();
        let err = verify_connection(&tip, &node, &shutdown, Duration::from_millis(5000))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Stopping while trying to connect to zipd");
    }
}
