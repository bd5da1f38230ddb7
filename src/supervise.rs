// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The supervisor owns the placement table and every worker handle, and
//! drives the whole lifecycle from one control task.
//!
//! Rules:
//!   - workers are launched, verified, polled, and terminated strictly in
//!     index order
//!   - a worker only reaches `Running` after exactly one `Alive` probe
//!   - a startup failure aborts the run and tears down whatever was launched
//!   - a polling failure is logged and the loop continues
//!   - SIGINT and SIGTERM are observed at the loop's await points, never
//!     inside a signal handler, and both take the same shutdown path
//!   - shutdown is idempotent and skips workers that never got a process

use std::time::Duration;

use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time;
use tracing::{debug, info, warn};

use crate::launch::{self, LaunchOptions, TermOutcome};
use crate::placement::{self, ConfigError, LaunchParameters, WorkerSpec};
use crate::probe::{self, ProbeResult};
use crate::{Error, ErrorKind};

/// Lifecycle of a single worker, driven only by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unlaunched,
    Launched,
    Verified,
    Running,
    Terminating,
    Terminated,
    /// Liveness verification failed after launch.
    Failed,
}

/// One supervised worker: its placement, its process (once spawned), and
/// where it is in its lifecycle.
#[derive(Debug)]
pub struct WorkerHandle {
    spec: WorkerSpec,
    child: Option<Child>,
    state: WorkerState,
}

impl WorkerHandle {
    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

/// Phase of the supervisor's own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Launching,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SuperviseConfig {
    /// Delay between poll rounds.
    pub poll_interval: Duration,
    /// Stop after this many poll rounds; `None` runs until signalled.
    pub rounds: Option<u64>,
    /// Upper bound on a single probe exchange.
    pub probe_timeout: Duration,
    /// Time a worker gets to exit after SIGTERM before SIGKILL.
    pub grace: Duration,
    /// Readiness probing after spawn: attempts and initial backoff.
    pub ready_attempts: u32,
    pub ready_backoff: Duration,
}

impl Default for SuperviseConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            rounds: None,
            probe_timeout: Duration::from_secs(2),
            grace: Duration::from_secs(5),
            ready_attempts: 20,
            ready_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
pub struct Supervisor {
    config: SuperviseConfig,
    launcher: LaunchOptions,
    handles: Vec<WorkerHandle>,
    phase: Phase,
}

impl Supervisor {
    /// Resolve placement and build the worker table. Nothing is spawned yet,
    /// so a configuration error needs no cleanup.
    pub fn new(params: LaunchParameters, config: SuperviseConfig) -> Result<Self, ConfigError> {
        let specs = placement::resolve(&params)?;
        let handles = specs
            .into_iter()
            .map(|spec| WorkerHandle {
                spec,
                child: None,
                state: WorkerState::Unlaunched,
            })
            .collect();

        Ok(Self {
            config,
            launcher: LaunchOptions {
                binary: params.worker_binary,
                max_memory: params.max_memory,
            },
            handles,
            phase: Phase::Idle,
        })
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the full lifecycle: launch and verify every worker, poll until
    /// the round limit or a termination signal, then shut everything down.
    /// Shutdown also runs when a launch or verification failure aborts the
    /// run partway through.
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let result = tokio::select! {
            result = self.supervise() => result,
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down");
                Ok(())
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                Ok(())
            }
        };

        self.shutdown().await;
        result
    }

    async fn supervise(&mut self) -> Result<(), Error> {
        self.phase = Phase::Launching;
        self.launch_all().await?;
        self.phase = Phase::Running;
        self.poll().await;
        Ok(())
    }

    /// Launch and verify workers sequentially in index order; sequential
    /// launching keeps affinity assignment deterministic and bounds startup
    /// resource usage. The first bad worker aborts the run.
    async fn launch_all(&mut self) -> Result<(), Error> {
        for i in 0..self.handles.len() {
            let spec = self.handles[i].spec.clone();

            let child = match launch::launch(&spec, &self.launcher) {
                Ok(child) => child,
                Err(err) => {
                    self.handles[i].state = WorkerState::Failed;
                    return Err(err.into());
                }
            };
            let pid = child.id();
            self.handles[i].child = Some(child);
            self.handles[i].state = WorkerState::Launched;
            info!(worker = i, cpu = spec.cpu, pid, "worker launched");

            let result = probe::wait_ready(
                &spec.endpoint(),
                self.config.probe_timeout,
                self.config.ready_attempts,
                self.config.ready_backoff,
            )
            .await;
            match result {
                ProbeResult::Alive => {
                    self.handles[i].state = WorkerState::Verified;
                    debug!(worker = i, "worker verified");
                    self.handles[i].state = WorkerState::Running;
                }
                result => {
                    self.handles[i].state = WorkerState::Failed;
                    return Err(ErrorKind::Verification { worker: i, result }.into());
                }
            }
        }
        Ok(())
    }

    /// Repeating liveness poll over all workers in index order. A single
    /// worker's failure is logged and never stops the rest of the round.
    async fn poll(&mut self) {
        let mut round: u64 = 0;
        loop {
            if let Some(max) = self.config.rounds {
                if round >= max {
                    info!(rounds = max, "poll round limit reached");
                    return;
                }
            }
            time::sleep(self.config.poll_interval).await;
            round += 1;
            debug!(round, "polling workers");

            for handle in &self.handles {
                let result = probe::probe(&handle.spec.endpoint(), self.config.probe_timeout).await;
                match result {
                    ProbeResult::Alive => debug!(worker = handle.spec.index, "worker alive"),
                    result => warn!(worker = handle.spec.index, %result, "liveness poll failed"),
                }
            }
        }
    }

    /// Terminate every worker that has a process, in index order, then
    /// release the per-worker socket files. Safe to call repeatedly; a
    /// second invocation on a stopped supervisor is a no-op.
    pub async fn shutdown(&mut self) {
        if matches!(self.phase, Phase::Stopped) {
            return;
        }
        self.phase = Phase::ShuttingDown;

        for handle in &mut self.handles {
            let Some(child) = handle.child.as_mut() else {
                // never launched, nothing to signal
                continue;
            };
            let failed = matches!(handle.state, WorkerState::Failed);
            if !failed {
                handle.state = WorkerState::Terminating;
            }
            info!(worker = handle.spec.index, pid = child.id(), "terminating worker");

            match launch::terminate(child, self.config.grace).await {
                Ok(TermOutcome::Exited(status)) => {
                    info!(worker = handle.spec.index, ?status, "worker exited")
                }
                Ok(TermOutcome::Killed) => warn!(
                    worker = handle.spec.index,
                    "worker did not exit within the grace period, killed"
                ),
                Err(err) => warn!(
                    worker = handle.spec.index,
                    error = %err,
                    "failed to terminate worker"
                ),
            }
            handle.child = None;
            if !failed {
                handle.state = WorkerState::Terminated;
            }
            if let Some(socket) = &handle.spec.socket_path {
                // the worker usually unlinks its own socket; this is cleanup
                // for the unclean exits
                let _ = std::fs::remove_file(socket);
            }
        }

        self.phase = Phase::Stopped;
        info!("all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    fn params(workers: usize, dir: &Path, binary: &str) -> LaunchParameters {
        LaunchParameters {
            workers,
            start_port: 6380,
            socket_dir: Some(dir.to_path_buf()),
            output_dir: dir.to_path_buf(),
            worker_binary: binary.to_owned(),
            max_memory: "4gb".to_owned(),
        }
    }

    fn quick_config() -> SuperviseConfig {
        SuperviseConfig {
            poll_interval: Duration::from_millis(10),
            rounds: Some(0),
            probe_timeout: Duration::from_millis(200),
            grace: Duration::from_millis(500),
            ready_attempts: 2,
            ready_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn new_builds_one_handle_per_worker() {
        let dir = tempdir().unwrap();
        let count = placement::online_cpus().min(2);
        let supervisor =
            Supervisor::new(params(count, dir.path(), "redis-server"), quick_config()).unwrap();

        assert_eq!(supervisor.phase(), Phase::Idle);
        assert_eq!(supervisor.handles().len(), count);
        for handle in supervisor.handles() {
            assert_eq!(handle.state(), WorkerState::Unlaunched);
            assert_eq!(handle.pid(), None);
        }
    }

    #[test]
    fn new_rejects_invalid_configuration() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut params = params(1, dir.path(), "redis-server");
        params.output_dir = missing.clone();
        let err = Supervisor::new(params, quick_config()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidDirectory(missing));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_skips_unlaunched_workers() {
        let dir = tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(params(1, dir.path(), "redis-server"), quick_config()).unwrap();

        supervisor.shutdown().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);
        assert_eq!(supervisor.handles()[0].state(), WorkerState::Unlaunched);

        // Second invocation must be a no-op.
        supervisor.shutdown().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);
        assert_eq!(supervisor.handles()[0].state(), WorkerState::Unlaunched);
    }

    #[tokio::test]
    async fn run_without_workers_completes_cleanly() {
        let dir = tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(params(0, dir.path(), "redis-server"), quick_config()).unwrap();

        supervisor.run().await.unwrap();
        assert_eq!(supervisor.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn failed_verification_aborts_the_run() {
        let dir = tempdir().unwrap();
        // `true` spawns fine but never binds a listener, so verification
        // must fail and abort the run.
        let mut supervisor =
            Supervisor::new(params(1, dir.path(), "true"), quick_config()).unwrap();

        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Verification { worker: 0, .. }
        ));
        assert_eq!(supervisor.handles()[0].state(), WorkerState::Failed);
        assert_eq!(supervisor.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn poll_failure_does_not_block_later_workers() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempdir().unwrap();
        // Worker 0's socket is never bound; worker 1 answers normally.
        let dead = dir.path().join("worker_0.sock");
        let live = dir.path().join("worker_1.sock");
        let listener = tokio::net::UnixListener::bind(&live).unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            stream.read(&mut buf).await.unwrap();
            stream.write_all(b"+PONG\r\n").await.unwrap();
        });

        let mut config = quick_config();
        config.rounds = Some(1);
        let handles = [dead, live]
            .into_iter()
            .enumerate()
            .map(|(index, socket)| WorkerHandle {
                spec: WorkerSpec {
                    index,
                    cpu: index,
                    port: 0,
                    socket_path: Some(socket),
                    log_path: dir.path().join(format!("worker_{index}.log")),
                },
                child: None,
                state: WorkerState::Running,
            })
            .collect();
        let mut supervisor = Supervisor {
            config,
            launcher: LaunchOptions {
                binary: "redis-server".to_owned(),
                max_memory: "4gb".to_owned(),
            },
            handles,
            phase: Phase::Running,
        };

        supervisor.poll().await;

        // Worker 1 must have been probed despite worker 0's failure, and no
        // state may have moved off Running.
        server.await.unwrap();
        assert!(supervisor
            .handles()
            .iter()
            .all(|handle| handle.state() == WorkerState::Running));
    }

    #[tokio::test]
    async fn launch_failure_aborts_the_run() {
        let dir = tempdir().unwrap();
        let mut supervisor = Supervisor::new(
            params(1, dir.path(), "corral-no-such-worker-binary"),
            quick_config(),
        )
        .unwrap();

        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Launch(_)));
        assert_eq!(supervisor.handles()[0].state(), WorkerState::Failed);
        assert_eq!(supervisor.phase(), Phase::Stopped);
    }
}
