// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Worker process launch and termination
//!
//! Rules:
//!   - the argument list handed to the worker binary is a compatibility
//!     contract with redis-server and must keep its exact shape
//!   - the child is pinned to its assigned core after fork, before exec
//!   - stdout and stderr both append to the worker's own log file
//!   - termination is graceful first (SIGTERM plus a grace period), then
//!     escalates to SIGKILL

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time;
use tracing::debug;

use crate::placement::WorkerSpec;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to open log file {path}: {source}")]
    LogRedirect { path: PathBuf, source: io::Error },
    #[error("failed to spawn {binary}: {source}")]
    Spawn { binary: String, source: io::Error },
}

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: i32, source: nix::Error },
    #[error("failed to reap worker: {0}")]
    Reap(#[from] io::Error),
}

/// How a worker left the host during shutdown.
#[derive(Debug)]
pub enum TermOutcome {
    /// Exited on its own within the grace period.
    Exited(ExitStatus),
    /// Had to be killed after the grace period expired.
    Killed,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub binary: String,
    pub max_memory: String,
}

/// The fixed argument list of the worker binary.
///
/// Flag names, values, and their order are what existing redis-server
/// binaries accept: unix socket (when assigned) with permission mode 700,
/// port 0 to disable the TCP listener when a socket is used, a memory
/// ceiling, append-only persistence off, and snapshotting off (empty save
/// policy).
pub fn worker_args(spec: &WorkerSpec, max_memory: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(12);
    if let Some(socket) = &spec.socket_path {
        args.push("--unixsocket".into());
        args.push(socket.clone().into_os_string());
        args.push("--unixsocketperm".into());
        args.push("700".into());
    }
    args.push("--port".into());
    if spec.socket_path.is_some() {
        args.push("0".into());
    } else {
        args.push(spec.port.to_string().into());
    }
    args.push("--maxmemory".into());
    args.push(max_memory.into());
    args.push("--appendonly".into());
    args.push("no".into());
    args.push("--save".into());
    args.push("".into());
    args
}

/// Spawn one worker for its placement entry.
///
/// The child is pinned to `spec.cpu` between fork and exec; a failed pin
/// aborts only that child and is reported here as a spawn failure. The
/// caller owns the returned handle and is responsible for verification.
pub fn launch(spec: &WorkerSpec, opts: &LaunchOptions) -> Result<Child, LaunchError> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_path)
        .map_err(|source| LaunchError::LogRedirect {
            path: spec.log_path.clone(),
            source,
        })?;
    let log_err = log.try_clone().map_err(|source| LaunchError::LogRedirect {
        path: spec.log_path.clone(),
        source,
    })?;

    let mut command = Command::new(&opts.binary);
    command
        .args(worker_args(spec, &opts.max_memory))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);

    let cpu = spec.cpu;
    // Runs in the child after fork, before exec.
    unsafe {
        command.pre_exec(move || {
            let mut cpus = CpuSet::new();
            cpus.set(cpu).map_err(io::Error::from)?;
            sched_setaffinity(Pid::from_raw(0), &cpus).map_err(io::Error::from)?;
            Ok(())
        });
    }

    debug!(binary = %opts.binary, cpu, log = %spec.log_path.display(), "spawning worker");
    command.spawn().map_err(|source| LaunchError::Spawn {
        binary: opts.binary.clone(),
        source,
    })
}

/// Ask the worker to exit, granting it `grace` to do so before SIGKILL.
///
/// An already-exited child is reaped and reported as `Exited` without being
/// signalled again.
pub async fn terminate(child: &mut Child, grace: Duration) -> Result<TermOutcome, ShutdownError> {
    if let Some(status) = child.try_wait()? {
        return Ok(TermOutcome::Exited(status));
    }

    match child.id() {
        Some(pid) => {
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|source| {
                ShutdownError::Signal {
                    pid: pid as i32,
                    source,
                }
            })?;
            match time::timeout(grace, child.wait()).await {
                Ok(status) => Ok(TermOutcome::Exited(status?)),
                Err(_) => {
                    child.start_kill()?;
                    child.wait().await?;
                    Ok(TermOutcome::Killed)
                }
            }
        }
        None => Ok(TermOutcome::Exited(child.wait().await?)),
    }
}
