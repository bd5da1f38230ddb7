// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Placement resolution
//!
//! Turns the launch parameters into a validated per-worker placement table:
//! one CPU core, one endpoint, and one log file per worker index. The table
//! is computed once at startup and never resized.

use std::path::PathBuf;

use thiserror::Error;

use crate::probe::Endpoint;

/// Hard cap on concurrently supervised workers.
pub const MAX_WORKERS: usize = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{requested} workers requested, limit is {limit}")]
    TooManyWorkers { requested: usize, limit: usize },
    #[error("not a directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error("ports {start}..{start}+{workers} are not a valid port range")]
    InvalidPortRange { start: u16, workers: usize },
}

/// Immutable launch parameters, fixed for the lifetime of a run.
///
/// When `socket_dir` is set, every worker listens on a unix socket beneath it
/// and disables its TCP listener; otherwise workers listen on consecutive TCP
/// ports starting at `start_port`.
#[derive(Debug, Clone)]
pub struct LaunchParameters {
    pub workers: usize,
    pub start_port: u16,
    pub socket_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub worker_binary: String,
    pub max_memory: String,
}

/// Placement of a single worker. Read-only after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// 0-based, stable identity of the worker.
    pub index: usize,
    /// CPU core the worker is pinned to, one worker per core.
    pub cpu: usize,
    /// Assigned TCP port; only used when no socket path is configured.
    pub port: u16,
    pub socket_path: Option<PathBuf>,
    pub log_path: PathBuf,
}

impl WorkerSpec {
    /// Probe endpoint of this worker. The unix socket takes precedence over
    /// the TCP port, matching the worker's own listener selection.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            socket: self.socket_path.clone(),
            port: self.port,
        }
    }
}

/// Number of CPU cores currently online.
pub fn online_cpus() -> usize {
    // SAFETY: sysconf only reads kernel-provided configuration values.
    let cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if cpus < 1 {
        1
    } else {
        cpus as usize
    }
}

/// Resolve the launch parameters into one `WorkerSpec` per index.
///
/// Fails if the worker count exceeds the hard cap or the online core count,
/// if the assigned ports do not fit in the port space, or if either directory
/// is missing. Beyond the directory existence checks this is a pure function
/// of its inputs.
pub fn resolve(params: &LaunchParameters) -> Result<Vec<WorkerSpec>, ConfigError> {
    if params.workers > MAX_WORKERS {
        return Err(ConfigError::TooManyWorkers {
            requested: params.workers,
            limit: MAX_WORKERS,
        });
    }

    if params.socket_dir.is_none() && params.start_port == 0 {
        return Err(ConfigError::InvalidPortRange {
            start: params.start_port,
            workers: params.workers,
        });
    }
    if params.start_port as usize + params.workers > u16::MAX as usize + 1 {
        return Err(ConfigError::InvalidPortRange {
            start: params.start_port,
            workers: params.workers,
        });
    }

    let cpus = online_cpus();
    if params.workers > cpus {
        return Err(ConfigError::TooManyWorkers {
            requested: params.workers,
            limit: cpus,
        });
    }

    for dir in params.socket_dir.iter().chain([&params.output_dir]) {
        if !dir.is_dir() {
            return Err(ConfigError::InvalidDirectory(dir.clone()));
        }
    }

    Ok((0..params.workers)
        .map(|index| WorkerSpec {
            index,
            cpu: index,
            port: params.start_port + index as u16,
            socket_path: params
                .socket_dir
                .as_ref()
                .map(|dir| dir.join(format!("worker_{index}.sock"))),
            log_path: params.output_dir.join(format!("worker_{index}.log")),
        })
        .collect())
}
