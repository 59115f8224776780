//! Process lifecycle: fork the worker pool and the janitor, hand each its
//! half of a control channel, and tear everything down on shutdown.
//!
//! Forking happens from `main` before any `tokio` runtime exists, so each
//! child is free to build its own runtime without ever having inherited
//! one across `fork`.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use ttlcached_config::Config;

use crate::error::{CacheError, CacheResult};
use crate::ipc;

/// A forked child the supervisor is responsible for tearing down.
struct Child {
    pid: Pid,
    /// Present only for workers — the acceptor's end of that worker's
    /// control channel. `None` for the janitor, which has no channel.
    control_fd: Option<OwnedFd>,
}

/// Owns every forked worker and the janitor, and the acceptor-side
/// control channels used to hand off client descriptors.
pub struct Supervisor {
    workers: Vec<Child>,
    janitor: Option<Child>,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor { workers: Vec::new(), janitor: None }
    }

    /// Fork `config.workers` worker processes. Must be called before any
    /// `tokio` runtime is built in this process.
    pub fn spawn_workers(&mut self, config: &Config) -> CacheResult<()> {
        for i in 0..config.workers {
            let (parent_fd, child_fd) = ipc::channel_pair()?;

            // SAFETY: called before any thread pool or async runtime
            // exists in this process, so the child starts single-threaded.
            match unsafe { fork() }.map_err(|e| CacheError::ForkFailure { reason: e.to_string() })? {
                ForkResult::Parent { child } => {
                    drop(child_fd);
                    tracing::info!(worker_id = i, pid = child.as_raw(), "worker forked");
                    self.workers.push(Child { pid: child, control_fd: Some(parent_fd) });
                }
                ForkResult::Child => {
                    drop(parent_fd);
                    let exit_code = match crate::worker::run(i, child_fd, config.clone()) {
                        Ok(()) => 0,
                        Err(e) => {
                            tracing::error!(worker_id = i, error = %e, "worker exited with an error");
                            1
                        }
                    };
                    std::process::exit(exit_code);
                }
            }
        }
        Ok(())
    }

    /// Fork the janitor. Must be called before any `tokio` runtime is
    /// built in this process.
    pub fn spawn_janitor(&mut self, config: &Config) -> CacheResult<()> {
        // SAFETY: see `spawn_workers`.
        match unsafe { fork() }.map_err(|e| CacheError::ForkFailure { reason: e.to_string() })? {
            ForkResult::Parent { child } => {
                tracing::info!(pid = child.as_raw(), "janitor forked");
                self.janitor = Some(Child { pid: child, control_fd: None });
            }
            ForkResult::Child => {
                let exit_code = match crate::janitor::run(config.clone()) {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::error!(error = %e, "janitor exited with an error");
                        1
                    }
                };
                std::process::exit(exit_code);
            }
        }
        Ok(())
    }

    /// Raw descriptors of every worker's control channel, in spawn order
    /// — the acceptor indexes into this to dispatch a client.
    pub fn worker_channels(&self) -> Vec<RawFd> {
        self.workers.iter().filter_map(|w| w.control_fd.as_ref()).map(|fd| fd.as_raw_fd()).collect()
    }

    /// Signal every child to exit and reap them: send `SIGINT` to every
    /// worker and the janitor, then wait for each.
    pub fn shutdown(&mut self) {
        for child in self.workers.iter().chain(self.janitor.iter()) {
            if let Err(e) = signal::kill(child.pid, Signal::SIGINT) {
                tracing::warn!(pid = child.pid.as_raw(), error = %e, "failed to signal child");
            }
        }
        for child in self.workers.iter().chain(self.janitor.iter()) {
            match waitpid(child.pid, None) {
                Ok(WaitStatus::Exited(pid, code)) => tracing::info!(pid = pid.as_raw(), code, "child exited"),
                Ok(status) => tracing::info!(?status, "child reaped"),
                Err(e) => tracing::warn!(pid = child.pid.as_raw(), error = %e, "waitpid failed"),
            }
        }
        self.workers.clear();
        self.janitor = None;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
