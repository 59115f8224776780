//! ttlcached entry point.
//!
//! Deliberately synchronous: the acceptor and janitor never touch
//! `tokio` at all, and workers are `fork`ed from here *before* any async
//! runtime is built in this process — each worker builds its own
//! current-thread runtime only after it exists as its own process.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use ttlcached_config::Config;
use ttlcached_core::error::CacheError;
use ttlcached_core::{acceptor, lock::NamedLock, shm::SharedRegion, supervisor::Supervisor, CacheResult};

/// Set by the `SIGINT`/`SIGTERM` handler; checked by the acceptor loop
/// whenever `accept` is interrupted.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> CacheResult<()> {
    // No `SA_RESTART`: a blocking `accept()` must return `EINTR` so the
    // acceptor loop gets a chance to observe `SHUTDOWN`.
    let action = SigAction::new(SigHandler::Handler(request_shutdown), SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).map_err(|e| CacheError::ForkFailure { reason: format!("sigaction(SIGINT): {e}") })?;
        signal::sigaction(Signal::SIGTERM, &action).map_err(|e| CacheError::ForkFailure { reason: format!("sigaction(SIGTERM): {e}") })?;
    }
    Ok(())
}

fn main() -> CacheResult<()> {
    ttlcached_telemetry::init();

    let config = Config::load()?;
    tracing::info!(?config, "ttlcached starting");

    install_signal_handlers()?;

    // The acceptor creates and owns the shared resources for the whole
    // process lifetime, unlinking them only when these bindings drop at
    // the end of `main` — after every child has been signalled and
    // reaped below.
    let _region = SharedRegion::create(&config.shm_name, config.region_bytes)?;
    let _lock = NamedLock::create(&config.sem_name)?;

    let mut supervisor = Supervisor::new();
    supervisor.spawn_workers(&config)?;
    supervisor.spawn_janitor(&config)?;

    let worker_channels = supervisor.worker_channels();
    let listener = acceptor::bind(&config)?;

    let result = acceptor::run(&listener, &worker_channels, &SHUTDOWN);
    if let Err(ref e) = result {
        tracing::error!(error = %e, "acceptor loop exited with an error");
    }

    tracing::info!("shutting down");
    supervisor.shutdown();

    result
}
