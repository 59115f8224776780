//! The janitor: a single blocking loop that ticks every slot's TTL
//! countdown once a second, tombstoning anything that reaches zero.
//!
//! No async runtime, no tokio — one OS process doing `sem_wait`,
//! `table.tick()`, `sem_post`, `sleep(1)`, forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use ttlcached_config::Config;
use ttlcached_telemetry::metrics;

use crate::error::{CacheError, CacheResult};
use crate::lock::NamedLock;
use crate::shm::SharedRegion;
use crate::table::Table;

/// How often the janitor sweeps the table for expired entries.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Set by the `SIGINT`/`SIGTERM` handler the supervisor uses to ask the
/// janitor to stop; checked once per tick.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> CacheResult<()> {
    let action = SigAction::new(SigHandler::Handler(request_shutdown), SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).map_err(|e| CacheError::ForkFailure { reason: format!("sigaction(SIGINT): {e}") })?;
        signal::sigaction(Signal::SIGTERM, &action).map_err(|e| CacheError::ForkFailure { reason: format!("sigaction(SIGTERM): {e}") })?;
    }
    Ok(())
}

/// Run the janitor loop. Only returns on a fatal startup or lock error,
/// or once `SHUTDOWN` is observed after the supervisor signals this
/// process — a lock-acquisition failure mid-loop is logged and treated
/// as fatal too, since there is no partial-sweep state worth preserving.
pub fn run(config: Config) -> CacheResult<()> {
    tracing::info!("janitor starting");
    install_signal_handlers()?;

    let mut region = SharedRegion::open(&config.shm_name, config.region_bytes)?;
    let lock = NamedLock::open(&config.sem_name)?;

    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            tracing::info!(metrics = %metrics::encode_metrics(), "janitor shutting down");
            return Ok(());
        }

        let occupancy = lock.with_lock(|| {
            let mut table = Table::new(region.as_mut_slice(), &config);
            table.tick();
            table.occupancy()
        })?;

        metrics::TABLE_OCCUPANCY.set(occupancy as f64);

        std::thread::sleep(TICK_INTERVAL);
    }
}
