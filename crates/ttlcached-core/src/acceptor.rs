//! The acceptor: owns the listening TCP socket and fans accepted
//! connections out to workers.
//!
//! Single-threaded, blocking, synchronous — there is no async runtime in
//! this process at all. A plain blocking `accept` loop suffices since
//! nothing else runs in this process, so there is nothing to multiplex.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::os::fd::{IntoRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use ttlcached_config::Config;

use crate::error::{CacheError, CacheResult};
use crate::ipc;

/// Bind and listen on `config.listen_ip:config.listen_port`.
pub fn bind(config: &Config) -> CacheResult<TcpListener> {
    let addr = format!("{}:{}", config.listen_ip, config.listen_port);
    let listener = TcpListener::bind(&addr).map_err(|e| CacheError::BindError { addr: addr.clone(), reason: e.to_string() })?;
    tracing::info!(%addr, "acceptor listening");
    Ok(listener)
}

/// Accept connections forever, handing each one to a uniformly-random
/// worker's control channel. `worker_channels` are the acceptor's ends of
/// each worker's control socket pair, in worker order.
///
/// Checks `shutdown` whenever `accept` is interrupted by a signal
/// (`EINTR`, which a signal handler with no `SA_RESTART` produces) and
/// returns cleanly once it is set. Any other per-connection or
/// per-descriptor-transfer error is logged and the loop continues.
pub fn run(listener: &TcpListener, worker_channels: &[RawFd], shutdown: &AtomicBool) -> CacheResult<()> {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };

        let worker_index = rand::thread_rng().gen_range(0..worker_channels.len());
        tracing::info!(%peer, worker_index, "accepted client, dispatching to worker");

        let fd = stream.into_raw_fd();
        if let Err(e) = ipc::send_fd(worker_channels[worker_index], fd) {
            tracing::error!(error = %e, worker_index, "descriptor transfer failed, dropping connection");
        }
    }
}
