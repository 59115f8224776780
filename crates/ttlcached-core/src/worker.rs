//! Worker process: owns a set of client connections and performs every
//! table mutation on their behalf, under the lock.
//!
//! Each worker is its own OS process, forked by the supervisor before any
//! async runtime exists. Once forked, a worker builds its own
//! single-threaded `tokio` runtime and a [`tokio::task::LocalSet`], so
//! per-connection state (`Rc<RefCell<..>>`, not `Arc<Mutex<..>>`) never
//! has to be `Send` — there is exactly one OS thread cooperating across
//! all of a worker's connections, matching the single-threaded
//! event-loop requirement without forcing atomics or locking that
//! has no cross-process meaning.
//!
//! One exception: receiving a client descriptor over the control channel
//! is a blocking `recvmsg` call with no portable async equivalent, so it
//! runs on a dedicated blocking OS thread that forwards accepted
//! descriptors into the `LocalSet` over a channel.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use ttlcached_config::Config;
use ttlcached_protocol::{parse_line, Command, ParseError};
use ttlcached_telemetry::metrics;

use crate::error::{CacheError, CacheResult};
use crate::lock::NamedLock;
use crate::shm::SharedRegion;
use crate::table::Table;

/// Bytes read per `recv` call.
const READ_CHUNK: usize = 1024;

/// Everything one worker needs to touch the shared table: the mapped
/// region (behind a `RefCell` since every connection task borrows it
/// mutably in turn, never concurrently — the `LocalSet` guarantees only
/// one task runs at a time between await points) and the cross-process
/// lock guarding it.
struct WorkerState {
    region: RefCell<SharedRegion>,
    lock: NamedLock,
    config: Config,
}

impl WorkerState {
    /// Acquire the lock, build a [`Table`] view over the region, run `f`,
    /// release the lock. Mirrors `table::tick`'s contract: no I/O and no
    /// further blocking happens inside `f`.
    fn apply(&self, f: impl FnOnce(&mut Table) -> crate::table::Outcome) -> CacheResult<crate::table::Outcome> {
        self.lock.with_lock(|| {
            let mut region = self.region.borrow_mut();
            let mut table = Table::new(region.as_mut_slice(), &self.config);
            f(&mut table)
        })
    }
}

/// Run this worker until its control channel is closed or broken.
/// Builds and owns its own current-thread `tokio` runtime; never
/// returns except on a fatal startup error.
pub fn run(worker_id: usize, control_fd: OwnedFd, config: Config) -> CacheResult<()> {
    tracing::info!(worker_id, "worker starting");

    let region = SharedRegion::open(&config.shm_name, config.region_bytes)?;
    let lock = NamedLock::open(&config.sem_name)?;
    let state = Rc::new(WorkerState { region: RefCell::new(region), lock, config });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OwnedFd>();

    let recv_thread = std::thread::Builder::new()
        .name(format!("ttlcached-worker-{worker_id}-ctl"))
        .spawn(move || {
            loop {
                match crate::ipc::recv_fd(control_fd.as_raw_fd()) {
                    Ok(fd) => {
                        if tx.send(fd).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(worker_id, error = %e, "control channel broken, worker exiting");
                        break;
                    }
                }
            }
        })
        .map_err(|e| CacheError::ForkFailure { reason: e.to_string() })?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_io().build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, async move {
        while let Some(fd) = rx.recv().await {
            let std_stream = std::net::TcpStream::from(fd);
            if let Err(e) = std_stream.set_nonblocking(true) {
                tracing::error!(worker_id, error = %e, "failed to set client socket nonblocking");
                continue;
            }
            let stream = match tokio::net::TcpStream::from_std(std_stream) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to register client socket with the runtime");
                    continue;
                }
            };
            metrics::ACTIVE_CONNECTIONS.inc();
            let state = state.clone();
            tokio::task::spawn_local(async move {
                handle_client(stream, state, worker_id).await;
                metrics::ACTIVE_CONNECTIONS.dec();
            });
        }
    });

    // The channel only closes when every sender is dropped; since the
    // control thread holds the only sender, reaching here means it
    // already exited.
    let _ = recv_thread.join();
    Ok(())
}

async fn handle_client(mut stream: tokio::net::TcpStream, state: Rc<WorkerState>, worker_id: usize) {
    let mut inbuf: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(worker_id, error = %e, "client read error, closing connection");
                break;
            }
        };
        inbuf.extend_from_slice(&read_buf[..n]);

        let mut outbuf = String::new();
        while let Some(pos) = inbuf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = inbuf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            outbuf.push_str(&compose_response(&state, &line));
        }

        if !outbuf.is_empty() {
            // A trailing NUL byte follows every response on the wire —
            // observable, deliberately preserved compatibility detail.
            if stream.write_all(outbuf.as_bytes()).await.is_err() || stream.write_all(&[0u8]).await.is_err() {
                break;
            }
        }
    }
}

/// Turn one newline-stripped request line into its response line, or an
/// empty string if the operation was abandoned (lock acquisition
/// failure — nothing is sent to the client in that case, per the error
/// handling design).
fn compose_response(state: &WorkerState, line: &str) -> String {
    if line.is_empty() {
        return "error (empty query)\n".to_string();
    }

    match parse_line(line) {
        Ok(Command::Get { key }) => run_table_op(state, "get", move |t| t.get(&key)),
        Ok(Command::Set { ttl, key, value }) => run_table_op(state, "set", move |t| t.set(ttl as i32, &key, &value)),
        // A line that is non-empty before stripping but tokenizes to nothing
        // (all whitespace) is an empty query, not a malformed one.
        Err(ParseError::Empty) => {
            metrics::OPS_TOTAL.with_label_values(&["unknown", "empty"]).inc();
            "error (empty query)\n".to_string()
        }
        Err(_) => {
            metrics::OPS_TOTAL.with_label_values(&["unknown", "error"]).inc();
            "error (bad query)\n".to_string()
        }
    }
}

fn run_table_op(state: &WorkerState, command: &str, f: impl FnOnce(&mut Table) -> crate::table::Outcome) -> String {
    let timer = metrics::OP_LATENCY_SECONDS.start_timer();
    let outcome = state.apply(f);
    timer.observe_duration();

    match outcome {
        Ok(outcome) => {
            let label = match &outcome {
                crate::table::Outcome::Ok { .. } if command == "get" => "hit",
                crate::table::Outcome::Ok { .. } => "stored",
                crate::table::Outcome::KeyNotFound => "miss",
                _ => "rejected",
            };
            metrics::OPS_TOTAL.with_label_values(&[command, label]).inc();
            outcome.to_wire_line()
        }
        Err(e) => {
            tracing::error!(error = %e, "table operation abandoned: lock acquisition failed");
            metrics::OPS_TOTAL.with_label_values(&[command, "error"]).inc();
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_state(unique: &str) -> WorkerState {
        let cli = ttlcached_config::Cli::parse_from([
            "ttlcached",
            "--region-bytes",
            "65536",
            "--shm-name",
            &format!("/ttlcached_test_worker_shm_{unique}"),
            "--sem-name",
            &format!("/ttlcached_test_worker_sem_{unique}"),
        ]);
        let config = Config::from_cli(cli).unwrap();
        let region = SharedRegion::create(&config.shm_name, config.region_bytes).unwrap();
        let lock = NamedLock::create(&config.sem_name).unwrap();
        WorkerState { region: RefCell::new(region), lock, config }
    }

    #[test]
    fn blank_line_is_an_empty_query_not_a_bad_query() {
        let state = test_state(&format!("blank_{}", std::process::id()));
        assert_eq!(compose_response(&state, "   "), "error (empty query)\n");
    }

    #[test]
    fn unknown_command_is_a_bad_query() {
        let state = test_state(&format!("unknown_{}", std::process::id()));
        assert_eq!(compose_response(&state, "blarg"), "error (bad query)\n");
    }

    #[test]
    fn set_then_get_round_trip_through_compose_response() {
        let state = test_state(&format!("roundtrip_{}", std::process::id()));
        assert_eq!(compose_response(&state, "set 5 foo bar"), "ok foo bar\n");
        assert_eq!(compose_response(&state, "get foo"), "ok foo bar\n");
    }
}
