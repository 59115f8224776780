//! Cross-process mutual exclusion via a POSIX named counting semaphore,
//! used here strictly as a binary lock (initial value 1).
//!
//! `nix` has no wrapper for the named-semaphore family (`sem_open` et
//! al.), so this goes straight to `libc` — the same escape hatch the
//! control channel uses for `SO_PEERCRED` and `SCM_RIGHTS`.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::error::{CacheError, CacheResult};

/// A handle to the named semaphore. Every process that touches the
/// shared table holds one of these; only the acceptor creates it
/// (`create`), workers and the janitor attach to the existing one
/// (`open`).
pub struct NamedLock {
    sem: *mut libc::sem_t,
    name: CString,
    owns: bool,
}

unsafe impl Send for NamedLock {}

impl NamedLock {
    /// Create (or replace) the named semaphore with initial value 1.
    /// Mirrors the acceptor's idempotent remove-then-create: an
    /// existing semaphore of the same name from a crashed prior run is
    /// unlinked first so startup never fails on `EEXIST`.
    pub fn create(name: &str) -> CacheResult<Self> {
        let cname = CString::new(name).map_err(|e| CacheError::SemFailure { reason: e.to_string() })?;

        unsafe {
            // Best-effort: a missing semaphore from a clean prior shutdown
            // is not an error.
            libc::sem_unlink(cname.as_ptr());
        }

        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o600 as libc::mode_t, 1) };
        if sem == libc::SEM_FAILED {
            return Err(CacheError::SemFailure { reason: io::Error::last_os_error().to_string() });
        }

        Ok(NamedLock { sem, name: cname, owns: true })
    }

    /// Attach to an already-created named semaphore.
    pub fn open(name: &str) -> CacheResult<Self> {
        let cname = CString::new(name).map_err(|e| CacheError::SemFailure { reason: e.to_string() })?;

        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(CacheError::SemFailure { reason: io::Error::last_os_error().to_string() });
        }

        Ok(NamedLock { sem, name: cname, owns: false })
    }

    /// Acquire the lock, run `f` with exclusive access, then release —
    /// even if `f` panics. No nested acquisition and no I/O should ever
    /// happen inside `f`; it exists only to bound table access, per the
    /// concurrency model.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> CacheResult<T> {
        self.acquire()?;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        self.release()?;
        result.map_err(|_| CacheError::SemFailure { reason: "operation under lock panicked".to_string() })
    }

    fn acquire(&self) -> CacheResult<()> {
        let rc = unsafe { libc::sem_wait(self.sem) };
        if rc == -1 {
            return Err(CacheError::SemFailure { reason: io::Error::last_os_error().to_string() });
        }
        Ok(())
    }

    fn release(&self) -> CacheResult<()> {
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc == -1 {
            return Err(CacheError::SemFailure { reason: io::Error::last_os_error().to_string() });
        }
        Ok(())
    }

    /// Unlink the semaphore from the filesystem namespace. Only the
    /// acceptor calls this, at shutdown — workers and the janitor close
    /// their handle (via `Drop`) without unlinking.
    pub fn unlink(&self) {
        unsafe {
            libc::sem_unlink(self.name.as_ptr());
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        if self.sem != ptr::null_mut() {
            unsafe {
                libc::sem_close(self.sem);
            }
        }
        if self.owns {
            self.unlink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn create_then_open_then_lock_round_trips() {
        let name = format!("/ttlcached_test_lock_{}", std::process::id());
        let owner = NamedLock::create(&name).unwrap();
        let attacher = NamedLock::open(&name).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        owner
            .with_lock(|| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        attacher
            .with_lock(|| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        owner.unlink();
    }

    #[test]
    fn with_lock_releases_even_when_the_closure_panics() {
        let name = format!("/ttlcached_test_lock_panic_{}", std::process::id());
        let owner = NamedLock::create(&name).unwrap();

        let result = owner.with_lock(|| panic!("boom"));
        assert!(result.is_err());

        // The semaphore must have been released by the panicking call;
        // a second acquisition should not block.
        owner.with_lock(|| ()).unwrap();
        owner.unlink();
    }
}
