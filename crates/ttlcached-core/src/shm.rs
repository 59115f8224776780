//! The shared-memory region backing the hash table: a single named POSIX
//! shared-memory object, mapped identically (same size, same protection)
//! into the acceptor, every worker, and the janitor.

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::{CacheError, CacheResult};

/// An owned mapping of the shared region, plus the shm fd kept open for
/// the lifetime of the mapping (closing it does not invalidate an
/// existing `mmap`, but keeping it simplifies lifetime reasoning and
/// means the fd stays valid until teardown).
pub struct SharedRegion {
    mmap: MmapMut,
    name: String,
    owns: bool,
}

impl SharedRegion {
    /// Create (or replace) the named region, truncated to exactly `size`
    /// bytes. Mirrors the acceptor's idempotent remove-then-create: an
    /// object left behind by a crashed prior run is unlinked first.
    pub fn create(name: &str, size: u64) -> CacheResult<Self> {
        let shm_unlink_result = shm_unlink(name);
        if let Err(e) = shm_unlink_result {
            tracing::debug!(%name, error = %e, "no prior shared-memory object to unlink");
        }

        let fd = shm_open(name, OFlag::O_CREAT | OFlag::O_RDWR, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| CacheError::ShmFailure { reason: format!("shm_open({name}): {e}") })?;

        ftruncate(&fd, size as i64).map_err(|e| CacheError::ShmFailure { reason: format!("ftruncate({name}, {size}): {e}") })?;

        let mmap = unsafe { MmapMut::map_mut(&fd) }.map_err(|e| CacheError::ShmFailure { reason: format!("mmap({name}): {e}") })?;

        Ok(SharedRegion { mmap, name: name.to_string(), owns: true })
    }

    /// Open the existing named region read/write and map it. Used by
    /// workers and the janitor, which never unlink.
    pub fn open(name: &str, size: u64) -> CacheResult<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|e| CacheError::ShmFailure { reason: format!("shm_open({name}): {e}") })?;

        let mmap = unsafe { MmapMut::map_mut(&fd) }.map_err(|e| CacheError::ShmFailure { reason: format!("mmap({name}): {e}") })?;

        if mmap.len() as u64 != size {
            return Err(CacheError::ShmFailure {
                reason: format!("{name} is {} bytes, expected {size}; region_bytes must match across all processes", mmap.len()),
            });
        }

        Ok(SharedRegion { mmap, name: name.to_string(), owns: false })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Remove the region's name from the filesystem namespace. Only the
    /// acceptor calls this, at shutdown.
    pub fn unlink(&self) {
        if let Err(e) = shm_unlink(self.name.as_str()) {
            tracing::warn!(name = %self.name, error = %e, "shm_unlink failed");
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owns {
            self.unlink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_see_the_same_bytes() {
        let name = format!("/ttlcached_test_shm_{}", std::process::id());
        let mut owner = SharedRegion::create(&name, 4096).unwrap();
        owner.as_mut_slice()[0] = 0xAB;

        let attacher = SharedRegion::open(&name, 4096).unwrap();
        assert_eq!(attacher.as_slice()[0], 0xAB);
    }

    #[test]
    fn open_rejects_size_mismatch() {
        let name = format!("/ttlcached_test_shm_mismatch_{}", std::process::id());
        let _owner = SharedRegion::create(&name, 4096).unwrap();
        let result = SharedRegion::open(&name, 8192);
        assert!(matches!(result, Err(CacheError::ShmFailure { .. })));
    }

    #[test]
    fn create_is_idempotent_across_a_crashed_prior_run() {
        let name = format!("/ttlcached_test_shm_idempotent_{}", std::process::id());
        let first = SharedRegion::create(&name, 4096).unwrap();
        // Simulate a crash: leak instead of dropping, so the object is
        // not unlinked, then create again with the same name.
        std::mem::forget(first);
        let second = SharedRegion::create(&name, 4096).unwrap();
        assert_eq!(second.as_slice().len(), 4096);
        second.unlink();
    }
}
