//! Anonymous file-backed shared memory for the per-worker stat region, visible across `fork()`.
//!
//! `trafgen.c`'s `setup_shared_var` creates a named temp file, `mmap`s it `MAP_SHARED`, then
//! closes and `unlink`s the file immediately — the mapping stays valid, the directory entry
//! doesn't. `tempfile::tempfile()` gives the same "open but unlinked" file in one call.

use std::io::{Result, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;

use libc::{c_void, mmap, munmap, MAP_SHARED, PROT_READ, PROT_WRITE};

use crate::stats::WorkerStats;

/// Owns the mmap'd region backing `cpus` [`WorkerStats`] slots. Dropped once, by the parent,
/// after every forked worker has exited and published its final state.
pub struct SharedStats {
    map: *mut u8,
    len: usize,
    cpus: usize,
}

// SAFETY: the region is `MAP_SHARED`, readable and writable by every process that mapped it;
// `WorkerStats` uses `AtomicU32` for its mutable field, the only one workers update concurrently.
unsafe impl Send for SharedStats {}
unsafe impl Sync for SharedStats {}

impl SharedStats {
    pub fn new(cpus: usize) -> Result<Self> {
        let len = cpus * std::mem::size_of::<WorkerStats>();

        let mut file = tempfile::tempfile()?;
        file.set_len(len as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&vec![0u8; len])?;

        let map = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        // `file` can now be dropped; the mapping keeps the backing pages alive.

        Ok(SharedStats {
            map: map as *mut u8,
            len,
            cpus,
        })
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// Returns a read-only view of worker `cpu`'s slot, safe to dereference once the caller has
    /// observed (via `state`) that the owning worker published it. Every forked process calls
    /// this against its own copy of this `SharedStats` (inherited across `fork()`, pointing at
    /// the same pages).
    pub fn slot(&self, cpu: usize) -> &WorkerStats {
        debug_assert!(cpu < self.cpus);
        unsafe { &*(self.map.add(cpu * std::mem::size_of::<WorkerStats>()) as *const WorkerStats) }
    }

    /// Returns a raw pointer to worker `cpu`'s slot for writing. A process must only ever use
    /// this on the slot matching its own `cpu` index — never another worker's.
    ///
    /// # Safety
    /// Callers must only write the non-atomic fields before publishing `state` (so readers that
    /// observe the state bit via `Acquire` also observe the writes via the prior `Release`), and
    /// must never call this for a `cpu` index other than their own.
    pub unsafe fn slot_mut(&self, cpu: usize) -> *mut WorkerStats {
        debug_assert!(cpu < self.cpus);
        self.map.add(cpu * std::mem::size_of::<WorkerStats>()) as *mut WorkerStats
    }
}

impl Drop for SharedStats {
    fn drop(&mut self) {
        unsafe {
            munmap(self.map as *mut c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn fresh_region_is_zeroed_and_independently_addressable() {
        let shared = SharedStats::new(2).unwrap();
        assert_eq!(shared.cpus(), 2);
        assert_eq!(shared.slot(0).tx_packets, 0);
        assert_eq!(shared.slot(1).state.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn writes_through_one_handle_are_visible_through_another() {
        let shared = SharedStats::new(1).unwrap();
        unsafe {
            (*shared.slot_mut(0)).tx_packets = 9;
        }
        shared.slot(0).state.store(3, Ordering::Relaxed);
        assert_eq!(shared.slot(0).state.load(Ordering::Relaxed), 3);
        assert_eq!(shared.slot(0).tx_packets, 9);
    }
}
