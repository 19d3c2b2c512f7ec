//! Per-worker stat slot layout shared across forked processes via `shmem`.
//!
//! Field set and the CFG/CHK/RES bitmask mirror `trafgen.c`'s `struct cpu_stats` and
//! `CPU_STATS_STATE_*` defines exactly, with `state` promoted from `sig_atomic_t` to `AtomicU32`
//! since Rust has no signal-safe-integer convention of its own and every access here already goes
//! through a real atomic.

use std::sync::atomic::AtomicU32;

/// Set once a worker has computed its local packet count and total byte length (the "config"
/// phase of the rescale barrier).
pub const STATE_CFG: u32 = 1;
/// Set once a worker has computed its share of the rescaled packet budget (the "check" phase).
pub const STATE_CHK: u32 = 2;
/// Set once a worker has finished transmitting and published its final counters.
pub const STATE_RES: u32 = 4;

/// One slot of the shared stat region, one per forked worker. `repr(C)` so the layout is stable
/// across the `fork()` boundary when placed in the anonymous-mmap'd region built by [`crate::shmem`].
#[repr(C)]
pub struct WorkerStats {
    pub tv_sec: u64,
    pub tv_usec: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub cf_packets: u64,
    pub cf_bytes: u64,
    pub cd_packets: u64,
    pub state: AtomicU32,
    _reserved: u32,
}

impl WorkerStats {
    pub const fn zeroed() -> Self {
        WorkerStats {
            tv_sec: 0,
            tv_usec: 0,
            tx_packets: 0,
            tx_bytes: 0,
            cf_packets: 0,
            cf_bytes: 0,
            cd_packets: 0,
            state: AtomicU32::new(0),
            _reserved: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn state_bits_are_disjoint() {
        assert_eq!(STATE_CFG & STATE_CHK, 0);
        assert_eq!(STATE_CFG & STATE_RES, 0);
        assert_eq!(STATE_CHK & STATE_RES, 0);
    }

    #[test]
    fn zeroed_stats_start_with_no_state_bits_set() {
        let stats = WorkerStats::zeroed();
        assert_eq!(stats.state.load(Ordering::Relaxed), 0);
        assert_eq!(stats.tx_packets, 0);
    }
}
