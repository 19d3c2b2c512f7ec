//! Fast transmit path: a memory-mapped, zero-copy kernel TX ring of fixed-size frame slots.
//!
//! Builder shape and mmap/bind sequencing follow the teacher's `rx::RingBuilder`/`Ring`
//! (`examples/andrey-shigantsov-rs-af_packet/src/rx/mod.rs`) almost verbatim; the frame ABI and
//! fill loop instead follow the original `trafgen.c`'s `xmit_fastpath_or_die` (`PACKET_TX_RING`,
//! per-frame `tp_status` handoff, not RX's per-block `block_status`).

use std::io::{Error, Result};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use libc::{c_void, mmap, munmap, MAP_SHARED, PROT_READ, PROT_WRITE};
use rand::RngCore;

use crate::mutator;
use crate::packet::CompiledPackets;
use crate::socket::{self, Socket};
use crate::tpacket::{self, Tpacket2Hdr, TpacketReq, FRAME_PAYLOAD_OFFSET};

/// Settings used to size and bind the ring, mirroring the teacher's `RingSettings`.
#[derive(Clone, Debug)]
pub struct RingSettings {
    pub if_name: String,
    pub reserve_size: usize,
    pub jumbo_support: bool,
}

impl RingSettings {
    fn req(&self) -> TpacketReq {
        let frame_size: u32 = if self.jumbo_support { 65536 } else { 2048 };
        let mut req = TpacketReq {
            tp_frame_size: frame_size,
            ..TpacketReq::default()
        };
        if self.reserve_size > 0 {
            let total = self.reserve_size as u32;
            req.tp_frame_nr = (total / frame_size).max(1);
            req.tp_block_nr = req.tp_frame_nr;
            req.tp_block_size = frame_size;
        }
        req
    }
}

/// The mmap'd TX ring: one `Socket` bound to an interface plus its frame slots.
pub struct TxRing {
    socket: Socket,
    map: *mut u8,
    map_len: usize,
    frame_size: usize,
    frame_count: usize,
}

impl TxRing {
    pub fn build(settings: &RingSettings) -> Result<Self> {
        let req = settings.req();

        let mut socket = Socket::from_if_name(&settings.if_name, socket::PF_PACKET)?;
        socket.set_priority(512)?;
        socket.setsockopt(socket::PACKET_LOSS, 1i32)?;
        socket.setsockopt(socket::PACKET_VERSION, tpacket::TPACKET_V2)?;
        socket.setsockopt(socket::PACKET_TX_RING, req.clone())?;

        let map_len = (req.tp_block_size * req.tp_block_nr) as usize;
        let map = unsafe {
            mmap(
                std::ptr::null_mut(),
                map_len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                socket.as_raw_fd(),
                0,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }

        socket.bind_to_interface()?;

        Ok(TxRing {
            socket,
            map: map as *mut u8,
            map_len,
            frame_size: req.tp_frame_size as usize,
            frame_count: req.tp_frame_nr as usize,
        })
    }

    fn frame_header(&self, idx: usize) -> *mut Tpacket2Hdr {
        debug_assert!(idx < self.frame_count);
        unsafe { self.map.add(idx * self.frame_size) as *mut Tpacket2Hdr }
    }

    fn frame_payload_mut(&self, idx: usize) -> &mut [u8] {
        debug_assert!(idx < self.frame_count);
        let base = unsafe { self.map.add(idx * self.frame_size + FRAME_PAYLOAD_OFFSET) };
        let len = self.frame_size - FRAME_PAYLOAD_OFFSET;
        unsafe { std::slice::from_raw_parts_mut(base, len) }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Flushes any kernel-owned slots without handing over new data; used both by the kernel-pull
    /// timer and by `Drop` to guarantee no frame is silently dropped on clean shutdown.
    pub fn flush(&self) -> Result<()> {
        self.socket.flush_tx_ring()
    }

    /// Registers the `SIGALRM` kernel-pull handler and arms a repeating interval timer, matching
    /// the original's `apply_kernel_pull_interval`. The handler's only job is a non-blocking
    /// zero-length `sendto` on this ring's socket — the sole producer of drain requests while the
    /// fill loop spins waiting for the kernel to hand frames back.
    pub fn arm_kernel_pull(&self, interval: Duration) -> Result<()> {
        ACTIVE_TX_FD.store(self.socket.as_raw_fd(), Ordering::Relaxed);
        unsafe {
            if libc::signal(libc::SIGALRM, on_kernel_pull as libc::sighandler_t) == libc::SIG_ERR {
                return Err(Error::last_os_error());
            }
        }
        let micros = interval.as_micros().max(1) as i64;
        let tv = libc::timeval {
            tv_sec: (micros / 1_000_000) as libc::time_t,
            tv_usec: (micros % 1_000_000) as libc::suseconds_t,
        };
        let it = libc::itimerval {
            it_interval: tv,
            it_value: tv,
        };
        if unsafe { libc::setitimer(libc::ITIMER_REAL, &it, std::ptr::null_mut()) } != 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    /// Disarms the kernel-pull timer and clears the fd the handler would otherwise flush.
    pub fn disarm_kernel_pull() {
        let zero = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
        };
        unsafe {
            libc::setitimer(libc::ITIMER_REAL, &zero, std::ptr::null_mut());
        }
        ACTIVE_TX_FD.store(-1, Ordering::Relaxed);
    }
}

/// fd of the currently armed TX ring's socket. A signal handler can't close over state, so the
/// fd to flush is threaded through here instead; `-1` means no ring is armed.
static ACTIVE_TX_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_kernel_pull(_: libc::c_int) {
    let fd = ACTIVE_TX_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::sendto(fd, std::ptr::null(), 0, libc::MSG_DONTWAIT, std::ptr::null(), 0);
        }
    }
}

impl Drop for TxRing {
    fn drop(&mut self) {
        let _ = self.flush();
        unsafe {
            munmap(self.map as *mut c_void, self.map_len);
        }
    }
}

/// Drives the fast-path fill loop until `sigint` is observed or `budget` (packets remaining,
/// `None` = unbounded) reaches zero. Returns `(tx_packets, tx_bytes)`.
///
/// `it` (next slot to fill) and `i` (next packet index) follow the original's loop invariant
/// exactly: round-robin `(i+1) mod plen`, or `rand() mod plen` when `randomize` is set — the
/// same `rng` instance that feeds randomizer mutations, so the two stay coupled per design
/// note §9.
pub fn run(
    ring: &TxRing,
    packets: &mut CompiledPackets,
    randomize: bool,
    budget: Option<u64>,
    sigint: &AtomicBool,
    rng: &mut dyn RngCore,
) -> (u64, u64) {
    let plen = packets.len();
    let mut it = 0usize;
    let mut i = 0usize;
    let mut remaining = budget;
    let mut tx_packets = 0u64;
    let mut tx_bytes = 0u64;

    if plen == 0 {
        return (0, 0);
    }

    'outer: while !sigint.load(Ordering::Relaxed) && remaining != Some(0) {
        loop {
            if remaining == Some(0) || sigint.load(Ordering::Relaxed) {
                break 'outer;
            }

            let hdr = ring.frame_header(it);
            let status = unsafe { std::ptr::read_volatile(&(*hdr).tp_status) };
            if status != tpacket::TP_STATUS_AVAILABLE {
                break;
            }

            let template = &packets.templates[i];
            let len = template.len() as u32;
            unsafe {
                (*hdr).tp_snaplen = len;
                (*hdr).tp_len = len;
            }

            let fields = &mut packets.dyn_fields[i];
            let payload_slot = ring.frame_payload_mut(it);
            let payload_len = template.len();
            payload_slot[..payload_len].copy_from_slice(&template.payload);
            if !fields.is_empty() {
                mutator::apply(fields, &mut payload_slot[..payload_len], rng);
            }

            tx_bytes += template.len() as u64;
            tx_packets += 1;

            i = if randomize {
                (rng.next_u32() as usize) % plen
            } else {
                (i + 1) % plen
            };

            unsafe {
                std::ptr::write_volatile(&mut (*hdr).tp_status, tpacket::TP_STATUS_SEND_REQUEST);
            }

            it = (it + 1) % ring.frame_count();

            if let Some(n) = remaining.as_mut() {
                *n -= 1;
            }
        }
    }

    (tx_packets, tx_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_settings_scale_frame_count_from_reserve_size() {
        let settings = RingSettings {
            if_name: "lo".into(),
            reserve_size: 2 << 20,
            jumbo_support: false,
        };
        let req = settings.req();
        assert_eq!(req.tp_frame_size, 2048);
        assert_eq!(req.tp_frame_nr, (2u32 << 20) / 2048);
    }

    #[test]
    fn jumbo_support_widens_frame_size() {
        let settings = RingSettings {
            if_name: "lo".into(),
            reserve_size: 0,
            jumbo_support: true,
        };
        assert_eq!(settings.req().tp_frame_size, 65536);
    }
}
