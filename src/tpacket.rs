//! `TPACKET_V2` frame-based TX ring ABI.
//!
//! The teacher's `tpacket3.rs` models the block-batched RX ABI (`TPACKET_V3`, many packets per
//! mmap'd block, `block_status` on the block). The spec's fast transmit path instead hands the
//! kernel ownership one frame slot at a time (`tp_status` per frame), which is the classic
//! `TPACKET_V2` TX ring ABI used by the original `trafgen`'s `ring_tx.h`. Same `repr(C)` /
//! status-constant style as the teacher, different struct shape.

use libc::{c_int, c_uint};

pub const TPACKET_V2: c_int = 1;

pub const TP_STATUS_AVAILABLE: u32 = 0;
pub const TP_STATUS_SEND_REQUEST: u32 = 1 << 0;
pub const TP_STATUS_SENDING: u32 = 1 << 1;
pub const TP_STATUS_WRONG_FORMAT: u32 = 1 << 2;

/// Mirrors `struct tpacket_req` from `<linux/if_packet.h>`: lower-level ring allocation knobs.
/// `tp_block_size * tp_block_nr` must equal `tp_frame_size * tp_frame_nr`.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct TpacketReq {
    pub tp_block_size: c_uint,
    pub tp_block_nr: c_uint,
    pub tp_frame_size: c_uint,
    pub tp_frame_nr: c_uint,
}

impl Default for TpacketReq {
    fn default() -> TpacketReq {
        // Matches the original's `ring_size`/`setup_tx_ring_layout` defaults of an 8-frame
        // block with 2048-byte frames, scaled by caller-provided reserve size.
        TpacketReq {
            tp_block_size: 4096,
            tp_block_nr: 64,
            tp_frame_size: 2048,
            tp_frame_nr: 128,
        }
    }
}

/// `struct tpacket2_hdr` — the per-frame header at the start of every TX ring slot.
#[derive(Debug)]
#[repr(C)]
pub struct Tpacket2Hdr {
    pub tp_status: u32,
    pub tp_len: u32,
    pub tp_snaplen: u32,
    pub tp_mac: u16,
    pub tp_net: u16,
    pub tp_sec: u32,
    pub tp_nsec: u32,
    pub tp_vlan_tci: u16,
    pub tp_vlan_tpid: u16,
    _tp_padding: [u8; 4],
}

/// Bytes from the start of a frame slot to the start of the frame payload, matching
/// `TPACKET2_HDRLEN - sizeof(struct sockaddr_ll)` in the original.
pub const FRAME_PAYLOAD_OFFSET: usize = std::mem::size_of::<Tpacket2Hdr>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_size_is_stable() {
        // Pinning the size catches accidental field reordering/padding changes that would
        // silently desync `FRAME_PAYLOAD_OFFSET` from the kernel's expected layout.
        assert_eq!(std::mem::size_of::<Tpacket2Hdr>(), 32);
    }
}
