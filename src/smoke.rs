//! ICMP echo liveness probe (the `--smoke-test` path): after every slow-path send, fire an
//! independent ICMP echo at the configured remote and require a matching reply within a short
//! window before continuing. Grounded on `trafgen.c`'s `xmit_smoke_setup`/`xmit_smoke_probe`.

use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use libc::{
    c_void, in_addr, pollfd, recvfrom, sendto, setsockopt, sockaddr, sockaddr_in, socket, AF_INET,
    IPPROTO_ICMP, IPPROTO_IP, IP_TTL, MSG_DONTWAIT, POLLIN, SOCK_RAW, SOL_SOCKET,
};
use rand::RngCore;

use crate::checksum::internet_checksum;

const ICMP_ECHO: u8 = 8;
const ICMP_ECHOREPLY: u8 = 0;
const SOL_RAW: i32 = 255;
const ICMP_FILTER: i32 = 1;
const PROBES: usize = 100;
const PAYLOAD_LEN: usize = 56;
const ICMP_HDR_LEN: usize = 8;
const IP_HDR_MIN_LEN: usize = 20;

#[repr(C)]
struct IcmpFilter {
    data: u32,
}

/// A configured ICMP echo prober, bound to one remote IPv4 destination for the lifetime of a
/// slow-path run.
pub struct SmokeProbe {
    fd: i32,
    dest: sockaddr_in,
    seq: u16,
}

impl SmokeProbe {
    /// Opens the raw ICMP socket, installs a filter admitting only echo-reply, sets TTL=64, and
    /// resolves `remote` for later `sendto`/matching. Mirrors `xmit_smoke_setup`.
    pub fn new(remote: Ipv4Addr) -> std::io::Result<Self> {
        let fd = unsafe { socket(AF_INET, SOCK_RAW, IPPROTO_ICMP) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        // Admits everything except ICMP_ECHOREPLY, i.e. `~(1 << ICMP_ECHOREPLY)`.
        let filter = IcmpFilter {
            data: !(1u32 << ICMP_ECHOREPLY),
        };
        let ret = unsafe {
            setsockopt(
                fd,
                SOL_RAW,
                ICMP_FILTER,
                &filter as *const _ as *const c_void,
                mem::size_of::<IcmpFilter>() as u32,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let ttl: i32 = 64;
        let ret = unsafe {
            setsockopt(
                fd,
                IPPROTO_IP,
                IP_TTL,
                &ttl as *const _ as *const c_void,
                mem::size_of::<i32>() as u32,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mut dest: sockaddr_in = unsafe { mem::zeroed() };
        dest.sin_family = AF_INET as u16;
        dest.sin_addr = in_addr {
            s_addr: u32::from_ne_bytes(remote.octets()),
        };

        Ok(SmokeProbe { fd, dest, seq: 0 })
    }

    /// Sends up to 100 echo probes, each waiting up to 50ms for a matching reply. Returns
    /// `Ok(true)` on the first accepted reply, `Ok(false)` if every attempt timed out or was
    /// rejected. Mirrors `xmit_smoke_probe`: every id sent so far in this call is kept in
    /// `idstore` and a reply is accepted if it matches *any* of them, not just the most recent
    /// attempt's id, since a delayed reply to an earlier attempt can arrive during a later one's
    /// poll window.
    pub fn probe(&mut self, rng: &mut dyn RngCore) -> std::io::Result<bool> {
        let mut idstore: Vec<u16> = Vec::with_capacity(PROBES);

        for _ in 0..PROBES {
            let mut ident: u16 = 0;
            while ident == 0 {
                ident = (rng.next_u32() as u16).to_be();
            }
            idstore.push(ident);

            self.seq = self.seq.wrapping_add(1);

            let mut packet = vec![0u8; ICMP_HDR_LEN + PAYLOAD_LEN];
            packet[0] = ICMP_ECHO;
            packet[1] = 0;
            packet[2] = 0;
            packet[3] = 0;
            packet[4..6].copy_from_slice(&ident.to_ne_bytes());
            packet[6..8].copy_from_slice(&self.seq.to_be_bytes());
            for byte in &mut packet[ICMP_HDR_LEN..] {
                *byte = (rng.next_u32() & 0xff) as u8;
            }
            let csum = internet_checksum(&packet);
            packet[2..4].copy_from_slice(&csum.to_be_bytes());

            let ret = unsafe {
                sendto(
                    self.fd,
                    packet.as_ptr() as *const c_void,
                    packet.len(),
                    MSG_DONTWAIT,
                    &self.dest as *const _ as *const sockaddr,
                    mem::size_of::<sockaddr_in>() as u32,
                )
            };
            if ret < 0 || ret as usize != packet.len() {
                return Err(std::io::Error::last_os_error());
            }

            if !self.poll_readable(Duration::from_millis(50))? {
                continue;
            }

            let mut buf = [0u8; 512];
            let mut from: sockaddr_in = unsafe { mem::zeroed() };
            let mut from_len = mem::size_of::<sockaddr_in>() as u32;
            let ret = unsafe {
                recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut c_void,
                    buf.len(),
                    0,
                    &mut from as *mut _ as *mut sockaddr,
                    &mut from_len,
                )
            };
            if ret <= 0 {
                return Err(std::io::Error::last_os_error());
            }
            let ret = ret as usize;

            if from_len as usize != mem::size_of::<sockaddr_in>() {
                continue;
            }
            if from.sin_addr.s_addr != self.dest.sin_addr.s_addr {
                continue;
            }
            if ret < IP_HDR_MIN_LEN + ICMP_HDR_LEN {
                continue;
            }

            let ihl = (buf[0] & 0x0f) as usize * 4;
            if ihl + ICMP_HDR_LEN > ret {
                continue;
            }

            let reply_id = u16::from_ne_bytes([buf[ihl + 4], buf[ihl + 5]]);
            if idstore.contains(&reply_id) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn poll_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        let mut fds = pollfd {
            fd: self.fd,
            events: POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut fds, 1, timeout.as_millis() as i32) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(ret > 0 && fds.revents & POLLIN != 0)
    }
}

impl AsRawFd for SmokeProbe {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.fd
    }
}

impl Drop for SmokeProbe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_identifier_never_serializes_to_zero() {
        // `ident` is redrawn until nonzero; a 0 id would be indistinguishable from "unset" in
        // the original's idstore semantics.
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let mut ident: u16 = 0;
        let mut draws = 0;
        while ident == 0 && draws < 4 {
            ident = (rng.next_u32() as u16).to_be();
            draws += 1;
        }
        assert_ne!(draws, 0);
    }

    #[test]
    fn icmp_filter_data_admits_everything_but_echo_reply() {
        let filter = IcmpFilter {
            data: !(1u32 << ICMP_ECHOREPLY),
        };
        assert_eq!(filter.data & (1 << ICMP_ECHOREPLY), 0);
        assert_ne!(filter.data & (1 << ICMP_ECHO), 0);
    }
}
