extern crate libc;

use libc::{
    bind, c_char, c_int, c_short, c_uint, c_ulong, c_void, if_nametoindex, ioctl, sendto,
    setsockopt, sockaddr, sockaddr_ll, sockaddr_storage, socket, socklen_t, AF_PACKET, ETH_P_ALL,
    IF_NAMESIZE, MSG_DONTWAIT, SOCK_RAW, SOL_PACKET, SOL_SOCKET,
};
pub use libc::{IFF_PROMISC, IFF_RUNNING, IFF_UP, PF_PACKET};

use std::ffi::CString;
use std::io::{Error, ErrorKind, Result};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

const IFREQUNIONSIZE: usize = 24;

const SIOCGIFFLAGS: c_ulong = 35091; //0x00008913;
const SIOCSIFFLAGS: c_ulong = 35092; //0x00008914;
const SIOCGIFMTU: c_ulong = 35105; //0x00008921;

/// `PACKET_TX_RING` socket option, for mmap'd zero-copy transmit.
pub const PACKET_TX_RING: c_int = 13;
/// `PACKET_VERSION` socket option, selects the `TPACKET_V2`/`TPACKET_V3` frame ABI.
pub const PACKET_VERSION: c_int = 10;
/// `PACKET_LOSS` socket option: tolerate malformed frames in the TX ring instead of refusing them.
pub const PACKET_LOSS: c_int = 14;
/// `SO_PRIORITY`, used to bump the kernel's qdisc priority for generated traffic.
pub const SO_PRIORITY: c_int = 12;

#[repr(C)]
struct IfReq {
    //TODO: these are actually both unions, implement them as such now that Rust supports it
    ifr_name: [c_char; IF_NAMESIZE],
    data: [u8; IFREQUNIONSIZE],
}

impl IfReq {
    fn as_short(&self) -> c_short {
        c_short::from_be((self.data[0] as c_short) << 8 | (self.data[1] as c_short))
    }

    fn from_short(i: c_short) -> IfReq {
        let mut req = IfReq::default();
        //TODO: find a better way to do this
        let bytes: [u8; 2] = unsafe { mem::transmute(i) };
        req.data[0] = bytes[0];
        req.data[1] = bytes[1];
        req
    }

    fn with_if_name(if_name: &str) -> Result<IfReq> {
        let mut if_req = IfReq::default();

        if if_name.len() >= if_req.ifr_name.len() {
            return Err(Error::new(ErrorKind::Other, "Interface name too long"));
        }

        // basically a memcpy
        for (a, c) in if_req.ifr_name.iter_mut().zip(if_name.bytes()) {
            *a = c as i8;
        }

        Ok(if_req)
    }

    fn ifr_flags(&self) -> c_short {
        self.as_short()
    }
}

impl Default for IfReq {
    fn default() -> IfReq {
        IfReq {
            ifr_name: [0; IF_NAMESIZE],
            data: [0; IFREQUNIONSIZE],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Socket {
    ///File descriptor
    pub fd: c_int,
    ///Interface name
    pub if_name: String,
    pub if_index: c_uint,
    pub sock_type: c_int,
}

impl Socket {
    pub fn from_if_name(if_name: &str, socket_type: c_int) -> Result<Socket> {
        //this typecasting sucks :(
        let fd = unsafe { socket(socket_type, SOCK_RAW, (ETH_P_ALL as u16).to_be() as i32) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        Ok(Socket {
            if_name: String::from(if_name),
            if_index: get_if_index(if_name)?,
            sock_type: socket_type,
            fd,
        })
    }

    fn ioctl(&self, ident: c_ulong, if_req: IfReq) -> Result<IfReq> {
        let mut req: Box<IfReq> = Box::new(if_req);
        match unsafe { ioctl(self.fd, ident, &mut *req) } {
            -1 => Err(Error::last_os_error()),
            _ => Ok(*req),
        }
    }

    fn get_flags(&self) -> Result<IfReq> {
        self.ioctl(SIOCGIFFLAGS, IfReq::with_if_name(&self.if_name)?)
    }

    pub fn set_flag(&mut self, flag: c_ulong) -> Result<()> {
        let flags = &self.get_flags()?.ifr_flags();
        let new_flags = flags | flag as c_short;
        let mut if_req = IfReq::with_if_name(&self.if_name)?;
        if_req.data = IfReq::from_short(new_flags).data;
        self.ioctl(SIOCSIFFLAGS, if_req)?;
        Ok(())
    }

    /// True if `IFF_UP | IFF_RUNNING` are both set.
    pub fn is_up_and_running(&self) -> Result<bool> {
        let flags = self.get_flags()?.ifr_flags() as c_int;
        Ok(flags & (IFF_UP | IFF_RUNNING) == (IFF_UP | IFF_RUNNING))
    }

    /// Queries the interface MTU via `SIOCGIFMTU`.
    pub fn mtu(&self) -> Result<u32> {
        let req = self.ioctl(SIOCGIFMTU, IfReq::with_if_name(&self.if_name)?)?;
        Ok(u32::from_ne_bytes([req.data[0], req.data[1], req.data[2], req.data[3]]))
    }

    pub fn setsockopt<T>(&mut self, opt: c_int, opt_val: T) -> Result<()> {
        self.setsockopt_level(SOL_PACKET, opt, opt_val)
    }

    pub fn setsockopt_level<T>(&mut self, level: c_int, opt: c_int, opt_val: T) -> Result<()> {
        match unsafe {
            setsockopt(
                self.fd,
                level,
                opt,
                &opt_val as *const _ as *const c_void,
                mem::size_of_val(&opt_val) as socklen_t,
            )
        } {
            0 => Ok(()),
            _ => Err(Error::last_os_error()),
        }
    }

    /// Sets `SO_PRIORITY`, matching the original's `set_sock_prio`.
    pub fn set_priority(&mut self, prio: c_int) -> Result<()> {
        self.setsockopt_level(SOL_SOCKET, SO_PRIORITY, prio)
    }

    /// Binds the socket to this interface for `AF_PACKET` transmit, matching the original's
    /// `bind_tx_ring` / RX ring's `bind` helper.
    pub fn bind_to_interface(&self) -> Result<()> {
        unsafe {
            let mut ss: sockaddr_storage = mem::zeroed();
            let sll: *mut sockaddr_ll = &mut ss as *mut sockaddr_storage as *mut sockaddr_ll;
            (*sll).sll_family = AF_PACKET as u16;
            (*sll).sll_protocol = (ETH_P_ALL as u16).to_be();
            (*sll).sll_ifindex = self.if_index as c_int;

            let sa = (&ss as *const sockaddr_storage) as *const sockaddr;
            let res = bind(self.fd, sa, mem::size_of::<sockaddr_ll>() as u32);
            if res == -1 {
                return Err(Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Non-blocking `sendto(fd, NULL, 0, ...)`, used to nudge the kernel into draining a TX ring
    /// without handing it new payload bytes (the original's `pull_and_flush_tx_ring`).
    pub fn flush_tx_ring(&self) -> Result<()> {
        let ret = unsafe { sendto(self.fd, std::ptr::null(), 0, MSG_DONTWAIT, std::ptr::null(), 0) };
        if ret < 0 {
            let err = Error::last_os_error();
            // EAGAIN/ENOBUFS just mean "nothing to flush yet" or "already full"; not fatal.
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::ENOBUFS) => Ok(()),
                _ => Err(err),
            }
        } else {
            Ok(())
        }
    }

}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

pub fn get_if_index(name: &str) -> Result<c_uint> {
    let name = CString::new(name)?;
    let index = unsafe { if_nametoindex(name.as_ptr()) };
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_req_rejects_overlong_interface_name() {
        let name: String = std::iter::repeat('x').take(IF_NAMESIZE + 1).collect();
        assert!(IfReq::with_if_name(&name).is_err());
    }

    #[test]
    fn if_req_short_round_trips_through_data_bytes() {
        let req = IfReq::from_short(0x1234);
        assert_eq!(req.ifr_flags(), 0x1234);
    }
}
