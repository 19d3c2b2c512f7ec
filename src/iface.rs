//! Free-function interface queries (`device_mtu`, `device_up_and_running` in the original),
//! built on top of the ioctl plumbing already in [`crate::socket`]. Each call opens a short-lived
//! socket purely to issue the ioctl — the original does the same (`device_mtu`/`device_up_and_running`
//! open their own throwaway socket rather than threading one through from the caller).

use std::io::Result;

use crate::socket::{self, Socket};

/// Returns the interface's MTU, or `0` if it doesn't exist — the original's `device_mtu` treats
/// a missing device as MTU 0 and panics on it rather than surfacing an error.
pub fn mtu(if_name: &str) -> Result<u32> {
    Socket::from_if_name(if_name, socket::PF_PACKET)?.mtu()
}

/// Resolves the interface's kernel index, or an error if it doesn't exist.
pub fn if_index(if_name: &str) -> Result<u32> {
    socket::get_if_index(if_name)
}

/// True once `IFF_UP | IFF_RUNNING` are both set on the interface.
pub fn is_up_and_running(if_name: &str) -> Result<bool> {
    Socket::from_if_name(if_name, socket::PF_PACKET)?.is_up_and_running()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_has_no_index() {
        assert!(if_index("definitely-not-a-real-iface0").is_err()
            || if_index("definitely-not-a-real-iface0").unwrap() == 0);
    }
}
