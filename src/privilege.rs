//! Dropping root privileges after socket/ring setup, before the hot transmit loop starts.
//!
//! `trafgen.c` calls `drop_privileges(ctx->enforce, ctx->uid, ctx->gid)` right after ring/ICMP
//! socket setup and before entering the loop; `enforce` is only set when `-u`/`-g` was given.
//! Order matters: `setgid` before `setuid`, since dropping the user id first would leave the
//! process unable to change its group id anymore.

use libc::{gid_t, uid_t};
use std::io::{Error, Result};

pub fn drop_privileges(enforce: bool, uid: uid_t, gid: gid_t) -> Result<()> {
    if !enforce {
        return Ok(());
    }

    if unsafe { libc::setgid(gid) } != 0 {
        return Err(Error::last_os_error());
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_enforcement_is_a_no_op() {
        // Without `enforce`, no syscalls happen, so this must succeed even for bogus ids.
        assert!(drop_privileges(false, uid_t::MAX, gid_t::MAX).is_ok());
    }
}
