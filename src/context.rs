//! Run configuration assembled from CLI flags, independent of any one worker.
//!
//! `Context` plays the role of the original's `struct ctx`, minus the fields that only ever held
//! intermediate parse state (`device_trans`, the raw `--ring-size` string).

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::TrafgenError;

#[derive(Debug, Clone)]
pub struct Context {
    pub device: String,
    pub randomize: bool,
    pub jumbo_support: bool,
    pub verbose: bool,
    pub smoke_test: Option<Ipv4Addr>,
    pub enforce: bool,
    pub uid: u32,
    pub gid: u32,
    pub kernel_pull: Duration,
    pub num: Option<u64>,
    pub gap: Duration,
    pub reserve_size: usize,
    pub cpus: usize,
    pub seed: Option<u64>,
    /// Bytes of link-layer header the precheck allows beyond the device MTU before rejecting a
    /// packet (`mtu + 14` in the original's fixed check). Caller-settable instead of hardcoded.
    pub header_overhead: u32,
}

impl Context {
    /// Forces `cpus` down to 1 the way the original does for two distinct reasons: a nonzero
    /// interpacket `gap` would be thrown off by scheduling across cores, and a `--smoke-test` run
    /// must serialize its ICMP probes against a single transmit stream.
    pub fn normalize_cpus(&mut self) {
        if !self.gap.is_zero() || self.smoke_test.is_some() {
            self.cpus = 1;
        }
        if let Some(num) = self.num {
            if num > 0 && num <= self.cpus as u64 {
                self.cpus = 1;
            }
        }
    }

    pub fn slow_path(&self) -> bool {
        !self.gap.is_zero() || self.smoke_test.is_some()
    }
}

/// Parses a `--ring-size` argument of the form `<digits><KiB|MiB|GiB>`, e.g. `"4MiB"`.
pub fn parse_ring_size(raw: &str) -> Result<usize, TrafgenError> {
    let (digits, multiplier) = if let Some(d) = raw.strip_suffix("KiB") {
        (d, 1usize << 10)
    } else if let Some(d) = raw.strip_suffix("MiB") {
        (d, 1usize << 20)
    } else if let Some(d) = raw.strip_suffix("GiB") {
        (d, 1usize << 30)
    } else {
        return Err(TrafgenError::Fatal(format!(
            "syntax error in ring size param: {raw:?}"
        )));
    };

    let count: usize = digits
        .parse()
        .map_err(|_| TrafgenError::Fatal(format!("syntax error in ring size param: {raw:?}")))?;

    Ok(count * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit_suffix() {
        assert_eq!(parse_ring_size("4KiB").unwrap(), 4 << 10);
        assert_eq!(parse_ring_size("2MiB").unwrap(), 2 << 20);
        assert_eq!(parse_ring_size("1GiB").unwrap(), 1 << 30);
    }

    #[test]
    fn rejects_a_missing_unit() {
        assert!(parse_ring_size("1024").is_err());
    }

    #[test]
    fn rejects_a_non_numeric_count() {
        assert!(parse_ring_size("xMiB").is_err());
    }

    #[test]
    fn gap_or_smoke_test_forces_single_cpu() {
        let mut ctx = Context {
            device: "eth0".into(),
            randomize: false,
            jumbo_support: false,
            verbose: false,
            smoke_test: None,
            enforce: false,
            uid: 0,
            gid: 0,
            kernel_pull: Duration::from_micros(10),
            num: None,
            gap: Duration::from_micros(1000),
            reserve_size: 0,
            cpus: 4,
            seed: None,
            header_overhead: 14,
        };
        ctx.normalize_cpus();
        assert_eq!(ctx.cpus, 1);
    }

    #[test]
    fn small_budget_forces_single_cpu() {
        let mut ctx = Context {
            device: "eth0".into(),
            randomize: false,
            jumbo_support: false,
            verbose: false,
            smoke_test: None,
            enforce: false,
            uid: 0,
            gid: 0,
            kernel_pull: Duration::from_micros(10),
            num: Some(2),
            gap: Duration::ZERO,
            reserve_size: 0,
            cpus: 4,
            seed: None,
            header_overhead: 14,
        };
        ctx.normalize_cpus();
        assert_eq!(ctx.cpus, 1);
    }
}
