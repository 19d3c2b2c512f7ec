//! Fork-per-CPU worker orchestration: CPU affinity, the CFG/CHK/RES rescale barrier, and the
//! dispatch into the fast or slow transmit path. Grounded on `trafgen.c`'s `main_loop`,
//! `xmit_packet_precheck`, `__wait_and_sum_others`, and `__correct_global_delta`.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use libc::cpu_set_t;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::TrafgenError;
use crate::packet::CompiledPackets;
use crate::privilege;
use crate::ring::{self, RingSettings};
use crate::shmem::SharedStats;
use crate::slow;
use crate::smoke::SmokeProbe;
use crate::socket::{self, Socket};
use crate::stats::{STATE_CFG, STATE_CHK, STATE_RES};

/// Set from the process's `SIGINT`/`SIGHUP` handler; every transmit loop polls it cooperatively.
/// The original folds both signals into the same handler body (`SIGHUP` falls through to the
/// `default` case alongside everything else, a no-op); here both are simply registered to flip
/// this same flag, which is the faithful behavior, not a translation of the fallthrough syntax.
pub static SIGINT_FLAG: AtomicBool = AtomicBool::new(false);

/// Everything a single worker needs to run independently of the others, except for the shared
/// stat region it coordinates through.
pub struct WorkerPlan {
    pub cpu: usize,
    pub cpus: usize,
    pub if_name: String,
    pub budget: Option<u64>,
    pub randomize: bool,
    pub gap: Duration,
    pub slow: bool,
    pub reserve_size: usize,
    pub jumbo_support: bool,
    pub smoke_remote: Option<Ipv4Addr>,
    pub mtu: u32,
    pub header_overhead: u32,
    pub seed: u64,
    pub kernel_pull: Duration,
    pub enforce: bool,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerResult {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub elapsed: Duration,
}

/// Pins the calling process to a single CPU core, matching the original's `cpu_affinity(i)` call
/// right after `fork()`.
pub fn pin_to_cpu(cpu: usize) -> std::io::Result<()> {
    unsafe {
        let mut set: cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Rejects any compiled packet that can't be sent as-is: oversized for the device MTU plus
/// header overhead, or too short to hold a minimal Ethernet header. Mirrors the bounds checked in
/// `xmit_packet_precheck`'s per-packet loop.
pub fn precheck(
    packets: &CompiledPackets,
    mtu: u32,
    header_overhead: u32,
) -> Result<(), TrafgenError> {
    for (index, template) in packets.templates.iter().enumerate() {
        let len = template.len();
        if len > (mtu + header_overhead) as usize {
            return Err(TrafgenError::Integrity {
                index,
                len,
                reason: format!(
                    "exceeds device mtu ({mtu}) plus header overhead ({header_overhead})"
                ),
            });
        }
        if len <= 14 {
            return Err(TrafgenError::Integrity {
                index,
                len,
                reason: "shorter than a minimal Ethernet header".into(),
            });
        }
    }
    Ok(())
}

/// Barrier phase 1 (`CFG`): publish this worker's local packet count and byte total, then wait
/// for every other worker to do the same, and return the sum across all of them.
fn wait_and_sum_cfg(shared: &SharedStats, cpu: usize, local_plen: u64, local_bytes: u64) -> u64 {
    unsafe {
        let slot = shared.slot_mut(cpu);
        (*slot).cf_packets = local_plen;
        (*slot).cf_bytes = local_bytes;
    }
    shared.slot(cpu).state.fetch_or(STATE_CFG, Ordering::Release);

    let mut total = local_plen;
    for i in 0..shared.cpus() {
        if i == cpu {
            continue;
        }
        let other = shared.slot(i);
        while other.state.load(Ordering::Acquire) & STATE_CFG == 0
            && !SIGINT_FLAG.load(Ordering::Relaxed)
        {
            std::thread::yield_now();
        }
        total += other.cf_packets;
    }
    total
}

/// Barrier phase 2 (`CHK`): publish this worker's rescaled budget, wait for the others, sum their
/// deltas, and — if this worker is the single one selected to absorb the rounding remainder —
/// apply the correction. Mirrors `__correct_global_delta`.
fn correct_global_delta(shared: &SharedStats, cpu: usize, rescaled: u64, orig: u64) -> u64 {
    unsafe {
        let slot = shared.slot_mut(cpu);
        (*slot).cd_packets = rescaled;
    }
    shared
        .slot(cpu)
        .state
        .fetch_or(STATE_CHK | STATE_CFG, Ordering::Release);

    let mut total = rescaled;
    for i in 0..shared.cpus() {
        if i == cpu {
            continue;
        }
        let other = shared.slot(i);
        while other.state.load(Ordering::Acquire) & STATE_CHK == 0
            && !SIGINT_FLAG.load(Ordering::Relaxed)
        {
            std::thread::yield_now();
        }
        total += other.cd_packets;
    }

    let delta_correction: i64 = if total > orig {
        -((total - orig) as i64)
    } else if total < orig {
        (orig - total) as i64
    } else {
        0
    };

    let mut cpu_sel: Option<usize> = None;
    for i in 0..shared.cpus() {
        let cd = shared.slot(i).cd_packets;
        if cd > 0 && cd as i64 + delta_correction > 0 {
            cpu_sel = Some(i);
            break;
        }
    }

    if cpu_sel == Some(cpu) {
        (rescaled as i64 + delta_correction).max(0) as u64
    } else {
        rescaled
    }
}

/// Computes this worker's rescaled share of `orig` (the user-requested total packet budget)
/// against the combined template count of every worker, applying the same rounding-delta
/// correction the original performs across the barrier. `orig == 0` means "unbounded", and
/// rescaling is skipped entirely, matching `ctx->num > 0` guarding the whole block.
fn rescale_budget(
    shared: &SharedStats,
    cpu: usize,
    local_plen: u64,
    local_bytes: u64,
    orig: Option<u64>,
) -> Option<u64> {
    let plen_total = wait_and_sum_cfg(shared, cpu, local_plen, local_bytes);
    let orig = orig?;
    if plen_total == 0 {
        return Some(0);
    }
    let rescaled = ((local_plen as f64 / plen_total as f64) * orig as f64).round() as u64;
    Some(correct_global_delta(shared, cpu, rescaled, orig))
}

/// Runs one worker end to end: rescale against its siblings, precheck its packets, open its
/// socket/ring, drop privileges (if `plan.enforce`), transmit via the fast or slow path, and
/// publish its final stats before returning. Privileges are dropped per-worker, after the raw
/// socket / `PACKET_TX_RING` is already open, so `-u`/`-g` still has `CAP_NET_RAW` available when
/// it needs it.
pub fn run(
    plan: &WorkerPlan,
    shared: &SharedStats,
    packets: &mut CompiledPackets,
) -> Result<WorkerResult, TrafgenError> {
    let local_plen = packets.len() as u64;
    let local_bytes = packets.total_bytes();

    let budget = rescale_budget(shared, plan.cpu, local_plen, local_bytes, plan.budget);

    if packets.is_empty() {
        shared.slot(plan.cpu).state.fetch_or(STATE_RES, Ordering::Release);
        return Ok(WorkerResult::default());
    }

    precheck(packets, plan.mtu, plan.header_overhead)?;

    let mut rng = StdRng::seed_from_u64(plan.seed);
    let start = Instant::now();

    let (tx_packets, tx_bytes) = if plan.slow {
        let socket = Socket::from_if_name(&plan.if_name, socket::PF_PACKET)?;
        let mut smoke = match plan.smoke_remote {
            Some(remote) => Some(SmokeProbe::new(remote)?),
            None => None,
        };
        privilege::drop_privileges(plan.enforce, plan.uid, plan.gid)?;
        let outcome = slow::run(
            &socket,
            packets,
            plan.randomize,
            plan.gap,
            budget,
            &SIGINT_FLAG,
            &mut rng,
            smoke.as_mut(),
        )?;
        if let Some(alert) = &outcome.smoke_alert {
            tracing::warn!(
                bytes = alert.len(),
                "remote host unresponsive to ICMP probes after last send"
            );
        }
        (outcome.tx_packets, outcome.tx_bytes)
    } else {
        let settings = RingSettings {
            if_name: plan.if_name.clone(),
            reserve_size: plan.reserve_size,
            jumbo_support: plan.jumbo_support,
        };
        let tx_ring = ring::TxRing::build(&settings)?;
        tx_ring.arm_kernel_pull(plan.kernel_pull)?;
        privilege::drop_privileges(plan.enforce, plan.uid, plan.gid)?;
        let result = ring::run(&tx_ring, packets, plan.randomize, budget, &SIGINT_FLAG, &mut rng);
        ring::TxRing::disarm_kernel_pull();
        result
    };

    let elapsed = start.elapsed();

    unsafe {
        let slot = shared.slot_mut(plan.cpu);
        (*slot).tx_packets = tx_packets;
        (*slot).tx_bytes = tx_bytes;
        (*slot).tv_sec = elapsed.as_secs();
        (*slot).tv_usec = elapsed.subsec_micros() as u64;
    }
    shared.slot(plan.cpu).state.fetch_or(STATE_RES, Ordering::Release);

    Ok(WorkerResult {
        tx_packets,
        tx_bytes,
        elapsed,
    })
}

/// Blocks until worker `cpu`'s `RES` bit is observed, matching the parent's post-`wait()` summary
/// loop.
pub fn wait_for_result(shared: &SharedStats, cpu: usize) -> WorkerResult {
    let slot = shared.slot(cpu);
    while slot.state.load(Ordering::Acquire) & STATE_RES == 0 {
        std::thread::yield_now();
    }
    WorkerResult {
        tx_packets: slot.tx_packets,
        tx_bytes: slot.tx_bytes,
        elapsed: Duration::new(slot.tv_sec, (slot.tv_usec * 1000) as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{CompiledPackets, DynFields, PacketTemplate};

    #[test]
    fn precheck_rejects_undersized_packets() {
        let packets = CompiledPackets {
            templates: vec![PacketTemplate::new(vec![0u8; 10])],
            dyn_fields: vec![DynFields::default()],
        };
        let err = precheck(&packets, 1500, 14).unwrap_err();
        assert!(matches!(err, TrafgenError::Integrity { index: 0, .. }));
    }

    #[test]
    fn precheck_rejects_oversized_packets() {
        let packets = CompiledPackets {
            templates: vec![PacketTemplate::new(vec![0u8; 2000])],
            dyn_fields: vec![DynFields::default()],
        };
        let err = precheck(&packets, 1500, 14).unwrap_err();
        assert!(matches!(err, TrafgenError::Integrity { index: 0, .. }));
    }

    #[test]
    fn precheck_accepts_a_well_formed_packet() {
        let packets = CompiledPackets {
            templates: vec![PacketTemplate::new(vec![0u8; 64])],
            dyn_fields: vec![DynFields::default()],
        };
        assert!(precheck(&packets, 1500, 14).is_ok());
    }

    #[test]
    fn single_worker_rescale_keeps_the_full_budget() {
        let shared = SharedStats::new(1).unwrap();
        let budget = rescale_budget(&shared, 0, 10, 640, Some(100));
        assert_eq!(budget, Some(100));
    }

    #[test]
    fn no_budget_means_unbounded_after_rescale() {
        let shared = SharedStats::new(1).unwrap();
        let budget = rescale_budget(&shared, 0, 10, 640, None);
        assert_eq!(budget, None);
    }
}
