//! Driver: parses CLI flags, validates the target device and packet config, forks one worker per
//! requested CPU, waits for them, and prints the aggregate transmit summary. Mirrors
//! `trafgen.c`'s `main()`.

use std::fs;
use std::io::Read;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trafgen::cli::Cli;
use trafgen::context::{parse_ring_size, Context};
use trafgen::{config, iface, shmem::SharedStats, worker};

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("trafgen=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trafgen=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

extern "C" fn on_signal(_: libc::c_int) {
    worker::SIGINT_FLAG.store(true, Ordering::Relaxed);
}

fn register_signal_handlers() -> Result<()> {
    unsafe {
        if libc::signal(libc::SIGINT, on_signal as libc::sighandler_t) == libc::SIG_ERR {
            bail!("failed to register SIGINT handler");
        }
        if libc::signal(libc::SIGHUP, on_signal as libc::sighandler_t) == libc::SIG_ERR {
            bail!("failed to register SIGHUP handler");
        }
    }
    Ok(())
}

fn read_config(path: &std::path::Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading config from stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))
    }
}

fn build_context(cli: &Cli) -> Result<Context> {
    let mtu = iface::mtu(&cli.dev).with_context(|| format!("device {:?} has no MTU", cli.dev))?;
    if mtu == 0 {
        bail!("{:?} is not a networking device", cli.dev);
    }
    if !cli.rfraw
        && !iface::is_up_and_running(&cli.dev)
            .with_context(|| format!("querying link state of {:?}", cli.dev))?
    {
        bail!("networking device {:?} is not running", cli.dev);
    }

    let reserve_size = match &cli.ring_size {
        Some(raw) => parse_ring_size(raw).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        None => 0,
    };

    let smoke_test = cli
        .smoke_test
        .as_deref()
        .map(|s| s.parse::<Ipv4Addr>())
        .transpose()
        .context("parsing --smoke-test address")?;

    let cpus_online = num_cpus_online();
    let cpus = cli.cpus.unwrap_or(cpus_online).clamp(1, cpus_online);

    let enforce = cli.user.is_some() || cli.group.is_some();

    let mut ctx = Context {
        device: cli.dev.clone(),
        randomize: cli.rand,
        jumbo_support: cli.jumbo_support,
        verbose: cli.verbose,
        smoke_test,
        enforce,
        uid: cli.user.unwrap_or_else(|| unsafe { libc::getuid() }),
        gid: cli.group.unwrap_or_else(|| unsafe { libc::getgid() }),
        kernel_pull: Duration::from_micros(cli.kernel_pull),
        num: cli.num.filter(|&n| n > 0),
        gap: Duration::from_micros(cli.gap.unwrap_or(0)),
        reserve_size,
        cpus,
        seed: cli.seed,
        header_overhead: 14,
    };
    ctx.normalize_cpus();

    Ok(ctx)
}

fn num_cpus_online() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        1
    }
}

fn generate_seed() -> u64 {
    if let Ok(mut f) = fs::File::open("/dev/urandom") {
        let mut buf = [0u8; 8];
        if Read::read_exact(&mut f, &mut buf).is_ok() {
            return u64::from_ne_bytes(buf);
        }
    }
    std::process::id() as u64
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = build_context(&cli)?;

    let config_text = read_config(&cli.conf)?;
    let packets = config::parse_all(&config_text).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    register_signal_handlers()?;

    let shared = SharedStats::new(ctx.cpus).context("setting up shared stat region")?;

    tracing::info!(
        packets = packets.len(),
        bytes = packets.total_bytes(),
        cpus = ctx.cpus,
        "scheduling transmit run"
    );
    println!("Running! Hang up with ^C!\n");

    let seed_base = ctx.seed.unwrap_or_else(generate_seed);

    let mut children = Vec::with_capacity(ctx.cpus);
    for cpu in 0..ctx.cpus {
        let pid = unsafe { libc::fork() };
        match pid {
            0 => {
                if let Err(e) = worker::pin_to_cpu(cpu) {
                    tracing::warn!(cpu, error = %e, "failed to pin worker to CPU");
                }

                let plan = worker::WorkerPlan {
                    cpu,
                    cpus: ctx.cpus,
                    if_name: ctx.device.clone(),
                    budget: ctx.num,
                    randomize: ctx.randomize,
                    gap: ctx.gap,
                    slow: ctx.slow_path(),
                    reserve_size: ctx.reserve_size,
                    jumbo_support: ctx.jumbo_support,
                    smoke_remote: ctx.smoke_test,
                    mtu: iface::mtu(&ctx.device).unwrap_or(1500),
                    header_overhead: ctx.header_overhead,
                    seed: seed_base.wrapping_add(cpu as u64),
                    kernel_pull: ctx.kernel_pull,
                    enforce: ctx.enforce,
                    uid: ctx.uid,
                    gid: ctx.gid,
                };

                let mut packets = packets.clone();
                match worker::run(&plan, &shared, &mut packets) {
                    Ok(_) => std::process::exit(0),
                    Err(e) => {
                        tracing::error!(cpu, error = %e, "worker failed");
                        std::process::exit(1);
                    }
                }
            }
            -1 => bail!("failed to fork worker {cpu}"),
            child => children.push(child),
        }
    }

    let mut total_packets = 0u64;
    let mut total_bytes = 0u64;
    for (cpu, pid) in children.iter().enumerate() {
        let mut status = 0;
        unsafe {
            libc::waitpid(*pid, &mut status, 0);
        }
        let result = worker::wait_for_result(&shared, cpu);
        total_packets += result.tx_packets;
        total_bytes += result.tx_bytes;
        println!(
            "{:>12} sec, {:>6} usec on CPU{cpu} ({} packets)",
            result.elapsed.as_secs(),
            result.elapsed.subsec_micros(),
            result.tx_packets
        );
    }

    println!();
    println!("{total_packets:>12} packets outgoing");
    println!("{total_bytes:>12} bytes outgoing");

    Ok(())
}
