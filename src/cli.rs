//! Command-line flags, one-to-one with the original's `long_options` table where the feature
//! survived (`-p|--cpp`, `-R|--rfraw` are accepted for compatibility but not implemented further;
//! see the module docs on [`crate::worker`] and [`crate::context`]).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "trafgen",
    version,
    about = "Multithreaded zero-copy network packet generator"
)]
pub struct Cli {
    /// Networking device, e.g. eth0
    #[clap(short = 'o', long = "dev", alias = "out", short_alias = 'd')]
    pub dev: String,

    /// Packet configuration file, or "-" for stdin
    #[clap(short = 'i', long = "conf", alias = "in", short_alias = 'c')]
    pub conf: PathBuf,

    /// Run packet config through the C preprocessor first (accepted, not implemented)
    #[clap(short = 'p', long = "cpp")]
    pub cpp: bool,

    /// Support 64KB super jumbo frames (default: 2048B)
    #[clap(short = 'J', long = "jumbo-support")]
    pub jumbo_support: bool,

    /// Inject raw 802.11 frames (accepted, not implemented)
    #[clap(short = 'R', long = "rfraw")]
    pub rfraw: bool,

    /// Probe if the remote host survived a fuzz-tested packet
    #[clap(short = 's', long = "smoke-test", value_name = "IPV4")]
    pub smoke_test: Option<String>,

    /// Number of packets to send before exiting (default: unbounded)
    #[clap(short = 'n', long = "num")]
    pub num: Option<u64>,

    /// Randomize packet selection (default: round robin)
    #[clap(short = 'r', long = "rand")]
    pub rand: bool,

    /// Number of forked workers, capped at the online CPU count
    #[clap(short = 'P', long = "cpus")]
    pub cpus: Option<usize>,

    /// Interpacket gap in microseconds (approximate); forces single-core, slow-path transmit
    #[clap(short = 't', long = "gap")]
    pub gap: Option<u64>,

    /// Manually set the mmap ring size, e.g. "4MiB"
    #[clap(short = 'S', long = "ring-size")]
    pub ring_size: Option<String>,

    /// Kernel batch interval in microseconds
    #[clap(short = 'k', long = "kernel-pull", default_value = "10")]
    pub kernel_pull: u64,

    /// Manually set the PRNG seed (default: reseeded from /dev/urandom)
    #[clap(short = 'E', long = "seed")]
    pub seed: Option<u64>,

    /// Drop privileges to this user id after setup
    #[clap(short = 'u', long = "user")]
    pub user: Option<u32>,

    /// Drop privileges to this group id after setup
    #[clap(short = 'g', long = "group")]
    pub group: Option<u32>,

    /// Be more verbose
    #[clap(short = 'V', long = "verbose")]
    pub verbose: bool,
}
