//! Crate-wide error taxonomy. Library code returns `Result<T, TrafgenError>`; the binary converts
//! these to `anyhow::Error` at the top, same split as the teacher's socket-only `io::Result`
//! generalized to cover config parsing and precheck failures the original treated as `panic()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrafgenError {
    /// An unrecoverable condition the original would have called `panic()` for: a malformed
    /// config literal, a missing device, a worker that can't be spawned.
    #[error("{0}")]
    Fatal(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// One packet template failed the fast/slow-path precheck (`xmit_packet_precheck`):
    /// `index` is its position in the compiled set, `len` its byte length, `reason` why it
    /// was rejected.
    #[error("packet {index} ({len} bytes) rejected: {reason}")]
    Integrity {
        index: usize,
        len: usize,
        reason: String,
    },
}
