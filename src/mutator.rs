//! Applies counter, random, and checksum mutations to a packet payload in place.
//!
//! Order is fixed and load-bearing: counters, then randomizers, then checksums, so that
//! checksums always cover the final bytes (`trafgen.c`: `apply_counter` / `apply_randomizer` /
//! `apply_csum16`, called in that order from both transmit paths).

use rand::RngCore;

use crate::checksum::{internet_checksum, pseudo_header_checksum, TransportProto};
use crate::packet::{ChecksumKind, Counter, CounterKind, DynFields};

fn apply_counter(counter: &mut Counter, payload: &mut [u8]) {
    let relative = counter.val as i32 - counter.min as i32;

    let next_relative: u8 = match counter.kind {
        CounterKind::Inc => {
            let span = counter.max as i32 - counter.min as i32 + 1;
            ((relative + counter.inc as i32) % span) as u8
        }
        CounterKind::Dec => {
            // Reproduces `trafgen.c`'s `(val - inc) % (min - max + 1)` verbatim, including its
            // almost-certainly-wrong modulus (it should mirror INC's `max - min + 1`; see Open
            // Question (a)). The divisor is usually zero or negative since `min <= max`; C's
            // truncating `%` followed by a narrowing assignment to `uint8_t` is reproduced here
            // with plain `i32` arithmetic and an `as u8` cast, not "fixed" with a sound modulus.
            let modulus = counter.min as i32 - counter.max as i32 + 1;
            let raw = relative - counter.inc as i32;
            if modulus == 0 {
                raw as u8
            } else {
                (raw % modulus) as u8
            }
        }
    };

    payload[counter.off] = next_relative;
    counter.val = counter.min.wrapping_add(next_relative);
}

fn apply_randomizer(off: usize, payload: &mut [u8], rng: &mut dyn RngCore) {
    payload[off] = (rng.next_u32() & 0xff) as u8;
}

fn apply_checksum(kind: ChecksumKind, off: usize, from: usize, to: usize, payload: &mut [u8]) {
    payload[off] = 0;
    payload[off + 1] = 0;

    let sum = match kind {
        ChecksumKind::Ip => {
            let to = to.min(payload.len() - 1);
            internet_checksum(&payload[from..=to])
        }
        ChecksumKind::Udp => pseudo_header_checksum(&payload[from..], to - from, TransportProto::Udp),
        ChecksumKind::Tcp => pseudo_header_checksum(&payload[from..], to - from, TransportProto::Tcp),
    };

    payload[off..off + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Applies every dynamic field of `fields` to `payload`, in the fixed counters → randomizers →
/// checksums order. Callers are expected to have validated offsets at precheck time; this
/// function does not re-check bounds on the hot path (debug builds will panic on misuse).
pub fn apply(fields: &mut DynFields, payload: &mut [u8], rng: &mut dyn RngCore) {
    for counter in &mut fields.counters {
        apply_counter(counter, payload);
    }
    for randomizer in &fields.randomizers {
        apply_randomizer(randomizer.off, payload, rng);
    }
    for checksum in &fields.checksums {
        apply_checksum(checksum.kind, checksum.off, checksum.from, checksum.to, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Randomizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn inc_counter_cycles_and_writes_relative_value() {
        let mut counter = Counter::new(0, 0, 3, 1, CounterKind::Inc);
        let mut payload = [0u8; 1];
        let expected = [0u8, 1, 2, 3, 0, 1, 2, 3];
        for &want in &expected {
            apply_counter(&mut counter, &mut payload);
            assert_eq!(payload[0], want);
            assert!(counter.val >= counter.min && counter.val <= counter.max);
        }
    }

    #[test]
    fn inc_counter_full_cycle_returns_to_start() {
        // A full cycle only guarantees a return to start when inc divides the span evenly;
        // inc=1 gives that guarantee for any span.
        let mut counter = Counter::new(0, 10, 20, 1, CounterKind::Inc);
        let mut payload = [0u8; 1];
        let start = counter.val;
        let span = (counter.max - counter.min) as usize + 1;
        for _ in 0..span {
            apply_counter(&mut counter, &mut payload);
        }
        assert_eq!(counter.val, start);
    }

    #[test]
    fn randomizer_writes_into_declared_offset_only() {
        let mut payload = [0xAAu8; 4];
        let mut rng = StdRng::seed_from_u64(42);
        apply_randomizer(2, &mut payload, &mut rng);
        assert_eq!(payload[0], 0xAA);
        assert_eq!(payload[1], 0xAA);
        assert_eq!(payload[3], 0xAA);
    }

    #[test]
    fn checksum_application_is_idempotent() {
        let mut payload = vec![0u8; 20];
        payload[0] = 0x45;
        apply_checksum(ChecksumKind::Ip, 10, 0, 19, &mut payload);
        let first = payload[10..12].to_vec();
        apply_checksum(ChecksumKind::Ip, 10, 0, 19, &mut payload);
        assert_eq!(payload[10..12], first[..]);
    }

    #[test]
    fn ip_checksum_to_is_clamped_to_len_minus_one() {
        let mut payload = vec![0u8; 20];
        payload[0] = 0x45;
        // `to` intentionally beyond the buffer; apply_checksum must clamp, not panic.
        apply_checksum(ChecksumKind::Ip, 10, 0, 999, &mut payload);
    }

    #[test]
    fn fixed_order_counters_then_randomizers_then_checksums() {
        // A checksum placed right after a counter byte must see the counter's *new* value, and
        // a counter placed right after a randomizer must not be perturbed by it.
        let mut fields = DynFields {
            counters: vec![Counter::new(0, 0, 255, 5, CounterKind::Inc)],
            randomizers: vec![Randomizer { off: 1 }],
            checksums: vec![],
        };
        let mut payload = [0u8; 2];
        let mut rng = StdRng::seed_from_u64(7);
        apply(&mut fields, &mut payload, &mut rng);
        assert_eq!(payload[0], 5);
    }
}
