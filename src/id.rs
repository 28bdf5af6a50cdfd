//! Job identifier generation.
//!
//! Time-ordered ids use the UUIDv7 layout: a 48-bit unix millisecond
//! timestamp, the version nibble, a 12-bit per-process sequence in the
//! `rand_a` field, the variant bits, and 62 random bits.
//!
//! Within one process the `(timestamp, sequence)` pair only moves forward: a
//! single packed `AtomicU64` is advanced with a compare-and-swap loop, so
//! concurrent callers never observe the same pair and a stalled or regressing
//! wall clock keeps the stored timestamp instead of going backwards. Across
//! processes uniqueness rests on the random bits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::model::JobId;

const SEQ_BITS: u32 = 12;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const TS_MASK: u64 = (1 << 48) - 1;

/// Packed `timestamp << 12 | sequence` of the last id handed out.
static LAST: AtomicU64 = AtomicU64::new(0);

/// Hash used for content-addressed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameHash {
    /// UUIDv3.
    Md5,
    /// UUIDv5.
    Sha1,
}

/// Generate a fresh time-ordered job id.
pub fn generate() -> JobId {
    let (ts, seq) = advance(&LAST, now_millis());
    JobId(encode(ts, seq, rand::random()))
}

/// Deterministic id derived from `name` within `namespace`.
pub fn from_name(namespace: &Uuid, name: &[u8], hash: NameHash) -> JobId {
    match hash {
        NameHash::Md5 => JobId(Uuid::new_v3(namespace, name)),
        NameHash::Sha1 => JobId(Uuid::new_v5(namespace, name)),
    }
}

impl JobId {
    pub fn generate() -> Self {
        generate()
    }

    pub fn from_name(namespace: &Uuid, name: &[u8], hash: NameHash) -> Self {
        from_name(namespace, name, hash)
    }
}

fn now_millis() -> u64 {
    // A clock before the epoch reads as 0; the stored timestamp then holds.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        & TS_MASK
}

/// Move `state` past its current value for a clock reading of `now`,
/// returning the `(timestamp, sequence)` pair this caller owns.
fn advance(state: &AtomicU64, now: u64) -> (u64, u64) {
    let mut current = state.load(Ordering::Acquire);
    loop {
        let last_ts = current >> SEQ_BITS;
        let next = if now > last_ts {
            now << SEQ_BITS
        } else {
            let seq = ((current & SEQ_MASK) + 1) & SEQ_MASK;
            (last_ts << SEQ_BITS) | seq
        };
        match state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return (next >> SEQ_BITS, next & SEQ_MASK),
            Err(observed) => current = observed,
        }
    }
}

fn encode(ts: u64, seq: u64, random: [u8; 8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..6].copy_from_slice(&ts.to_be_bytes()[2..]);
    bytes[6] = 0x70 | ((seq >> 8) as u8 & 0x0f);
    bytes[7] = seq as u8;
    bytes[8..].copy_from_slice(&random);
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_carry_version_and_variant() {
        let id = generate();
        assert_eq!(id.0.get_version_num(), 7);
        assert_eq!(id.0.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn sequence_resets_when_clock_advances() {
        let state = AtomicU64::new(0);
        assert_eq!(advance(&state, 1_000), (1_000, 0));
        assert_eq!(advance(&state, 1_000), (1_000, 1));
        assert_eq!(advance(&state, 1_001), (1_001, 0));
    }

    #[test]
    fn regressing_clock_holds_timestamp_and_bumps_sequence() {
        let state = AtomicU64::new(0);
        advance(&state, 5_000);
        assert_eq!(advance(&state, 4_000), (5_000, 1));
        assert_eq!(advance(&state, 4_999), (5_000, 2));
        assert_eq!(advance(&state, 5_000), (5_000, 3));
    }

    #[test]
    fn sequence_wraps_modulo_4096() {
        let state = AtomicU64::new((7 << SEQ_BITS) | SEQ_MASK);
        assert_eq!(advance(&state, 7), (7, 0));
    }

    #[test]
    fn encoded_fields_round_trip_through_bytes() {
        let uuid = encode(0x0123_4567_89ab, 0xabc, [0xff; 8]);
        let b = uuid.as_bytes();
        assert_eq!(&b[..6], &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);
        assert_eq!(b[6], 0x7a);
        assert_eq!(b[7], 0xbc);
        assert_eq!(b[8], 0xbf);
    }

    #[test]
    fn sequential_ids_are_strictly_increasing() {
        // A private counter: the global one is shared with concurrently
        // running tests and may wrap within a millisecond.
        let state = AtomicU64::new(0);
        let now = now_millis();
        let ids: Vec<Uuid> = (0..1_000)
            .map(|_| {
                let (ts, seq) = advance(&state, now);
                encode(ts, seq, rand::random())
            })
            .collect();
        for pair in ids.windows(2) {
            // Ordering of the (timestamp, sequence) prefix alone.
            assert!(pair[0].as_bytes()[..8] < pair[1].as_bytes()[..8]);
        }
    }

    #[test]
    fn concurrent_advances_never_repeat_a_pair() {
        let state = Arc::new(AtomicU64::new(0));
        let now = now_millis();
        let pairs = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let pairs = Arc::clone(&pairs);
                std::thread::spawn(move || {
                    let local: Vec<(u64, u64)> = (0..250).map(|_| advance(&state, now)).collect();
                    let mut set = pairs.lock().unwrap();
                    for pair in local {
                        assert!(set.insert(pair), "duplicate (timestamp, sequence)");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pairs.lock().unwrap().len(), 2_000);
    }

    #[test]
    fn generated_ids_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| generate()).collect::<Vec<_>>()))
            .collect();
        let ids: HashSet<JobId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 2_000);
    }

    #[test]
    fn name_based_ids_are_deterministic_per_hash() {
        let ns = Uuid::NAMESPACE_URL;
        let a = from_name(&ns, b"https://example.com/report", NameHash::Sha1);
        let b = from_name(&ns, b"https://example.com/report", NameHash::Sha1);
        let c = from_name(&ns, b"https://example.com/report", NameHash::Md5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.get_version_num(), 5);
        assert_eq!(c.0.get_version_num(), 3);
        assert!(a.created_at().is_none());
    }
}
