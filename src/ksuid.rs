//! Time-sortable decision identifiers.
//!
//! An id is 20 bytes, `[u32 BE seconds since EPOCH][16 random bytes]`, rendered as exactly 27
//! base-62 characters (`0-9A-Za-z`, left-padded with `'0'`). Because the timestamp leads and the
//! rendering is fixed-width, ids minted in different whole seconds sort chronologically as plain
//! strings. Ordering within one second is unspecified.
//!
//! The payload comes from the OS CSPRNG: ids double as unguessable correlation tokens, so this
//! module never uses the seedable generators the selection policies use.

use rand::rngs::OsRng;
use rand::TryRngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Offset (unix seconds) subtracted from wall-clock time before encoding.
pub const EPOCH: i64 = 1_400_000_000;

/// Number of random bytes in an id.
pub const PAYLOAD_BYTES: usize = 16;

/// Length of the rendered id.
pub const KSUID_STRING_LENGTH: usize = 27;

const TIMESTAMP_BYTES: usize = 4;
const TOTAL_BYTES: usize = TIMESTAMP_BYTES + PAYLOAD_BYTES;
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Mints decision ids.
///
/// Stateless: the OS entropy source is safe to share across threads, so one generator can be
/// cloned into every model and tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct KsuidGenerator;

impl KsuidGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Mint an id for the current wall-clock second.
    pub fn next(&self) -> Result<String> {
        let mut payload = [0u8; PAYLOAD_BYTES];
        OsRng
            .try_fill_bytes(&mut payload)
            .map_err(|e| Error::Entropy(e.to_string()))?;
        self.next_at(unix_now_secs()?, &payload)
    }

    /// Mint an id from an explicit unix timestamp (seconds) and payload.
    ///
    /// Fails with [`Error::IdRange`] if `unix_secs - EPOCH` does not fit in a `u32` or the
    /// payload is not exactly [`PAYLOAD_BYTES`] long.
    pub fn next_at(&self, unix_secs: i64, payload: &[u8]) -> Result<String> {
        let ts = unix_secs
            .checked_sub(EPOCH)
            .and_then(|delta| u32::try_from(delta).ok())
            .ok_or_else(|| {
                Error::IdRange(format!(
                    "timestamp {unix_secs} outside [{EPOCH}, {}]",
                    EPOCH + i64::from(u32::MAX)
                ))
            })?;
        if payload.len() != PAYLOAD_BYTES {
            return Err(Error::IdRange(format!(
                "payload must be {PAYLOAD_BYTES} bytes, got {}",
                payload.len()
            )));
        }
        let mut raw = [0u8; TOTAL_BYTES];
        raw[..TIMESTAMP_BYTES].copy_from_slice(&ts.to_be_bytes());
        raw[TIMESTAMP_BYTES..].copy_from_slice(payload);
        Ok(base62_encode(&raw))
    }
}

/// Decode the unix timestamp (seconds) of a well-formed id.
///
/// Returns `None` unless `id` is exactly 27 alphabet characters encoding a 20-byte value.
#[must_use]
pub fn timestamp_of(id: &str) -> Option<i64> {
    let raw = base62_decode(id)?;
    let ts = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    Some(EPOCH + i64::from(ts))
}

/// Whether `id` has the shape of a minted id.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    base62_decode(id).is_some()
}

fn unix_now_secs() -> Result<i64> {
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::IdRange(format!("clock before unix epoch: {e}")))?;
    i64::try_from(since.as_secs()).map_err(|_| Error::IdRange("clock overflow".into()))
}

// The 20-byte value is held as five big-endian u32 limbs and repeatedly divided by 62.
// 62^27 > 2^160, so 27 digits always suffice.
fn base62_encode(raw: &[u8; TOTAL_BYTES]) -> String {
    let mut limbs = [0u32; TOTAL_BYTES / 4];
    for (limb, chunk) in limbs.iter_mut().zip(raw.chunks_exact(4)) {
        *limb = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let mut out = [ALPHABET[0]; KSUID_STRING_LENGTH];
    let mut pos = KSUID_STRING_LENGTH;
    while limbs.iter().any(|&l| l != 0) && pos > 0 {
        let mut rem: u64 = 0;
        for limb in limbs.iter_mut() {
            let acc = (rem << 32) | u64::from(*limb);
            *limb = (acc / 62) as u32;
            rem = acc % 62;
        }
        pos -= 1;
        out[pos] = ALPHABET[rem as usize];
    }
    out.iter().map(|&b| b as char).collect()
}

fn base62_decode(id: &str) -> Option<[u8; TOTAL_BYTES]> {
    if id.len() != KSUID_STRING_LENGTH {
        return None;
    }
    let mut limbs = [0u32; TOTAL_BYTES / 4];
    for c in id.bytes() {
        let mut carry = u64::from(digit_of(c)?);
        for limb in limbs.iter_mut().rev() {
            let acc = u64::from(*limb) * 62 + carry;
            *limb = acc as u32;
            carry = acc >> 32;
        }
        if carry != 0 {
            // Larger than 2^160 - 1.
            return None;
        }
    }
    let mut raw = [0u8; TOTAL_BYTES];
    for (chunk, limb) in raw.chunks_exact_mut(4).zip(limbs.iter()) {
        chunk.copy_from_slice(&limb.to_be_bytes());
    }
    Some(raw)
}

fn digit_of(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'Z' => Some(c - b'A' + 10),
        b'a'..=b'z' => Some(c - b'a' + 36),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const T0: i64 = 1_700_000_000;

    #[test]
    fn live_ids_are_27_chars_and_distinct() {
        let g = KsuidGenerator::new();
        let a = g.next().unwrap();
        let b = g.next().unwrap();
        assert_eq!(a.len(), KSUID_STRING_LENGTH);
        assert_eq!(b.len(), KSUID_STRING_LENGTH);
        assert_ne!(a, b);
        assert!(is_valid_id(&a));
    }

    #[test]
    fn extremes_match_reference_rendering() {
        let g = KsuidGenerator::new();
        let min = g.next_at(EPOCH, &[0u8; PAYLOAD_BYTES]).unwrap();
        assert_eq!(min, "000000000000000000000000000");
        let max = g
            .next_at(EPOCH + i64::from(u32::MAX), &[0xFFu8; PAYLOAD_BYTES])
            .unwrap();
        assert_eq!(max, "aWgEPTl1tmebfsQzFP4bxwgy80V");
    }

    #[test]
    fn timestamp_before_epoch_is_rejected() {
        let g = KsuidGenerator::new();
        let err = g.next_at(EPOCH - 1, &[0u8; PAYLOAD_BYTES]).unwrap_err();
        assert!(matches!(err, Error::IdRange(_)));
    }

    #[test]
    fn timestamp_past_u32_is_rejected() {
        let g = KsuidGenerator::new();
        let err = g
            .next_at(EPOCH + i64::from(u32::MAX) + 1, &[0u8; PAYLOAD_BYTES])
            .unwrap_err();
        assert!(matches!(err, Error::IdRange(_)));
        assert!(g.next_at(i64::MIN, &[0u8; PAYLOAD_BYTES]).is_err());
    }

    #[test]
    fn wrong_payload_size_is_rejected() {
        let g = KsuidGenerator::new();
        assert!(matches!(
            g.next_at(T0, &[0u8; 15]),
            Err(Error::IdRange(_))
        ));
        assert!(matches!(
            g.next_at(T0, &[0u8; 17]),
            Err(Error::IdRange(_))
        ));
    }

    #[test]
    fn unsigned_timestamps_above_i32_max_still_sort() {
        // The top bit of the timestamp field must not flip ordering.
        let g = KsuidGenerator::new();
        let below = g.next_at(EPOCH + i64::from(i32::MAX), &[0xFF; 16]).unwrap();
        let above = g.next_at(EPOCH + i64::from(i32::MAX) + 1, &[0; 16]).unwrap();
        assert!(below < above);
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        assert_eq!(timestamp_of(""), None);
        assert_eq!(timestamp_of("00000000000000000000000000"), None);
        assert_eq!(timestamp_of("00000000000000000000000000-"), None);
        // One past the maximum 160-bit value.
        assert_eq!(timestamp_of("aWgEPTl1tmebfsQzFP4bxwgy80W"), None);
        assert_eq!(timestamp_of("zzzzzzzzzzzzzzzzzzzzzzzzzzz"), None);
    }

    #[test]
    fn concurrent_generation_never_repeats() {
        let g = KsuidGenerator::new();
        let ids: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(move || (0..250).map(|_| g.next().unwrap()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    proptest! {
        #[test]
        fn later_seconds_sort_later(
            t in EPOCH..(EPOCH + i64::from(u32::MAX)),
            gap in 1i64..1_000_000,
            p1 in proptest::collection::vec(any::<u8>(), PAYLOAD_BYTES),
            p2 in proptest::collection::vec(any::<u8>(), PAYLOAD_BYTES),
        ) {
            let later = (t + gap).min(EPOCH + i64::from(u32::MAX));
            prop_assume!(later > t);
            let g = KsuidGenerator::new();
            let a = g.next_at(t, &p1).unwrap();
            let b = g.next_at(later, &p2).unwrap();
            prop_assert!(a < b, "{} !< {}", a, b);
            prop_assert_eq!(timestamp_of(&a), Some(t));
            prop_assert_eq!(timestamp_of(&b), Some(later));
        }

        #[test]
        fn same_second_different_payload_differs(
            t in EPOCH..(EPOCH + i64::from(u32::MAX)),
            p1 in proptest::collection::vec(any::<u8>(), PAYLOAD_BYTES),
            p2 in proptest::collection::vec(any::<u8>(), PAYLOAD_BYTES),
        ) {
            prop_assume!(p1 != p2);
            let g = KsuidGenerator::new();
            let a = g.next_at(t, &p1).unwrap();
            let b = g.next_at(t, &p2).unwrap();
            prop_assert_eq!(a.len(), KSUID_STRING_LENGTH);
            prop_assert_ne!(a, b);
        }
    }
}
