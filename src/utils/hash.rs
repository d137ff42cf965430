//! Non-cryptographic hashing for human pairing verification.
//!
//! The verification code shown to both users after a connection opens is a
//! cyrb53 digest of the two transport-security fingerprints. cyrb53 is a
//! small 53-bit hash; it is NOT collision resistant and must never be used
//! for anything security critical beyond eyeball comparison.

/// cyrb53 digest of `input` (53 bits of output in a `u64`).
///
/// Operates on UTF-16 code units, matching cyrb53's canonical definition,
/// so both endpoints derive the same code whatever their platform;
/// fingerprint strings are plain ASCII in practice.
pub fn cyrb53(input: &str, seed: u32) -> u64 {
    let mut h1: u32 = 0xdead_beef ^ seed;
    let mut h2: u32 = 0x41c6_ce57 ^ seed;

    for unit in input.encode_utf16() {
        let ch = unit as u32;
        h1 = (h1 ^ ch).wrapping_mul(2_654_435_761);
        h2 = (h2 ^ ch).wrapping_mul(1_597_334_677);
    }

    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(2_246_822_507)
        ^ (h2 ^ (h2 >> 13)).wrapping_mul(3_266_489_909);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(2_246_822_507)
        ^ (h1 ^ (h1 >> 13)).wrapping_mul(3_266_489_909);

    u64::from(h2 & 0x1f_ffff) * 4_294_967_296 + u64::from(h1)
}

/// Render a connection verification code: the caller's fingerprint followed
/// by the callee's, hashed and left-padded to 16 lowercase hex digits.
pub fn connection_hash(caller_fingerprint: &str, callee_fingerprint: &str) -> String {
    let combined = format!("{caller_fingerprint}{callee_fingerprint}");
    format!("{:016x}", cyrb53(&combined, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyrb53_is_deterministic() {
        let a = cyrb53("sha-256 AA:BB:CC", 0);
        let b = cyrb53("sha-256 AA:BB:CC", 0);
        assert_eq!(a, b);
        assert_ne!(a, cyrb53("sha-256 AA:BB:CD", 0));
    }

    #[test]
    fn cyrb53_stays_within_53_bits() {
        for input in ["", "a", "fingerprint", "AA:BB:CC:DD:EE:FF"] {
            assert!(cyrb53(input, 0) < (1u64 << 53));
        }
    }

    #[test]
    fn cyrb53_seed_changes_digest() {
        assert_ne!(cyrb53("same input", 0), cyrb53("same input", 1));
    }

    #[test]
    fn connection_hash_is_16_hex_digits() {
        let hash = connection_hash("AA:BB", "CC:DD");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn connection_hash_depends_on_fingerprint_order() {
        // Both sides must concatenate caller-then-callee or the codes differ.
        assert_ne!(connection_hash("AA", "BB"), connection_hash("BB", "AA"));
    }
}
