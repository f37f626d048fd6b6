//! Constant-time comparisons.
//!
//! Used wherever secret or attacker-influenced bytes are compared: nonce
//! echoes during authentication and associated-data digests.

use subtle::ConstantTimeEq;

/// Constant-time comparison of byte slices.
///
/// Returns `true` if slices are equal, `false` otherwise.
/// Execution time depends only on slice length, not content.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Timing-safe 16-byte array comparison.
#[must_use]
#[inline(never)]
pub fn verify_16(a: &[u8; 16], b: &[u8; 16]) -> bool {
    ct_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ct_eq_same() {
        assert!(ct_eq(b"same bytes", b"same bytes"));
    }

    #[test]
    fn test_ct_eq_different() {
        assert!(!ct_eq(b"bytes one", b"bytes two"));
    }

    #[test]
    fn test_ct_eq_different_lengths() {
        assert!(!ct_eq(b"short", b"longer input"));
    }

    #[test]
    fn test_verify_16() {
        let a = [7u8; 16];
        let mut b = a;
        assert!(verify_16(&a, &b));
        b[15] ^= 1;
        assert!(!verify_16(&a, &b));
    }
}
