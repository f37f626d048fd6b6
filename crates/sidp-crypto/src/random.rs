//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::CipherError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CipherError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CipherError> {
    getrandom::getrandom(buf).map_err(|_| CipherError::RandomFailed)
}

/// Generate a random 16-byte array.
///
/// # Errors
///
/// Returns [`CipherError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_16() -> Result<[u8; 16], CipherError> {
    let mut buf = [0u8; 16];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random `u32`.
///
/// # Errors
///
/// Returns [`CipherError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_u32() -> Result<u32, CipherError> {
    let mut buf = [0u8; 4];
    fill_random(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`CipherError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_32() -> Result<[u8; 32], CipherError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_values_differ() {
        let a = random_32().unwrap();
        let b = random_32().unwrap();
        assert_ne!(a, b);
        assert_ne!(random_16().unwrap(), [0u8; 16]);
    }

    #[test]
    fn test_random_u32_varies() {
        let draws: Vec<u32> = (0..8).map(|_| random_u32().unwrap()).collect();
        assert!(draws.iter().any(|&v| v != draws[0]));
    }
}
