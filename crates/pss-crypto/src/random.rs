//! Secure random number generation.
//!
//! Entropy comes from the operating system CSPRNG. Buffers handed out by
//! [`secure_random`] are additionally mixed with the thread-local ChaCha
//! stream and validated, so a misbehaving entropy source surfaces as
//! [`CryptoError::SecureRandom`] instead of predictable output.

use crate::CryptoError;
use rand::RngCore;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::SecureRandom`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::SecureRandom)
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`CryptoError::SecureRandom`] if the underlying OS CSPRNG fails.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    if !is_well_formed(&buf) {
        return Err(CryptoError::SecureRandom);
    }
    Ok(buf)
}

/// Generate `len` validated random bytes.
///
/// OS entropy is checked, then XORed with the thread-local generator and
/// checked again.
///
/// # Errors
///
/// Returns [`CryptoError::SecureRandom`] if either source yields all-zero
/// output.
pub fn secure_random(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf)?;
    if !is_well_formed(&buf) {
        return Err(CryptoError::SecureRandom);
    }

    let mut mask = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut mask);
    for (b, m) in buf.iter_mut().zip(mask.iter()) {
        *b ^= m;
    }
    if !is_well_formed(&buf) {
        return Err(CryptoError::SecureRandom);
    }
    Ok(buf)
}

/// All-zero output is only treated as a failure for buffers longer than
/// three bytes, where it is astronomically unlikely from a healthy source.
fn is_well_formed(buf: &[u8]) -> bool {
    buf.len() <= 3 || buf.iter().any(|&b| b != 0)
}
