//! Proof-of-work scoring.
//!
//! The difficulty of a byte string is the number of leading zero bits of its
//! SHA-256 digest. Each additional unit of difficulty doubles the expected
//! search effort. The engine only ever scores and checks; mining is done by
//! submitters.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::codec::CodecError;
use crate::transaction::UnsignedTransaction;
use crate::types::sha256;

#[derive(Debug, Error)]
pub enum PowError {
    #[error("Mining cancelled after {0} attempts")]
    Cancelled(u64),
    #[error("Graffiti space exhausted")]
    Exhausted,
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Leading zero bits of `hash`.
pub fn leading_zero_bits(hash: &[u8]) -> u64 {
    let mut zeros = 0u64;
    for byte in hash {
        if *byte == 0 {
            zeros += 8;
            continue;
        }
        zeros += byte.leading_zeros() as u64;
        break;
    }
    zeros
}

/// Difficulty score of `bytes`.
pub fn difficulty(bytes: &[u8]) -> u64 {
    leading_zero_bits(&sha256(bytes))
}

/// Whether `hash` meets `target`.
pub fn check(hash: &[u8], target: u64) -> bool {
    leading_zero_bits(hash) >= target
}

/// Search graffiti values until `tx` scores at least `target`.
///
/// `cancel` is polled between attempts so a caller can abandon the search
/// when a fresher block id makes the current target stale. Returns the
/// number of attempts made.
pub fn mine(
    tx: &mut UnsignedTransaction,
    target: u64,
    cancel: &AtomicBool,
) -> Result<u64, PowError> {
    let mut attempts = 0u64;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(PowError::Cancelled(attempts));
        }
        attempts += 1;
        if tx.difficulty()? >= target {
            return Ok(attempts);
        }
        let base = tx.base_mut();
        base.graffiti = base.graffiti.checked_add(1).ok_or(PowError::Exhausted)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{claim, signing_key};

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0x01]), 7);
        assert_eq!(leading_zero_bits(&[0x00, 0x80]), 8);
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x10]), 19);
        assert_eq!(leading_zero_bits(&[0u8; 32]), 256);
    }

    #[test]
    fn test_check_matches_difficulty() {
        let hash = sha256(b"spacevm");
        let score = leading_zero_bits(&hash);
        assert!(check(&hash, score));
        assert!(!check(&hash, score + 1));
        assert_eq!(difficulty(b"spacevm"), score);
    }

    #[test]
    fn test_mine_reaches_target() {
        let key = signing_key();
        let mut tx = claim(&key, "mined", [7u8; 32]);
        let cancel = AtomicBool::new(false);
        mine(&mut tx, 6, &cancel).unwrap();
        assert!(tx.difficulty().unwrap() >= 6);
    }

    #[test]
    fn test_mine_cancelled() {
        let key = signing_key();
        let mut tx = claim(&key, "mined", [7u8; 32]);
        let cancel = AtomicBool::new(true);
        assert!(matches!(mine(&mut tx, 200, &cancel), Err(PowError::Cancelled(0))));
    }
}
