//! Bucket counts for the sparse identifier index.
//!
//! Bucket counts come from a short table of primes that sit roughly halfway
//! between powers of two, so `id % nbucket` does not cluster on identifiers
//! that share small factors.

use crate::error::{StorageError, StorageResult};

const PRIMES: [usize; 26] = [
    53, 97, 193, 389, 769, 1_543, 3_079, 6_151, 12_289, 24_593, 49_157, 98_317, 196_613,
    393_241, 786_433, 1_572_869, 3_145_739, 6_291_469, 12_582_917, 25_165_843, 50_331_653,
    100_663_319, 201_326_611, 402_653_189, 805_306_457, 1_610_612_741,
];

/// Smallest bucket count ever used.
pub const MIN_BUCKETS: usize = PRIMES[0];

/// Smallest prime `>= n`.
#[must_use]
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Bucket count for a table expected to hold about `target / 2` entries.
///
/// Takes the first table prime `>= target`, falling back to [`next_prime`]
/// beyond the table.
///
/// # Errors
///
/// Returns [`StorageError::TooManyBuckets`] when the count exceeds `limit`.
pub fn bucket_count(target: usize, limit: usize) -> StorageResult<usize> {
    let count = PRIMES
        .iter()
        .copied()
        .find(|&prime| prime >= target)
        .unwrap_or_else(|| next_prime(target));
    if count > limit {
        return Err(StorageError::TooManyBuckets {
            requested: count,
            limit,
        });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_entries_are_prime() {
        assert!(PRIMES.iter().all(|&p| is_prime(p)));
        assert!(PRIMES.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(14), 17);
        assert_eq!(next_prime(97), 97);
        assert_eq!(next_prime(1_610_612_742), 1_610_612_747);
    }

    #[test]
    fn test_bucket_count() {
        assert_eq!(bucket_count(0, usize::MAX), Ok(53));
        assert_eq!(bucket_count(100, usize::MAX), Ok(193));
        assert_eq!(
            bucket_count(5_000, 4_096),
            Err(StorageError::TooManyBuckets { requested: 6_151, limit: 4_096 })
        );
    }
}
