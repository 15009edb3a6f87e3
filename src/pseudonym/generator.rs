//! Collision-free pseudonym generation.
//!
//! A pool of `A^L` candidates is the set of all length-`L` strings over a
//! shuffled alphabet of size `A`; seed `i` maps to the base-`A` expansion of
//! `i` using the shuffled alphabet as digit table. The mapping is a bijection,
//! so distinct seeds always give distinct pseudonyms and the apparent
//! randomness comes from the shuffle alone.

use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::collections::HashSet;

/// Lower case, upper case and digits.
pub const ALPHANUMERIC: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DIGITS: &str = "0123456789";

/// Largest pool that is sampled by index.
const MAX_POOL: u128 = u64::MAX as u128;

/// Alphabets shuffled once per run and shared by every strategy.
#[derive(Debug, Clone)]
pub struct ShufflePools {
    alphanumeric: Vec<char>,
    digits: Vec<char>,
}

impl ShufflePools {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut alphanumeric: Vec<char> = ALPHANUMERIC.chars().collect();
        let mut digits: Vec<char> = DIGITS.chars().collect();
        alphanumeric.shuffle(rng);
        digits.shuffle(rng);
        Self { alphanumeric, digits }
    }

    pub fn alphanumeric(&self) -> &[char] {
        &self.alphanumeric
    }

    pub fn digits(&self) -> &[char] {
        &self.digits
    }
}

/// Smallest `L >= 1` with `alphabet_size^L >= needed`
pub fn pool_length(alphabet_size: usize, needed: usize) -> u32 {
    let base = alphabet_size.max(2) as u128;
    let needed = needed as u128;
    let mut length = 1;
    let mut capacity = base;
    while capacity < needed {
        length += 1;
        capacity = capacity.saturating_mul(base);
    }
    length
}

/// The pseudonym with index `seed` in the pool of length-`length` strings
pub fn pseudonym_for_seed(seed: u128, length: u32, alphabet: &[char]) -> String {
    let base = alphabet.len() as u128;
    let mut digits = vec![alphabet[0]; length as usize];
    let mut rest = seed;
    for slot in digits.iter_mut().rev() {
        *slot = alphabet[(rest % base) as usize];
        rest /= base;
    }
    digits.into_iter().collect()
}

/// Draw `count` distinct pseudonyms none of which is in `used`.
///
/// `normalize` maps a candidate to the form `used` is expressed in (integer
/// pseudonyms compare without leading zeros). The pool length accounts for the
/// used values so the unused part of the pool always holds `count` members.
///
/// # Errors
///
/// Returns a description of the problem if the pool would be too large to
/// sample.
pub fn generate<R: Rng + ?Sized>(
    count: usize,
    used: &HashSet<String>,
    alphabet: &[char],
    normalize: impl Fn(&str) -> String,
    rng: &mut R,
) -> Result<Vec<String>, String> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let needed = count + used.len();
    let length = pool_length(alphabet.len(), needed);
    let pool = (alphabet.len() as u128)
        .checked_pow(length)
        .filter(|p| *p <= MAX_POOL)
        .ok_or_else(|| format!("pseudonym pool for {needed} values is too large"))?;
    let pool = usize::try_from(pool).map_err(|_| format!("pseudonym pool of {pool} does not fit in memory"))?;

    let mut out = Vec::with_capacity(count);
    for i in index::sample(rng, pool, needed.min(pool)).into_iter() {
        let candidate = pseudonym_for_seed(i as u128, length, alphabet);
        if used.contains(&normalize(&candidate)) {
            continue;
        }
        out.push(candidate);
        if out.len() == count {
            return Ok(out);
        }
    }
    Err(format!("only {} of {count} pseudonyms could be drawn", out.len()))
}

/// Strip leading zeros so that `007` and `7` compare equal.
pub fn normalize_integer(candidate: &str) -> String {
    let trimmed = candidate.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pool_length() {
        assert_eq!(pool_length(62, 1), 1);
        assert_eq!(pool_length(62, 62), 1);
        assert_eq!(pool_length(62, 63), 2);
        assert_eq!(pool_length(10, 1000), 3);
        assert_eq!(pool_length(10, 1001), 4);
    }

    #[test]
    fn test_seed_expansion_is_a_bijection() {
        let alphabet: Vec<char> = "xyz".chars().collect();
        let all: HashSet<String> = (0..27).map(|i| pseudonym_for_seed(i, 3, &alphabet)).collect();
        assert_eq!(all.len(), 27);
        assert_eq!(pseudonym_for_seed(0, 3, &alphabet), "xxx");
        assert_eq!(pseudonym_for_seed(5, 3, &alphabet), "xyz");
    }

    #[test]
    fn test_generate_avoids_used_values() {
        let mut rng = StdRng::seed_from_u64(7);
        let pools = ShufflePools::new(&mut rng);
        let used: HashSet<String> = pools.digits().iter().take(5).map(|c| c.to_string()).collect();
        let drawn = generate(5, &used, pools.digits(), normalize_integer, &mut rng).unwrap();
        assert_eq!(drawn.len(), 5);
        let distinct: HashSet<&String> = drawn.iter().collect();
        assert_eq!(distinct.len(), 5);
        assert!(drawn.iter().all(|d| !used.contains(&normalize_integer(d))));
    }

    #[test]
    fn test_generate_many_distinct() {
        let mut rng = StdRng::seed_from_u64(42);
        let pools = ShufflePools::new(&mut rng);
        let drawn = generate(5000, &HashSet::new(), pools.alphanumeric(), str::to_string, &mut rng).unwrap();
        let distinct: HashSet<&String> = drawn.iter().collect();
        assert_eq!(distinct.len(), 5000);
        assert!(drawn.iter().all(|d| d.chars().count() == 3));
    }

    #[test]
    fn test_same_seed_same_pseudonyms() {
        let draw = || {
            let mut rng = StdRng::seed_from_u64(99);
            let pools = ShufflePools::new(&mut rng);
            generate(10, &HashSet::new(), pools.alphanumeric(), str::to_string, &mut rng).unwrap()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn test_normalize_integer() {
        assert_eq!(normalize_integer("007"), "7");
        assert_eq!(normalize_integer("000"), "0");
        assert_eq!(normalize_integer("120"), "120");
    }
}
