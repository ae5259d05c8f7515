//! Random fixture values for accounts and transfers

use rand::Rng;
use rand::seq::SliceRandom;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const CURRENCIES: &[&str] = &["USD", "EUR", "CAD"];

/// Uniform integer in `min..=max`
pub fn int(min: i64, max: i64) -> i64 {
    rand::thread_rng().gen_range(min..=max)
}

/// Lowercase ASCII string of length `n`
pub fn string(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn owner() -> String {
    string(6)
}

pub fn money() -> i64 {
    int(0, 1000)
}

pub fn currency() -> &'static str {
    CURRENCIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("USD")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_in_range() {
        for _ in 0..100 {
            let v = int(5, 10);
            assert!((5..=10).contains(&v));
        }
        assert_eq!(int(3, 3), 3);
    }

    #[test]
    fn test_owner_shape() {
        let owner = owner();
        assert_eq!(owner.len(), 6);
        assert!(owner.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_currency_known() {
        assert!(CURRENCIES.contains(&currency()));
    }
}
