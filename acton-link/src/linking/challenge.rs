//! Challenge codes ("magic numbers")
//!
//! A challenge code is six ASCII digits drawn uniformly from `000000..=999999`.
//! Uniformity comes from rejection sampling over `u32`: draws at or above the
//! largest multiple of one million that fits are discarded instead of reduced
//! with a biased modulo.

use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use std::fmt;

/// Number of distinct codes
const CODE_SPACE: u32 = 1_000_000;

/// Draws below this value map uniformly onto the code space
const ACCEPT_BELOW: u32 = (u32::MAX / CODE_SPACE) * CODE_SPACE;

/// Number of digits in a code
pub const CODE_LENGTH: usize = 6;

/// Default challenge lifetime in seconds
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 600;

/// A six digit challenge code
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChallengeCode(String);

impl ChallengeCode {
    /// Generate a code from the thread-local CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generate a code from the given cryptographically secure RNG
    #[must_use]
    pub fn generate_with<R: CryptoRng + RngCore + ?Sized>(rng: &mut R) -> Self {
        loop {
            let draw = rng.next_u32();
            if draw < ACCEPT_BELOW {
                return Self(format!("{:06}", draw % CODE_SPACE));
            }
        }
    }

    /// Parse a presented code; `None` unless exactly six ASCII digits
    #[must_use]
    pub fn parse(presented: &str) -> Option<Self> {
        let presented = presented.trim();
        (presented.len() == CODE_LENGTH && presented.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(presented.to_string()))
    }

    /// Get the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against a presented string
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        self.0 == presented
    }
}

impl fmt::Display for ChallengeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChallengeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeCode(******)")
    }
}

/// Result of comparing a presented code with the pending challenge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Code matched before expiry
    Verified,
    /// Code did not match; challenge still live
    Mismatch,
    /// Challenge expired; the pending token must be discarded
    Expired,
}

/// Compare a presented code against a challenge
///
/// Expiry wins over a match: a correct code presented at or after `expires_at`
/// is `Expired`.
#[must_use]
pub fn validate(
    challenge: &ChallengeCode,
    expires_at: DateTime<Utc>,
    presented: &str,
    now: DateTime<Utc>,
) -> ChallengeOutcome {
    if now >= expires_at {
        ChallengeOutcome::Expired
    } else if challenge.matches(presented) {
        ChallengeOutcome::Verified
    } else {
        ChallengeOutcome::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Deterministic RNG replaying a fixed sequence of draws
    struct SequenceRng {
        draws: Vec<u32>,
        index: usize,
    }

    impl RngCore for SequenceRng {
        fn next_u32(&mut self) -> u32 {
            let value = self.draws[self.index % self.draws.len()];
            self.index += 1;
            value
        }

        fn next_u64(&mut self) -> u64 {
            u64::from(self.next_u32())
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                *byte = 0;
            }
        }
    }

    impl CryptoRng for SequenceRng {}

    fn chi_squared(counts: &[u64], expected: f64) -> f64 {
        counts
            .iter()
            .map(|&count| {
                #[allow(clippy::cast_precision_loss)]
                let diff = count as f64 - expected;
                diff * diff / expected
            })
            .sum()
    }

    #[test]
    fn test_code_is_six_ascii_digits() {
        for _ in 0..1_000 {
            let code = ChallengeCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_leading_zeros_are_kept() {
        let mut rng = SequenceRng { draws: vec![42], index: 0 };
        assert_eq!(ChallengeCode::generate_with(&mut rng).as_str(), "000042");
    }

    #[test]
    fn test_biased_tail_is_rejected() {
        let mut rng = SequenceRng {
            draws: vec![u32::MAX, ACCEPT_BELOW, 123_456],
            index: 0,
        };
        assert_eq!(ChallengeCode::generate_with(&mut rng).as_str(), "123456");
        assert_eq!(rng.index, 3);
    }

    #[test]
    fn test_largest_accepted_draw_maps_to_top_code() {
        let mut rng = SequenceRng {
            draws: vec![ACCEPT_BELOW - 1],
            index: 0,
        };
        assert_eq!(ChallengeCode::generate_with(&mut rng).as_str(), "999999");
    }

    #[test]
    fn test_leading_digit_is_uniform() {
        const SAMPLES: u64 = 100_000;
        let mut counts = [0u64; 10];
        for _ in 0..SAMPLES {
            let code = ChallengeCode::generate();
            let digit = usize::from(code.as_str().as_bytes()[0] - b'0');
            counts[digit] += 1;
        }

        // 9 degrees of freedom, p = 0.0001
        #[allow(clippy::cast_precision_loss)]
        let statistic = chi_squared(&counts, SAMPLES as f64 / 10.0);
        assert!(statistic < 33.72, "chi-squared {statistic} too large");
    }

    #[test]
    fn test_leading_pair_is_uniform() {
        const SAMPLES: u64 = 200_000;
        let mut counts = vec![0u64; 100];
        for _ in 0..SAMPLES {
            let code = ChallengeCode::generate();
            let bucket: usize = code.as_str()[..2].parse().unwrap();
            counts[bucket] += 1;
        }

        // 99 degrees of freedom, p ~ 0.0001
        #[allow(clippy::cast_precision_loss)]
        let statistic = chi_squared(&counts, SAMPLES as f64 / 100.0);
        assert!(statistic < 160.0, "chi-squared {statistic} too large");
    }

    #[test]
    fn test_parse() {
        assert_eq!(ChallengeCode::parse(" 012345 ").unwrap().as_str(), "012345");
        assert!(ChallengeCode::parse("12345").is_none());
        assert!(ChallengeCode::parse("1234567").is_none());
        assert!(ChallengeCode::parse("12a456").is_none());
    }

    #[test]
    fn test_debug_does_not_print_code() {
        let code = ChallengeCode::parse("654321").unwrap();
        assert!(!format!("{code:?}").contains("654321"));
    }

    #[test]
    fn test_validate_outcomes() {
        let code = ChallengeCode::parse("111111").unwrap();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(10);

        assert_eq!(validate(&code, expires_at, "111111", now), ChallengeOutcome::Verified);
        assert_eq!(validate(&code, expires_at, "111112", now), ChallengeOutcome::Mismatch);
        assert_eq!(
            validate(&code, expires_at, "111111", expires_at),
            ChallengeOutcome::Expired
        );
        assert_eq!(
            validate(&code, expires_at, "999999", expires_at + Duration::seconds(1)),
            ChallengeOutcome::Expired
        );
    }

    #[test]
    fn test_validate_is_exact() {
        let code = ChallengeCode::parse("000123").unwrap();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(10);

        assert_eq!(validate(&code, expires_at, "123", now), ChallengeOutcome::Mismatch);
        assert_eq!(validate(&code, expires_at, " 000123", now), ChallengeOutcome::Mismatch);
    }
}
