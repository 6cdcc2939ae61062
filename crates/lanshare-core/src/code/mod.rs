//! Pair code generation and validation.
//!
//! A pair code is a short, one-shot secret a host displays and a joiner
//! types in to prove it is physically in front of the host (or has been
//! told the code out of band). It is not a security boundary against a
//! network attacker, only against an uninvited device on the same LAN.
//!
//! ## Code Format
//!
//! Six characters: the first two are derived from the host's local IP
//! address (its last octet, mod 36, formatted as uppercase hex) so two
//! hosts on the network rarely share a prefix, and the remaining four are
//! drawn uniformly from `[A-Z0-9]`. Comparison is case-insensitive; codes
//! are canonicalized to uppercase before use.

use rand::Rng;

use crate::error::{Error, Result};

/// Number of characters in a pair code.
pub const CODE_LENGTH: usize = crate::PAIR_CODE_LENGTH;

/// The random-suffix alphabet: uppercase letters and digits.
const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A validated, canonicalized (uppercase) pair code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairCode {
    code: String,
}

impl PairCode {
    /// Parse and validate a pair code from user input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCodeFormat`] if the code is the wrong length
    /// or contains characters outside `[A-Z0-9]`.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_uppercase();

        if normalized.len() != CODE_LENGTH {
            return Err(Error::InvalidCodeFormat(format!(
                "pair code must be {CODE_LENGTH} characters, got {}",
                normalized.len()
            )));
        }

        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCodeFormat(
                "pair code must contain only letters and digits".to_string(),
            ));
        }

        Ok(Self { code: normalized })
    }

    /// Generate a new pair code for a host whose local address's last octet
    /// is `ip_last_octet`.
    #[must_use]
    pub fn generate(ip_last_octet: u8) -> Self {
        let prefix = format!("{:02X}", u32::from(ip_last_octet) % 36);
        let mut rng = rand::thread_rng();
        let suffix: String = (0..CODE_LENGTH - prefix.len())
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect();
        Self {
            code: format!("{prefix}{suffix}"),
        }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Returns whether `candidate` matches this code, after the same
    /// trim-and-uppercase normalization `parse` applies.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.trim().eq_ignore_ascii_case(&self.code)
    }
}

impl std::fmt::Display for PairCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}
