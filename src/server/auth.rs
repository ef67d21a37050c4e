use crate::errors::AgentportError;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

pub const MAX_ATTEMPTS: u32 = 5;
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

const SALT_BYTES: usize = 16;
const TOKEN_BYTES: usize = 32;

/// Hash a PIN as `salt$digest` with a random salt, both hex encoded.
pub fn hash_pin(pin: &str) -> Result<String, AgentportError> {
    let mut salt = [0u8; SALT_BYTES];
    getrandom::fill(&mut salt).map_err(|e| AgentportError::io("random", "urandom", e))?;
    let salt_hex = hex(&salt);
    Ok(format!("{salt_hex}${}", digest_hex(&salt_hex, pin)))
}

pub fn verify_pin(pin: &str, stored: &str) -> bool {
    let Some((salt_hex, digest)) = stored.split_once('$') else {
        return false;
    };
    // Constant-time comparison; both sides are fixed-length hex.
    let computed = digest_hex(salt_hex, pin);
    if computed.len() != digest.len() {
        return false;
    }
    computed
        .bytes()
        .zip(digest.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn digest_hex(salt_hex: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(pin.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

struct AttemptEntry {
    count: u32,
    locked_until: Option<Instant>,
}

/// Issued cookie tokens plus the per-IP failure counter. Tokens expire after
/// the configured TTL; five failed PINs from one address lock it out for
/// fifteen minutes.
pub struct AuthState {
    tokens: DashMap<String, Instant>,
    attempts: DashMap<String, AttemptEntry>,
    ttl: Duration,
}

impl AuthState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            attempts: DashMap::new(),
            ttl,
        }
    }

    pub fn is_rate_limited(&self, ip: &str) -> bool {
        if let Some(entry) = self.attempts.get(ip) {
            if let Some(until) = entry.locked_until {
                if Instant::now() < until {
                    return true;
                }
                drop(entry);
                self.attempts.remove(ip);
            }
        }
        false
    }

    pub fn record_failed_attempt(&self, ip: &str) {
        let mut entry = self.attempts.entry(ip.to_string()).or_insert(AttemptEntry {
            count: 0,
            locked_until: None,
        });
        entry.count += 1;
        if entry.count >= MAX_ATTEMPTS {
            entry.locked_until = Some(Instant::now() + LOCKOUT_DURATION);
        }
    }

    pub fn clear_rate_limit(&self, ip: &str) {
        self.attempts.remove(ip);
    }

    pub fn issue_token(&self) -> Result<String, AgentportError> {
        let mut raw = [0u8; TOKEN_BYTES];
        getrandom::fill(&mut raw).map_err(|e| AgentportError::io("random", "urandom", e))?;
        let token = hex(&raw);
        self.tokens
            .insert(token.clone(), Instant::now() + self.ttl);
        Ok(token)
    }

    pub fn is_valid(&self, token: &str) -> bool {
        let live = match self.tokens.get(token) {
            Some(expiry) => Instant::now() < *expiry,
            None => return false,
        };
        if !live {
            self.tokens.remove(token);
        }
        live
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Pull the `token` cookie out of a Cookie header.
pub fn token_from_cookies(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if key.trim() == "token" {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_pin("1234").unwrap();
        assert!(hash.contains('$'));
        assert!(verify_pin("1234", &hash));
        assert!(!verify_pin("4321", &hash));
    }

    #[test]
    fn same_pin_hashes_differently_per_salt() {
        let a = hash_pin("1234").unwrap();
        let b = hash_pin("1234").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_pin("1234", "no-dollar-sign"));
        assert!(!verify_pin("1234", ""));
    }

    #[test]
    fn lockout_after_max_attempts() {
        let auth = AuthState::new(Duration::from_secs(60));
        for _ in 0..MAX_ATTEMPTS - 1 {
            auth.record_failed_attempt("1.2.3.4");
            assert!(!auth.is_rate_limited("1.2.3.4"));
        }
        auth.record_failed_attempt("1.2.3.4");
        assert!(auth.is_rate_limited("1.2.3.4"));
        // Other addresses are unaffected
        assert!(!auth.is_rate_limited("5.6.7.8"));

        auth.clear_rate_limit("1.2.3.4");
        assert!(!auth.is_rate_limited("1.2.3.4"));
    }

    #[test]
    fn tokens_validate_until_expiry() {
        let auth = AuthState::new(Duration::from_secs(60));
        let token = auth.issue_token().unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(auth.is_valid(&token));
        assert!(!auth.is_valid("deadbeef"));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let auth = AuthState::new(Duration::ZERO);
        let token = auth.issue_token().unwrap();
        assert!(!auth.is_valid(&token));
    }

    #[test]
    fn cookie_parsing_finds_token_among_others() {
        assert_eq!(
            token_from_cookies("theme=dark; token=abc123; lang=en"),
            Some("abc123".to_string())
        );
        assert_eq!(token_from_cookies("theme=dark"), None);
        assert_eq!(token_from_cookies(""), None);
    }
}
