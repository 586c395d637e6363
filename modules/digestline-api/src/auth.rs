use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

/// SHA-256 of the configured trigger secret. Requests are compared by
/// digest so the comparison length never depends on the caller's token.
#[derive(Clone)]
pub struct TriggerSecret {
    digest: Option<[u8; 32]>,
}

impl TriggerSecret {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            digest: secret
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(digest),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    /// True when the request carries `Authorization: Bearer <secret>`.
    /// With no secret configured every request is refused.
    pub fn authorizes(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        match bearer_token(headers) {
            Some(token) => constant_time_eq(&digest(token), expected),
            None => false,
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
