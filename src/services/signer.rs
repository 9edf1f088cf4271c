//! src/services/signer.rs
//!
//! HMAC-SHA256 signing for presigned URLs. Stateless apart from the shared
//! secret: a signature can always be re-derived from `(method, path, expires)`,
//! which is what lets verification work without storing signatures.

use crate::models::grant::GrantMethod;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signing secret is not configured")]
    MissingSecret,
}

#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

/// Current wall-clock time in whole seconds since the epoch.
pub fn now_epoch_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl Signer {
    /// Build a signer from the shared secret. An empty secret is rejected.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn mac(&self, method: GrantMethod, path: &str, expires: u64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(format!("{}\n{}\n{}", method, path, expires).as_bytes());
        mac
    }

    /// Lowercase hex signature over `method\npath\nexpires`.
    pub fn generate(&self, method: GrantMethod, path: &str, expires: u64) -> String {
        hex::encode(self.mac(method, path, expires).finalize().into_bytes())
    }

    /// Check `candidate` against the expected signature using the current clock.
    pub fn verify(&self, method: GrantMethod, path: &str, expires: u64, candidate: &str) -> bool {
        self.verify_at(method, path, expires, candidate, now_epoch_secs())
    }

    /// Check `candidate` as of `now`. Fails closed once `now > expires`.
    ///
    /// Hex of either case is accepted; the decoded bytes are compared in
    /// constant time.
    pub fn verify_at(
        &self,
        method: GrantMethod,
        path: &str,
        expires: u64,
        candidate: &str,
        now: u64,
    ) -> bool {
        if now > expires {
            return false;
        }
        let Ok(provided) = hex::decode(candidate) else {
            return false;
        };
        self.mac(method, path, expires)
            .verify_slice(&provided)
            .is_ok()
    }
}
