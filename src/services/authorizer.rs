//! src/services/authorizer.rs
//!
//! Gatekeeper in front of every bucket operation. Signed requests must carry
//! a valid signature *and* name a grant the registry still knows about;
//! unsigned requests are admitted only when the unsigned-access policy is on.

use crate::{
    models::grant::{
        AccessRequest, GrantMethod, GrantParams, PresignedGrant, canonical_path, canonical_url,
    },
    services::{
        registry::PresignedUrlRegistry,
        signer::{Signer, now_epoch_secs},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default lifetime of a minted grant.
pub const DEFAULT_GRANT_TTL_SECS: u64 = 300;

/// Authorization failure. The message is deliberately uniform so callers
/// cannot tell which check rejected them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid or expired signature")]
    Denied,
}

#[derive(Debug)]
pub struct Authorizer {
    signer: Signer,
    registry: Arc<PresignedUrlRegistry>,
    allow_unsigned: bool,
    public_url: String,
}

impl Authorizer {
    pub fn new(
        signer: Signer,
        registry: Arc<PresignedUrlRegistry>,
        allow_unsigned: bool,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            signer,
            registry,
            allow_unsigned,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<PresignedUrlRegistry> {
        &self.registry
    }

    pub fn allows_unsigned(&self) -> bool {
        self.allow_unsigned
    }

    pub fn authorize(&self, request: &AccessRequest) -> Result<(), AuthError> {
        self.authorize_at(request, now_epoch_secs())
    }

    /// Decide admit/deny for `request` as of `now`.
    pub fn authorize_at(&self, request: &AccessRequest, now: u64) -> Result<(), AuthError> {
        let grant = match (request.expires, request.signature.as_deref()) {
            (None, None) => {
                if self.allow_unsigned {
                    return Ok(());
                }
                debug!(bucket = %request.bucket, "unsigned access disabled");
                return Err(AuthError::Denied);
            }
            (Some(expires), Some(signature)) => GrantParams {
                expires,
                signature: signature.to_string(),
            },
            _ => {
                debug!(bucket = %request.bucket, "expires/signature must be sent together");
                return Err(AuthError::Denied);
            }
        };

        let (Some(method), Some(key)) = (request.operation.grant_method(), request.key.as_deref())
        else {
            debug!(
                operation = ?request.operation,
                "operation cannot be authorized by a presigned url"
            );
            return Err(AuthError::Denied);
        };

        let path = canonical_path(&request.bucket, key);
        let signature_ok = self
            .signer
            .verify_at(method, &path, grant.expires, &grant.signature, now);
        let url = canonical_url(&path, grant.expires, &grant.signature);
        let registered = !self.registry.is_expired_at(&url, now);

        if signature_ok && registered {
            Ok(())
        } else {
            debug!(%path, signature_ok, registered, "presigned request denied");
            Err(AuthError::Denied)
        }
    }

    pub fn mint(&self, method: GrantMethod, bucket: &str, key: &str, ttl_secs: u64) -> PresignedGrant {
        self.mint_at(method, bucket, key, ttl_secs, now_epoch_secs())
    }

    /// Sign and register a grant for `(method, bucket, key)` valid until
    /// `now + ttl_secs`.
    pub fn mint_at(
        &self,
        method: GrantMethod,
        bucket: &str,
        key: &str,
        ttl_secs: u64,
        now: u64,
    ) -> PresignedGrant {
        let expires_at = now.saturating_add(ttl_secs);
        let path = canonical_path(bucket, key);
        let signature = self.signer.generate(method, &path, expires_at);
        let canonical = canonical_url(&path, expires_at, &signature);

        self.registry.register(canonical.clone(), expires_at);
        debug!(%method, %path, expires_at, "minted presigned url");

        PresignedGrant {
            method,
            url: format!("{}{}", self.public_url, canonical),
            expires_at,
        }
    }

    /// Canonical `/bucket/...` form of a minted URL, with the public base
    /// URL stripped if present.
    pub fn canonical_form<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(self.public_url.as_str()).unwrap_or(url)
    }

    /// Revoke a previously minted grant.
    ///
    /// Accepts either the full URL returned by [`Authorizer::mint`] or its
    /// canonical `/bucket/...` form. Returns whether a grant was removed.
    pub fn revoke(&self, url: &str) -> bool {
        let canonical = self.canonical_form(url);
        let removed = self.registry.remove(canonical);
        debug!(canonical, removed, "revoked presigned url");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::grant::Operation;

    const NOW: u64 = 1_700_000_000;

    fn authorizer(allow_unsigned: bool) -> Authorizer {
        Authorizer::new(
            Signer::new("test-secret").unwrap(),
            Arc::new(PresignedUrlRegistry::new()),
            allow_unsigned,
            "http://localhost:3000/",
        )
    }

    /// Pull `expires` and `signature` back out of a minted URL.
    fn params(url: &str) -> (u64, String) {
        let query = url.split_once('?').unwrap().1;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = Some(v.parse().unwrap()),
                ("signature", v) => signature = Some(v.to_string()),
                _ => {}
            }
        }
        (expires.unwrap(), signature.unwrap())
    }

    fn signed(op: Operation, bucket: &str, key: &str, expires: u64, sig: &str) -> AccessRequest {
        AccessRequest::new(op, bucket, Some(key.to_string()))
            .with_signature(Some(expires), Some(sig.to_string()))
    }

    #[test]
    fn unsigned_requests_follow_policy() {
        let open = authorizer(true);
        let closed = authorizer(false);
        let request = AccessRequest::new(Operation::Put, "b1", Some("f.txt".into()));
        assert_eq!(open.authorize_at(&request, NOW), Ok(()));
        assert_eq!(closed.authorize_at(&request, NOW), Err(AuthError::Denied));
    }

    #[test]
    fn minted_grant_round_trip() {
        let auth = authorizer(false);
        let grant = auth.mint_at(GrantMethod::Get, "b1", "f.txt", 2, NOW);
        assert_eq!(grant.expires_at, NOW + 2);
        assert!(grant.url.starts_with("http://localhost:3000/bucket/b1/f.txt?expires="));

        let (expires, sig) = params(&grant.url);
        let request = signed(Operation::Get, "b1", "f.txt", expires, &sig);
        assert_eq!(auth.authorize_at(&request, NOW), Ok(()));
        assert_eq!(auth.authorize_at(&request, NOW + 2), Ok(()));
        assert_eq!(auth.authorize_at(&request, NOW + 3), Err(AuthError::Denied));
    }

    #[test]
    fn grant_is_bound_to_method_and_object() {
        let auth = authorizer(false);
        let grant = auth.mint_at(GrantMethod::Get, "b1", "f.txt", 60, NOW);
        let (expires, sig) = params(&grant.url);

        for request in [
            signed(Operation::Put, "b1", "f.txt", expires, &sig),
            signed(Operation::Get, "b1", "g.txt", expires, &sig),
            signed(Operation::Get, "b2", "f.txt", expires, &sig),
            signed(Operation::Get, "b1", "f.txt", expires + 1, &sig),
            signed(Operation::Delete, "b1", "f.txt", expires, &sig),
        ] {
            assert_eq!(auth.authorize_at(&request, NOW), Err(AuthError::Denied));
        }
    }

    #[test]
    fn valid_signature_that_was_never_minted_is_denied() {
        let auth = authorizer(true);
        let expires = 9_999_999_999;
        let sig = auth
            .signer
            .generate(GrantMethod::Get, "/bucket/b1/f.txt", expires);
        let request = signed(Operation::Get, "b1", "f.txt", expires, &sig);
        assert_eq!(auth.authorize_at(&request, NOW), Err(AuthError::Denied));
    }

    #[test]
    fn uppercase_signature_resolves_to_same_grant() {
        let auth = authorizer(false);
        let grant = auth.mint_at(GrantMethod::Put, "b1", "f.txt", 60, NOW);
        let (expires, sig) = params(&grant.url);
        let request = signed(Operation::Put, "b1", "f.txt", expires, &sig.to_uppercase());
        assert_eq!(auth.authorize_at(&request, NOW), Ok(()));
    }

    #[test]
    fn half_signed_request_is_denied_even_when_unsigned_allowed() {
        let auth = authorizer(true);
        let only_expires = AccessRequest::new(Operation::Get, "b1", Some("f.txt".into()))
            .with_signature(Some(NOW + 10), None);
        let only_sig = AccessRequest::new(Operation::Get, "b1", Some("f.txt".into()))
            .with_signature(None, Some("aa".into()));
        assert_eq!(auth.authorize_at(&only_expires, NOW), Err(AuthError::Denied));
        assert_eq!(auth.authorize_at(&only_sig, NOW), Err(AuthError::Denied));
    }

    #[test]
    fn revoked_grant_is_denied() {
        let auth = authorizer(false);
        let grant = auth.mint_at(GrantMethod::Get, "b1", "f.txt", 60, NOW);
        let (expires, sig) = params(&grant.url);
        let request = signed(Operation::Get, "b1", "f.txt", expires, &sig);

        assert!(auth.revoke(&grant.url));
        assert!(!auth.revoke(&grant.url));
        assert_eq!(auth.authorize_at(&request, NOW), Err(AuthError::Denied));
    }

    #[test]
    fn canonical_form_strips_public_url() {
        let auth = authorizer(false);
        assert_eq!(
            auth.canonical_form("http://localhost:3000/bucket/b1/f.txt?expires=1&signature=aa"),
            "/bucket/b1/f.txt?expires=1&signature=aa"
        );
        assert_eq!(auth.canonical_form("/bucket/b1/f.txt"), "/bucket/b1/f.txt");
        assert_eq!(
            auth.canonical_form("http://evil.example/bucket/b1/f.txt"),
            "http://evil.example/bucket/b1/f.txt"
        );
    }

    #[test]
    fn presign_requests_follow_unsigned_policy() {
        let request = AccessRequest::new(Operation::Presign, "b1", Some("f.txt".into()));
        assert_eq!(authorizer(true).authorize_at(&request, NOW), Ok(()));
        assert_eq!(
            authorizer(false).authorize_at(&request, NOW),
            Err(AuthError::Denied)
        );

        let auth = authorizer(true);
        let grant = auth.mint_at(GrantMethod::Get, "b1", "f.txt", 60, NOW);
        let (expires, sig) = params(&grant.url);
        let signed = request.with_signature(Some(expires), Some(sig));
        assert_eq!(auth.authorize_at(&signed, NOW), Err(AuthError::Denied));
    }

    #[test]
    fn reminting_extends_the_same_registry_entry() {
        let auth = authorizer(false);
        auth.mint_at(GrantMethod::Get, "b1", "f.txt", 60, NOW);
        auth.mint_at(GrantMethod::Get, "b1", "f.txt", 60, NOW);
        assert_eq!(auth.registry().len(), 1);
        auth.mint_at(GrantMethod::Put, "b1", "f.txt", 60, NOW);
        assert_eq!(auth.registry().len(), 2);
    }

    #[test]
    fn sweep_after_expiry_still_denies() {
        let auth = authorizer(false);
        let grant = auth.mint_at(GrantMethod::Get, "b1", "f.txt", 1, NOW);
        let (expires, sig) = params(&grant.url);
        let request = signed(Operation::Get, "b1", "f.txt", expires, &sig);

        assert_eq!(auth.registry().sweep_at(NOW + 5), 1);
        assert_eq!(auth.authorize_at(&request, NOW + 5), Err(AuthError::Denied));
    }
}
