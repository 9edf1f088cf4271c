//! Signed-URL capability types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method a grant can be minted for.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrantMethod {
    Get,
    Put,
}

impl GrantMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantMethod::Get => "GET",
            GrantMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for GrantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket operation requested by an inbound call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Put,
    Get,
    Delete,
    List,
    /// Minting or revoking a grant.
    Presign,
}

impl Operation {
    /// The grant method that can authorize this operation, if any.
    ///
    /// Only object reads and writes can be delegated through a signed URL.
    pub fn grant_method(&self) -> Option<GrantMethod> {
        match self {
            Operation::Put => Some(GrantMethod::Put),
            Operation::Get => Some(GrantMethod::Get),
            Operation::Delete | Operation::List | Operation::Presign => None,
        }
    }
}

/// `expires` / `signature` pair as presented on a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantParams {
    pub expires: u64,
    pub signature: String,
}

/// Inbound operation descriptor handed to the authorizer.
#[derive(Clone, Debug)]
pub struct AccessRequest {
    pub operation: Operation,
    pub bucket: String,
    pub key: Option<String>,
    pub expires: Option<u64>,
    pub signature: Option<String>,
}

impl AccessRequest {
    pub fn new(operation: Operation, bucket: impl Into<String>, key: Option<String>) -> Self {
        Self {
            operation,
            bucket: bucket.into(),
            key,
            expires: None,
            signature: None,
        }
    }

    pub fn with_signature(mut self, expires: Option<u64>, signature: Option<String>) -> Self {
        self.expires = expires;
        self.signature = signature;
        self
    }
}

/// Capability descriptor returned when a grant is minted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresignedGrant {
    pub method: GrantMethod,
    pub url: String,
    #[serde(rename = "expires")]
    pub expires_at: u64,
}

/// Canonical object path signatures are computed over.
pub fn canonical_path(bucket: &str, key: &str) -> String {
    format!("/bucket/{}/{}", bucket, key)
}

/// Canonical signed URL used as the registry key.
///
/// Signatures are normalized to lowercase so that the same grant presented
/// with upper-case hex resolves to the same entry.
pub fn canonical_url(path: &str, expires: u64, signature: &str) -> String {
    format!(
        "{}?expires={}&signature={}",
        path,
        expires,
        signature.to_ascii_lowercase()
    )
}
