//! Turning an `Authorization` header into credentials.
//!
//! The header holds either a raw grant list (`a/# r, b/+ crud`) or
//! `Bearer <token>`. Bearer tokens are opaque here; a [`TokenDecoder`] turns
//! them into a grant list and an expiration.

use crate::Credentials;
use crate::error::{Error, Result};
use crate::policy::AccessPolicy;

use std::collections::HashMap;
use std::fmt;

use rxp_name::ResourceName;

/// Header carrying credentials.
pub const AUTHORIZATION: &str = "Authorization";

/// Scheme prefix for opaque tokens.
pub const BEARER: &str = "Bearer";

/// Grants extracted from a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedToken {
    /// Authorization grammar granted by the token.
    pub grants: String,
    /// Expiration in epoch milliseconds; `0` never expires.
    pub expiration: u64,
}

/// Verifies bearer tokens and extracts their grants.
pub trait TokenDecoder: Send + Sync {
    /// Decodes `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the token is not acceptable.
    fn decode(&self, token: &str) -> Result<DecodedToken>;
}

/// A decoder backed by a fixed token table.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenDecoder {
    tokens: HashMap<String, DecodedToken>,
}

impl StaticTokenDecoder {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` as granting `grants` until `expiration`.
    #[must_use]
    pub fn with_token(mut self, token: &str, grants: &str, expiration: u64) -> Self {
        self.tokens.insert(
            token.to_owned(),
            DecodedToken {
                grants: grants.to_owned(),
                expiration,
            },
        );
        self
    }
}

impl TokenDecoder for StaticTokenDecoder {
    fn decode(&self, token: &str) -> Result<DecodedToken> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Token("unknown token".to_owned()))
    }
}

/// Builds the credentials for one request.
///
/// `defaults` are server-configured grants applied to everyone; the header,
/// if present, adds to them.
///
/// # Errors
///
/// Fails if the grammar is malformed, if a bearer token is rejected, or if a
/// bearer token arrives with no decoder configured.
pub fn resolve_credentials(
    defaults: Option<&str>,
    authorization: Option<&str>,
    decoder: Option<&dyn TokenDecoder>,
) -> Result<AccessPolicy> {
    let policy = AccessPolicy::new();

    if let Some(defaults) = defaults {
        policy.parse_authorization(defaults, 0)?;
    }

    let Some(value) = authorization.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(policy);
    };

    match bearer_token(value) {
        Some(token) => {
            let decoder = decoder.ok_or_else(|| Error::UnsupportedScheme(BEARER.to_owned()))?;
            let decoded = decoder.decode(token)?;
            policy.parse_authorization(&decoded.grants, decoded.expiration)?;
        }
        None => policy.parse_authorization(value, 0)?,
    }

    Ok(policy)
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case(BEARER)
        .then(|| token.trim())
}

/// Client-side credentials that forward an opaque token to the server.
///
/// The token is only meaningful to the server, so every local check is
/// denied.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    /// Wraps `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl Credentials for BearerToken {
    fn can_create(&self, _resource: &ResourceName) -> bool {
        false
    }

    fn can_read(&self, _resource: &ResourceName) -> bool {
        false
    }

    fn can_update(&self, _resource: &ResourceName) -> bool {
        false
    }

    fn can_delete(&self, _resource: &ResourceName) -> bool {
        false
    }

    fn serialize(&self) -> String {
        format!("{BEARER} {}", self.token)
    }
}
