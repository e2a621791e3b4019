//! Federated-identity type recognition and the internal token cache.
//!
//! Token *acquisition* (the ADFS/OKTA SAML round-trip, or an IAM/Secrets-Manager lookup) is a
//! collaborator concern out of scope for this crate (spec §1, §6); this module only owns the
//! cache that sits in front of that collaborator, keyed by `host-region-port-user`, so repeated
//! connects for the same principal don't re-run an expensive federated-auth flow more often
//! than the token's own TTL requires.

use derive_more::Display;
use once_cell::sync::Lazy;

use crate::cache::TtlCache;

/// The federated-identity backends a caller may authenticate against. `generate_connect_auth_token`
/// (the collaborator that actually mints a token) dispatches on this; this crate only needs to
/// parse and carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum FederatedAuthType {
    #[display("ADFS")]
    Adfs,
    #[display("IAM")]
    Iam,
    #[display("OKTA")]
    Okta,
    #[display("INVALID")]
    Invalid,
}

impl FederatedAuthType {
    /// Parses a auth-type name case-insensitively; unrecognized names map to `Invalid` rather
    /// than failing, matching the source system's `get_fed_auth_type_enum` contract.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "ADFS" => Self::Adfs,
            "IAM" => Self::Iam,
            "OKTA" => Self::Okta,
            _ => Self::Invalid,
        }
    }
}

/// An opaque, already-minted auth token plus whatever else the caller needs to present it to
/// the server (e.g. a SigV4 token is itself the password for the generated connection).
pub type Token = String;

fn cache_key(host: &str, region: &str, port: u16, user: &str) -> String {
    format!("{host}-{region}-{port}-{user}")
}

/// The process-wide, TTL-based cache of previously generated auth tokens, keyed by
/// `host-region-port-user`.
///
/// This is the same [`TtlCache`] primitive the topology monitor uses for its own cache
/// (component A); a token is just another sliding-TTL value keyed by connection identity.
pub struct TokenCache {
    inner: TtlCache<String, Token>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            inner: TtlCache::new(),
        }
    }

    /// Returns a previously cached, still-valid token for this `(host, region, port, user)`
    /// identity, if one exists.
    pub async fn get_cached_token(&self, host: &str, region: &str, port: u16, user: &str) -> Option<Token> {
        self.inner.get(&cache_key(host, region, port, user)).await
    }

    /// Caches `token` for this identity, expiring it after `ttl_seconds`.
    pub async fn update_cached_token(&self, host: &str, region: &str, port: u16, user: &str, token: Token, ttl_seconds: u64) {
        self.inner
            .put_with_ttl(
                cache_key(host, region, port, user),
                token,
                std::time::Duration::from_secs(ttl_seconds),
            )
            .await;
    }
}

static GLOBAL: Lazy<TokenCache> = Lazy::new(TokenCache::new);

/// The process-wide token cache singleton backing `get_cached_token`/`update_cached_token`.
pub fn global() -> &'static TokenCache {
    &GLOBAL
}
