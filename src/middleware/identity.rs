use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Authenticated caller, inserted into request extensions by the auth layer
/// that runs before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// API key the auth layer has verified. Holds the raw key; only its digest
/// reaches counter keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyPrincipal(pub String);

impl fmt::Debug for ApiKeyPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKeyPrincipal")
            .field(&hash_api_key(&self.0))
            .finish()
    }
}

/// Who a request is counted against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    User(String),
    /// Truncated SHA-256 of the presented key
    ApiKey(String),
    Ip(IpAddr),
    /// No address could be determined; all such callers share one counter
    Anonymous,
}

impl CallerIdentity {
    /// Identity component of the counter key
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, CallerIdentity::User(_) | CallerIdentity::ApiKey(_))
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerIdentity::User(id) => write!(f, "user:{}", id),
            CallerIdentity::ApiKey(digest) => write!(f, "key:{}", digest),
            CallerIdentity::Ip(addr) => write!(f, "ip:{}", addr),
            CallerIdentity::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// First 16 hex digits of the key's SHA-256, so raw secrets never reach
/// counter keys or logs
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Resolve the caller of `request`.
///
/// Only credentials the auth layer put into the extensions count as
/// authenticated: a [`Principal`] wins, then an [`ApiKeyPrincipal`]. Request
/// headers are never trusted as credentials. Client addresses are only used
/// when `allow_anonymous` is set; the first `x-forwarded-for` entry is
/// honoured only behind a trusted proxy. `None` means the policy needs an
/// authenticated caller and there is none.
pub fn resolve_identity(
    request: &Request,
    allow_anonymous: bool,
    trust_forwarded_for: bool,
) -> Option<CallerIdentity> {
    if let Some(Principal(id)) = request.extensions().get::<Principal>() {
        if !id.is_empty() {
            return Some(CallerIdentity::User(id.clone()));
        }
    }

    if let Some(ApiKeyPrincipal(key)) = request.extensions().get::<ApiKeyPrincipal>() {
        if !key.is_empty() {
            return Some(CallerIdentity::ApiKey(hash_api_key(key)));
        }
    }

    if !allow_anonymous {
        return None;
    }

    let forwarded = if trust_forwarded_for {
        forwarded_for(request.headers())
    } else {
        None
    };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    Some(
        forwarded
            .or(peer)
            .map(CallerIdentity::Ip)
            .unwrap_or(CallerIdentity::Anonymous),
    )
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|first| first.trim().parse().ok())
}
