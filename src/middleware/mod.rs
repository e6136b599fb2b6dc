// src/middleware/mod.rs
//! axum integration: identity resolution, the admission check and the
//! `X-RateLimit-*` / 429 response contract.

pub mod identity;
pub mod response;

#[cfg(test)]
mod tests;

pub use identity::{resolve_identity, ApiKeyPrincipal, CallerIdentity, Principal};
pub use response::RejectionBody;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::debug;

use crate::limiter::RateLimiter;
use crate::policy::Policy;
use crate::resilience::FallbackCounterStore;

/// Limiter as assembled for request handling
pub type AdmissionLimiter = RateLimiter<FallbackCounterStore>;

/// Middleware state for one limited route group.
///
/// The policy is resolved when the guard is built, so an unknown scope fails
/// at router construction and never on a live request.
#[derive(Debug, Clone)]
pub struct ScopedAdmission {
    limiter: Arc<AdmissionLimiter>,
    policy: Arc<Policy>,
    trust_forwarded_for: bool,
}

impl ScopedAdmission {
    pub fn new(
        limiter: Arc<AdmissionLimiter>,
        policy: Arc<Policy>,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            limiter,
            policy,
            trust_forwarded_for,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// Admission middleware, for use with `axum::middleware::from_fn_with_state`.
///
/// Denied requests never reach the handler. Admitted requests carry the
/// [`Decision`](crate::limiter::Decision) in their extensions.
pub async fn admit(
    State(admission): State<ScopedAdmission>,
    mut request: Request,
    next: Next,
) -> Response {
    let policy = &admission.policy;

    let Some(caller) = resolve_identity(
        &request,
        !policy.requires_principal,
        admission.trust_forwarded_for,
    ) else {
        debug!(scope = %policy.scope, "No caller identity on a principal-only route");
        return response::unauthenticated();
    };

    let decision = admission.limiter.check(&caller.key(), policy).await;

    if !decision.allowed {
        let now_ms = admission.limiter.clock().now_ms();
        return response::rejection(&decision, now_ms);
    }

    request.extensions_mut().insert(decision.clone());
    let mut response = next.run(request).await;
    response::apply_headers(response.headers_mut(), &decision);
    response
}
