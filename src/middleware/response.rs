use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::limiter::Decision;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Set the `X-RateLimit-*` headers carried by every limited response
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATE_LIMIT_RESET,
        HeaderValue::from(decision.reset_epoch_secs()),
    );
}

/// 429 for a denied decision
pub fn rejection(decision: &Decision, now_ms: u64) -> Response {
    let retry_after = decision.retry_after_secs(now_ms);
    let body = RejectionBody {
        error: "Too many requests, please try again later".to_string(),
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// 401 for a route whose policy needs a caller that could not be determined
pub fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Authentication required",
        }),
    )
        .into_response()
}
