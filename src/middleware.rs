//! HTTP middleware adapter
//!
//! Bridges inbound requests to a [`Limiter`] and synthesizes the
//! protocol-correct denial response: HTTP 429 with `Retry-After`,
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining`, and `X-RateLimit-Reset`
//! headers and a `{"success": false, "message": ...}` JSON body.
//!
//! Three forms are provided:
//!
//! - [`apply_rate_limit`]: check a context against a limiter, returning
//!   the formed 429 on denial and `None` on pass-through
//! - [`rate_limit_middleware`]: an axum `from_fn_with_state` middleware
//! - [`RateLimitLayer`]: a tower layer wrapping any inner service
//!
//! The adapter mutates nothing but the counter store and logs nothing
//! about the caller beyond the identity key.

use crate::core::key::RequestContext;
use crate::core::limiter::{Limiter, RateLimitDecision};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::UNIX_EPOCH;
use tower::{Layer, Service};

/// Authenticated user id attached to the request by upstream auth
/// middleware
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl RequestContext {
    /// Build a context from an HTTP request
    ///
    /// The source IP is taken from `X-Forwarded-For` (first entry), then
    /// `X-Real-Ip`, then the peer address when the router was built with
    /// `into_make_service_with_connect_info`.
    pub fn from_request<B>(request: &axum::http::Request<B>) -> Self {
        RequestContext {
            source_ip: client_ip(request),
            user_id: request
                .extensions()
                .get::<AuthenticatedUser>()
                .map(|user| user.0.clone()),
            path: request.uri().path().to_string(),
            method: request.method().to_string(),
        }
    }
}

fn client_ip<B>(request: &axum::http::Request<B>) -> Option<IpAddr> {
    let headers = request.headers();

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
}

/// Check a request context against a limiter
///
/// Returns the formed 429 response when the request is denied, or
/// `None` to let the caller proceed to the protected handler.
pub async fn apply_rate_limit(limiter: &Limiter, ctx: &RequestContext) -> Option<Response> {
    let decision = limiter.check(ctx).await;
    if decision.allowed {
        None
    } else {
        Some(rate_limited_response(limiter, &decision))
    }
}

/// Build the standardized 429 response for a denied decision
pub fn rate_limited_response(limiter: &Limiter, decision: &RateLimitDecision) -> Response {
    let retry_after_secs = decision
        .retry_after
        .map(|d| d.as_secs_f64().ceil() as u64)
        .unwrap_or(1)
        .max(1);

    let body = serde_json::json!({
        "success": false,
        "message": format!(
            "Rate limit exceeded for {}. Retry after {} seconds.",
            limiter.policy().scope,
            retry_after_secs
        ),
    });

    let reset_unix_secs = decision
        .reset_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, numeric_header(retry_after_secs));
    headers.insert("x-ratelimit-limit", numeric_header(decision.limit));
    headers.insert("x-ratelimit-remaining", numeric_header(decision.remaining));
    headers.insert("x-ratelimit-reset", numeric_header(reset_unix_secs));

    response
}

fn numeric_header(value: u64) -> HeaderValue {
    // Decimal u64 is always a valid header value
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

/// axum middleware checking every request against one limiter
///
/// ```ignore
/// let app = Router::new()
///     .route("/login", post(login))
///     .layer(axum::middleware::from_fn_with_state(
///         auth_limiter.clone(),
///         gatecrab::middleware::rate_limit_middleware,
///     ));
/// ```
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<Limiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);
    match apply_rate_limit(&limiter, &ctx).await {
        Some(denied) => denied,
        None => next.run(request).await,
    }
}

/// Tower layer enforcing one limiter around an inner service
///
/// The composable wrapper form: layering this over a handler yields a
/// new service that short-circuits denied requests and otherwise
/// forwards to the handler untouched.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<Limiter>,
}

impl RateLimitLayer {
    /// Create a layer enforcing the given limiter
    pub fn new(limiter: Arc<Limiter>) -> Self {
        RateLimitLayer { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`]
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<Limiter>,
}

impl<S> Service<axum::http::Request<Body>> for RateLimitService<S>
where
    S: Service<axum::http::Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        // Take the service that was polled ready, leave a fresh clone
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let ctx = RequestContext::from_request(&request);
            if let Some(denied) = apply_rate_limit(&limiter, &ctx).await {
                return Ok(denied);
            }
            inner.call(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limiter::LimiterPolicy;
    use crate::core::{FailurePolicy, KeyStrategy, Scope};
    use crate::store::MemoryStore;
    use axum::Router;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_limiter(max: u64) -> Arc<Limiter> {
        Arc::new(
            Limiter::new(
                LimiterPolicy::new(Scope::Api, max, Duration::from_secs(60))
                    .with_key_strategy(KeyStrategy::SourceIp)
                    .with_failure_policy(FailurePolicy::Open),
                Arc::new(MemoryStore::new()),
            )
            .unwrap(),
        )
    }

    fn app(limiter: Arc<Limiter>) -> Router {
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter))
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/protected")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn requests_within_limit_pass_through() {
        let app = app(test_limiter(3));

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from("9.9.9.9")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn denial_returns_429_with_headers_and_body() {
        let app = app(test_limiter(1));

        let ok = app.clone().oneshot(request_from("9.9.9.9")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = app.clone().oneshot(request_from("9.9.9.9")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = denied.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "1");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert!(headers.contains_key("x-ratelimit-reset"));
        let retry: u64 = headers
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry >= 1 && retry <= 60);

        let body = denied.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], serde_json::json!(false));
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .contains("Rate limit exceeded")
        );
    }

    #[tokio::test]
    async fn different_ips_are_limited_independently() {
        let app = app(test_limiter(1));

        app.clone().oneshot(request_from("1.1.1.1")).await.unwrap();
        let denied = app.clone().oneshot(request_from("1.1.1.1")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.clone().oneshot(request_from("2.2.2.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn from_fn_middleware_form_denies_over_quota() {
        let limiter = test_limiter(1);
        let app = Router::new()
            .route("/protected", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ));

        app.clone().oneshot(request_from("3.3.3.3")).await.unwrap();
        let denied = app.clone().oneshot(request_from("3.3.3.3")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn forwarded_header_wins_over_real_ip() {
        let request = axum::http::Request::builder()
            .uri("/x")
            .header("x-forwarded-for", "7.7.7.7, 10.0.0.1")
            .header("x-real-ip", "8.8.8.8")
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::from_request(&request);
        assert_eq!(ctx.source_ip.unwrap().to_string(), "7.7.7.7");
        assert_eq!(ctx.path, "/x");
        assert_eq!(ctx.method, "GET");
    }

    #[test]
    fn authenticated_user_extension_is_picked_up() {
        let mut request = axum::http::Request::builder()
            .uri("/x")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedUser("user-42".to_string()));

        let ctx = RequestContext::from_request(&request);
        assert_eq!(ctx.user_id.as_deref(), Some("user-42"));
    }

    #[test]
    fn missing_everything_yields_no_ip() {
        let request = axum::http::Request::builder()
            .uri("/x")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(&request);
        assert!(ctx.source_ip.is_none());
        assert!(ctx.user_id.is_none());
    }
}
