//! End-to-end flow through the public API: registry, middleware, and
//! the standardized denial response.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use gatecrab::core::{FailurePolicy, LimiterRegistry, RequestContext, Scope};
use gatecrab::middleware::{AuthenticatedUser, RateLimitLayer, rate_limit_middleware};
use gatecrab::store::{CounterStore, MemoryStore};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn registry() -> LimiterRegistry {
    let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
    LimiterRegistry::builder(store, FailurePolicy::Open)
        .scope(Scope::Auth, 2, Duration::from_secs(60))
        .scope(Scope::Api, 4, Duration::from_secs(60))
        .build()
        .unwrap()
}

fn app(registry: &LimiterRegistry) -> Router {
    let auth = registry.get(Scope::Auth).unwrap();
    let api = registry.get(Scope::Api).unwrap();

    let login = Router::new()
        .route("/login", post(|| async { "welcome" }))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            rate_limit_middleware,
        ));

    let bookings = Router::new()
        .route("/bookings", get(|| async { "[]" }))
        .layer(RateLimitLayer::new(api));

    Router::new().merge(login).merge(bookings)
}

fn request(method: &str, path: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn exhausting_auth_leaves_api_untouched() {
    let registry = registry();
    let app = app(&registry);
    let ip = "198.51.100.7";

    // Burn through the auth scope
    for _ in 0..2 {
        let response = app.clone().oneshot(request("POST", "/login", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let denied = app.clone().oneshot(request("POST", "/login", ip)).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    // Same caller, different scope: full quota
    let response = app
        .clone()
        .oneshot(request("GET", "/bookings", ip))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn denial_body_and_headers_are_standardized() {
    let registry = registry();
    let app = app(&registry);
    let ip = "198.51.100.8";

    for _ in 0..2 {
        app.clone().oneshot(request("POST", "/login", ip)).await.unwrap();
    }
    let denied = app.clone().oneshot(request("POST", "/login", ip)).await.unwrap();

    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    for header in [
        "retry-after",
        "x-ratelimit-limit",
        "x-ratelimit-remaining",
        "x-ratelimit-reset",
    ] {
        assert!(denied.headers().contains_key(header), "missing {header}");
    }

    let body = denied.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], serde_json::json!(false));
    assert!(json["message"].as_str().unwrap().contains("auth"));
}

#[tokio::test]
async fn authenticated_users_get_their_own_api_bucket() {
    let registry = registry();
    let api = registry.get(Scope::Api).unwrap();

    let bookings = Router::new()
        .route("/bookings", get(|| async { "[]" }))
        .layer(RateLimitLayer::new(api));

    let ip = "198.51.100.9";

    // Anonymous caller exhausts the IP bucket
    for _ in 0..4 {
        bookings
            .clone()
            .oneshot(request("GET", "/bookings", ip))
            .await
            .unwrap();
    }
    let denied = bookings
        .clone()
        .oneshot(request("GET", "/bookings", ip))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    // Same IP but authenticated: independent user-keyed bucket
    let mut authed = request("GET", "/bookings", ip);
    authed
        .extensions_mut()
        .insert(AuthenticatedUser("user-7".to_string()));
    let response = bookings.clone().oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn direct_limiter_checks_match_middleware_counting() {
    let registry = registry();
    let auth = registry.get(Scope::Auth).unwrap();
    let ctx = RequestContext::from_ip("203.0.113.1".parse().unwrap());

    assert_eq!(auth.check(&ctx).await.remaining, 1);
    assert_eq!(auth.check(&ctx).await.remaining, 0);
    assert!(!auth.check(&ctx).await.allowed);
}
