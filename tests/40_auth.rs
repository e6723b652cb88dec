mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::json;

use restkit::dispatch::{fn_handler, router, Endpoint, RouteConfig};

use common::{json_body, send, StaticAuthenticator};

fn auth_router(config: RouteConfig) -> Router {
    let endpoint = Endpoint::builder("profile")
        .authenticator(StaticAuthenticator {
            user_id: "user-42".to_string(),
        })
        .route(
            "v1",
            Method::POST,
            config,
            fn_handler(|_cx| async move { Ok(None) }),
        )
        .build()
        .expect("endpoint builds");

    router(Arc::new(endpoint), "/profile")
}

#[tokio::test]
async fn authenticated_requests_gain_an_injected_user_id() {
    let app = auth_router(RouteConfig::open().with_auth_key("sekrit"));

    let (status, body) = send(
        &app,
        json_body(Method::POST, "/profile/v1/", json!({"token": "sekrit"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["request"]["user_id"], json!("user-42"));
}

#[tokio::test]
async fn failed_authentication_is_a_401_envelope() {
    let app = auth_router(RouteConfig::open().with_auth_key("sekrit"));

    let (status, body) = send(
        &app,
        json_body(Method::POST, "/profile/v1/", json!({"token": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error_code"], json!("UNAUTHORIZED"));
}

#[tokio::test]
async fn the_application_secret_is_the_fallback_key() {
    // No route-level key: the authenticator receives the configured
    // application secret (the development default in tests).
    let app = auth_router(RouteConfig::open().with_auth());
    let secret = restkit::config::config().app_secret.clone();

    let (status, body) = send(
        &app,
        json_body(Method::POST, "/profile/v1/", json!({"token": secret})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["request"]["user_id"], json!("user-42"));
}

#[tokio::test]
async fn auth_routes_without_an_authenticator_refuse_to_build() {
    let err = Endpoint::builder("profile")
        .route(
            "v1",
            Method::POST,
            RouteConfig::open().with_auth_key("sekrit"),
            fn_handler(|_cx| async move { Ok(None) }),
        )
        .build()
        .unwrap_err();

    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    assert!(err.message().contains("authenticator"));
}
