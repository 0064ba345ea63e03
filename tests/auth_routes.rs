//! HTTP contract of the authentication extractors and the error envelope.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use fake::{
    faker::{
        internet::en::{Password, SafeEmail},
        name::en::Name,
    },
    Fake,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use validator::Validate;

use travel_booking::{
    controllers::auth::RegisterRequest,
    extract::ValidatedJson,
    middleware::{AdminUser, AuthUser, Claims, JwtKeys, MaybeAuthUser},
};

const SECRET: &str = "integration-test-secret";

fn keys() -> JwtKeys {
    JwtKeys::new(SECRET, 24)
}

fn test_app() -> Router {
    Router::new()
        .route("/me", get(|user: AuthUser| async move { Json(json!({ "userId": user.user_id })) }))
        .route("/admin", get(|AdminUser(admin): AdminUser| async move { Json(json!({ "userId": admin.user_id })) }))
        .route(
            "/maybe",
            get(|MaybeAuthUser(user): MaybeAuthUser| async move { Json(json!({ "signedIn": user.is_some() })) }),
        )
        .route(
            "/register",
            post(|ValidatedJson(req): ValidatedJson<RegisterRequest>| async move { Json(json!({ "email": req.email })) }),
        )
        .with_state(keys())
}

async fn send(request: Request<Body>) -> Response {
    test_app().oneshot(request).await.unwrap()
}

fn get_with_token(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Missing and broken tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_token_is_401_no_token() {
    let response = send(get_with_token("/me", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NO_TOKEN");
}

#[tokio::test]
async fn garbage_token_is_401_invalid_token() {
    let response = send(get_with_token("/me", Some("not.a.jwt"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn token_signed_with_another_secret_is_rejected() {
    let foreign = JwtKeys::new("some-other-secret-value", 24).issue(1, true).unwrap();
    let response = send(get_with_token("/admin", Some(&foreign))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn expired_token_is_401_token_expired() {
    let past = Utc::now() - Duration::hours(3);
    let token = keys()
        .sign(&Claims {
            user_id: 5,
            is_admin: false,
            iat: past.timestamp(),
            exp: (past + Duration::hours(1)).timestamp(),
        })
        .unwrap();

    let response = send(get_with_token("/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "TOKEN_EXPIRED");
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_token_reaches_handler() {
    let token = keys().issue(17, false).unwrap();
    let response = send(get_with_token("/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["userId"], 17);
}

#[tokio::test]
async fn non_admin_is_403_on_admin_routes() {
    let token = keys().issue(17, false).unwrap();
    let response = send(get_with_token("/admin", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["success"], false);

    let admin = keys().issue(1, true).unwrap();
    let response = send(get_with_token("/admin", Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn optional_auth_allows_anonymous_but_not_bad_tokens() {
    let response = send(get_with_token("/maybe", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["signedIn"], false);

    let response = send(get_with_token("/maybe", Some("broken"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn invalid_registration_lists_field_errors() {
    let response = send(post_json(
        "/register",
        json!({ "name": "", "email": "nope", "password": "123" }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["errors"]["email"].is_array());
    assert!(body["errors"]["password"].is_array());
}

#[tokio::test]
async fn malformed_json_is_400_with_envelope() {
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn generated_registrations_pass_validation() {
    for _ in 0..20 {
        let name: String = Name().fake();
        let email: String = SafeEmail().fake();
        let req = RegisterRequest {
            name,
            email: email.clone(),
            phone: None,
            password: Password(8..16).fake(),
        };
        assert!(req.validate().is_ok(), "{} should be accepted", email);

        let response = send(post_json(
            "/register",
            json!({ "name": req.name, "email": req.email, "password": req.password }),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
