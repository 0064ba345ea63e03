//! Catalog reads when the database misbehaves, admin imports, and token
//! revocation for deactivated accounts.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use sqlx::PgPool;

use common::{body_json, request, send, NO_GATEWAY};
use travel_booking::app;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./src/migrations")]
async fn city_list_reports_database_errors(pool: PgPool) {
    let state = common::test_state(pool.clone(), NO_GATEWAY).await;
    let app = app(state.clone());

    sqlx::query("INSERT INTO cities (name, region) VALUES ('Kochi', 'Kerala')")
        .execute(&pool)
        .await
        .unwrap();
    state.cache.invalidate_cities().await;

    let response = send(&app, request(Method::GET, "/api/cities", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"][0]["name"], "Kochi");

    state.cache.invalidate_cities().await;
    sqlx::query("ALTER TABLE cities RENAME TO cities_moved")
        .execute(&pool)
        .await
        .unwrap();

    assert!(state.cache.get_active_cities().await.is_err());
    let response = send(&app, request(Method::GET, "/api/cities", None, None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["success"], false);
}

#[sqlx::test(migrations = "./src/migrations")]
async fn package_list_reports_database_errors(pool: PgPool) {
    let state = common::test_state(pool.clone(), NO_GATEWAY).await;
    let app = app(state.clone());

    state.cache.invalidate_packages().await;
    sqlx::query("ALTER TABLE packages RENAME TO packages_moved")
        .execute(&pool)
        .await
        .unwrap();

    let response = send(&app, request(Method::GET, "/api/packages", None, None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["success"], false);
}

#[sqlx::test(migrations = "./src/migrations")]
async fn malformed_city_import_gets_error_envelope(pool: PgPool) {
    let state = common::test_state(pool.clone(), NO_GATEWAY).await;
    let app = app(state.clone());
    let admin = common::seed_user(&pool, true).await;
    let token = state.jwt.issue(admin, true).unwrap();

    let req = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/cities/import")
        .header(axum::http::header::AUTHORIZATION, format!("Bearer {}", token))
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("[{\"name\": "))
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./src/migrations")]
async fn deactivated_users_lose_their_tokens(pool: PgPool) {
    let state = common::test_state(pool.clone(), NO_GATEWAY).await;
    let app = app(state.clone());
    let user = common::seed_user(&pool, false).await;
    let admin = common::seed_user(&pool, true).await;
    let token = state.jwt.issue(user, false).unwrap();
    let admin_token = state.jwt.issue(admin, true).unwrap();

    let response = send(&app, request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/users/{}", user);
    let response = send(&app, request(Method::PUT, &uri, Some(&admin_token), Some(json!({ "isActive": false })))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["isActive"], false);

    let response = send(&app, request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "TOKEN_REVOKED");

    // Other accounts are unaffected
    let response = send(&app, request(Method::GET, &uri, Some(&admin_token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
