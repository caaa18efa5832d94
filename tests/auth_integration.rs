use actix_web::web;
use chrono::Duration;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

use keyward::account::Role;
use keyward::auth::{AuthService, InMemoryRevocationRegistry};
use keyward::clock::SystemClock;
use keyward::configuration::{JwtSettings, Settings};
use keyward::startup::run;
use keyward::store::InMemoryCredentialStore;

const PASSWORD: &str = "SecurePass123";

pub struct TestApp {
    pub address: String,
    pub auth: web::Data<AuthService>,
    pub client: reqwest::Client,
}

fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut settings = Settings::with_jwt(JwtSettings::new(
        "integration-access-secret-0123456789",
        "integration-refresh-secret-0123456789",
    ));
    settings.password.cost = 4;

    let service = AuthService::new(
        &settings,
        Arc::new(InMemoryCredentialStore::new(settings.sessions.max_refresh_tokens)),
        Arc::new(InMemoryRevocationRegistry::new(Duration::seconds(60))),
        Arc::new(SystemClock),
    )
    .expect("Failed to build auth service");
    let auth = web::Data::new(service);

    let server = run(listener, auth.clone()).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        auth,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn post_with_token(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn get_me(&self, token: &str) -> reqwest::Response {
        self.client
            .get(&format!("{}/api/me", self.address))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, email: &str) -> Value {
        let response = self
            .post("/auth/register", json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    async fn login(&self, email: &str) -> Value {
        let response = self
            .post("/auth/login", json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }
}

fn token<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field].as_str().expect("token field missing")
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    body["code"].as_str().unwrap_or_default().to_string()
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_with_public_profile() {
    let app = spawn_app();

    let body = app.register("John@Example.com").await;

    assert_eq!(body["email"], "john@example.com");
    assert_eq!(body["role"], "user");
    assert_eq!(body["is_active"], true);
    assert!(body.get("password_hash").is_none());
    assert!(body.get("refresh_tokens").is_none());
}

#[tokio::test]
async fn register_returns_400_for_invalid_email() {
    let app = spawn_app();

    for invalid_email in ["notanemail", "user@", "@example.com", "user@@example.com"] {
        let response = app
            .post(
                "/auth/register",
                json!({ "email": invalid_email, "password": PASSWORD }),
            )
            .await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "Should reject invalid email: {}",
            invalid_email
        );
    }
}

#[tokio::test]
async fn register_returns_400_for_weak_password() {
    let app = spawn_app();

    let long_password = "Aa1".repeat(50);
    let weak_passwords = vec![
        ("Short1", "password too short"),
        ("nouppercase123", "no uppercase"),
        ("NOLOWERCASE123", "no lowercase"),
        ("NoDigitsHere", "no digits"),
        (long_password.as_str(), "password too long"),
    ];

    for (weak_password, reason) in weak_passwords {
        let response = app
            .post(
                "/auth/register",
                json!({ "email": "test@example.com", "password": weak_password }),
            )
            .await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "Should reject weak password: {}",
            reason
        );
    }
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app();
    app.register("dup@example.com").await;

    let response = app
        .post(
            "/auth/register",
            json!({ "email": "DUP@example.com", "password": PASSWORD }),
        )
        .await;

    assert_eq!(409, response.status().as_u16());
    assert_eq!(error_code(response).await, "DUPLICATE_ENTRY");
}

#[tokio::test]
async fn register_returns_400_for_missing_fields() {
    let app = spawn_app();

    let cases = vec![
        (json!({ "password": PASSWORD }), "missing email"),
        (json!({ "email": "a@example.com" }), "missing password"),
        (json!({}), "missing both"),
    ];

    for (body, description) in cases {
        let response = app.post("/auth/register", body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 when the payload was {}.",
            description
        );
    }
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_token_pair() {
    let app = spawn_app();
    app.register("login@example.com").await;

    let body = app.login("LOGIN@example.com").await;

    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["refresh_expires_in"], 604_800);
    assert_eq!(body["account"]["email"], "login@example.com");
    assert!(body["account"]["last_login_at"].is_string());
    assert_ne!(token(&body, "access_token"), token(&body, "refresh_token"));
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.register("known@example.com").await;

    let unknown = app
        .post(
            "/auth/login",
            json!({ "email": "unknown@example.com", "password": PASSWORD }),
        )
        .await;
    let wrong = app
        .post(
            "/auth/login",
            json!({ "email": "known@example.com", "password": "WrongPass123" }),
        )
        .await;

    assert_eq!(401, unknown.status().as_u16());
    assert_eq!(401, wrong.status().as_u16());

    let unknown: Value = unknown.json().await.unwrap();
    let wrong: Value = wrong.json().await.unwrap();
    assert_eq!(unknown["code"], "INVALID_CREDENTIALS");
    assert_eq!(unknown["code"], wrong["code"]);
    assert_eq!(unknown["message"], wrong["message"]);
}

#[tokio::test]
async fn login_locks_account_after_repeated_failures() {
    let app = spawn_app();
    app.register("lock@example.com").await;

    for _ in 0..5 {
        let response = app
            .post(
                "/auth/login",
                json!({ "email": "lock@example.com", "password": "WrongPass123" }),
            )
            .await;
        assert_eq!(401, response.status().as_u16());
    }

    let response = app
        .post(
            "/auth/login",
            json!({ "email": "lock@example.com", "password": PASSWORD }),
        )
        .await;

    assert_eq!(423, response.status().as_u16());
    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("Retry-After header");
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(error_code(response).await, "ACCOUNT_LOCKED");
}

// --- Protected Route Tests ---

#[tokio::test]
async fn protected_route_returns_401_without_token() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/api/me", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "MISSING_TOKEN");
}

#[tokio::test]
async fn protected_route_returns_401_with_invalid_token() {
    let app = spawn_app();

    let response = app.get_me("invalid.token.here").await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "TOKEN_INVALID");
}

#[tokio::test]
async fn protected_route_rejects_malformed_authorization_header() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/api/me", app.address))
        .header("Authorization", "Token abc")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn protected_route_rejects_refresh_token_as_bearer() {
    let app = spawn_app();
    app.register("class@example.com").await;
    let session = app.login("class@example.com").await;

    let response = app.get_me(token(&session, "refresh_token")).await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "TOKEN_INVALID");
}

#[tokio::test]
async fn get_current_account_returns_profile() {
    let app = spawn_app();
    let registered = app.register("me@example.com").await;
    let session = app.login("me@example.com").await;

    let response = app.get_me(token(&session, "access_token")).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], registered["id"]);
    assert_eq!(body["email"], "me@example.com");
}

// --- Refresh Tests ---

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = spawn_app();
    app.register("rotate@example.com").await;
    let session = app.login("rotate@example.com").await;
    let original = token(&session, "refresh_token");

    let response = app
        .post("/auth/refresh", json!({ "refresh_token": original }))
        .await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();
    assert_ne!(token(&rotated, "refresh_token"), original);
    assert_eq!(200, app.get_me(token(&rotated, "access_token")).await.status().as_u16());

    let replay = app
        .post("/auth/refresh", json!({ "refresh_token": original }))
        .await;
    assert_eq!(401, replay.status().as_u16());
    assert_eq!(error_code(replay).await, "TOKEN_INVALID");
}

#[tokio::test]
async fn refresh_rejects_access_token() {
    let app = spawn_app();
    app.register("wrongclass@example.com").await;
    let session = app.login("wrongclass@example.com").await;

    let response = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": token(&session, "access_token") }),
        )
        .await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn refresh_returns_400_for_missing_token() {
    let app = spawn_app();

    let response = app.post("/auth/refresh", json!({})).await;

    assert_eq!(400, response.status().as_u16());
}

// --- Logout Tests ---

#[tokio::test]
async fn logout_revokes_presented_tokens() {
    let app = spawn_app();
    app.register("bye@example.com").await;
    let session = app.login("bye@example.com").await;
    let access = token(&session, "access_token");
    let refresh = token(&session, "refresh_token");

    let response = app
        .client
        .post(&format!("{}/auth/logout", app.address))
        .bearer_auth(access)
        .json(&json!({ "refresh_token": refresh }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(204, response.status().as_u16());

    assert_eq!(401, app.get_me(access).await.status().as_u16());
    let response = app
        .post("/auth/refresh", json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn logout_without_tokens_is_a_no_op() {
    let app = spawn_app();

    let response = app
        .client
        .post(&format!("{}/auth/logout", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(204, response.status().as_u16());
}

#[tokio::test]
async fn logout_all_invalidates_other_sessions() {
    let app = spawn_app();
    app.register("everywhere@example.com").await;
    let session_a = app.login("everywhere@example.com").await;
    let session_b = app.login("everywhere@example.com").await;

    let response = app
        .post_with_token("/api/logout-all", token(&session_a, "access_token"))
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revoked_sessions"], 2);

    let response = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": token(&session_b, "refresh_token") }),
        )
        .await;
    assert_eq!(401, response.status().as_u16());
}

// --- Admin Tests ---

async fn admin_token(app: &TestApp) -> String {
    app.auth
        .create_account("admin@example.com", PASSWORD, Role::Admin)
        .await
        .expect("Failed to create admin");
    let session = app.login("admin@example.com").await;
    token(&session, "access_token").to_string()
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = spawn_app();
    let user = app.register("plain@example.com").await;
    let session = app.login("plain@example.com").await;

    let response = app
        .post_with_token(
            &format!("/api/admin/accounts/{}/deactivate", user["id"].as_str().unwrap()),
            token(&session, "access_token"),
        )
        .await;

    assert_eq!(403, response.status().as_u16());
    assert_eq!(error_code(response).await, "FORBIDDEN");
}

#[tokio::test]
async fn admin_deactivation_revokes_sessions() {
    let app = spawn_app();
    let admin = admin_token(&app).await;
    let user = app.register("target@example.com").await;
    let user_id = user["id"].as_str().unwrap().to_string();
    let session = app.login("target@example.com").await;

    let response = app
        .post_with_token(&format!("/api/admin/accounts/{}/deactivate", user_id), &admin)
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["is_active"], false);

    let response = app.get_me(token(&session, "access_token")).await;
    assert_eq!(403, response.status().as_u16());
    assert_eq!(error_code(response).await, "ACCOUNT_INACTIVE");

    let response = app
        .post(
            "/auth/login",
            json!({ "email": "target@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(401, response.status().as_u16());

    let response = app
        .post_with_token(&format!("/api/admin/accounts/{}/activate", user_id), &admin)
        .await;
    assert_eq!(200, response.status().as_u16());

    // Sessions stay revoked after re-activation.
    let response = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": token(&session, "refresh_token") }),
        )
        .await;
    assert_eq!(401, response.status().as_u16());
    app.login("target@example.com").await;
}

#[tokio::test]
async fn admin_revoke_sessions_reports_count() {
    let app = spawn_app();
    let admin = admin_token(&app).await;
    let user = app.register("revoked@example.com").await;
    app.login("revoked@example.com").await;
    app.login("revoked@example.com").await;

    let response = app
        .post_with_token(
            &format!(
                "/api/admin/accounts/{}/revoke-sessions",
                user["id"].as_str().unwrap()
            ),
            &admin,
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revoked_sessions"], 2);
}

#[tokio::test]
async fn admin_action_on_unknown_account_returns_404() {
    let app = spawn_app();
    let admin = admin_token(&app).await;

    let response = app
        .post_with_token(
            &format!("/api/admin/accounts/{}/deactivate", uuid::Uuid::new_v4()),
            &admin,
        )
        .await;

    assert_eq!(404, response.status().as_u16());
}
