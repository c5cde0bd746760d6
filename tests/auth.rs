#![cfg(feature = "inmem-store")]

use actix_web::{dev::Payload, test, App, FromRequest};
use async_trait::async_trait;
use revu::auth::{create_jwt, Auth, Role};
use revu::mail::{MailError, Mailer};
use revu::repo::inmem::InMemRepo;
use revu::routes::{config, AppState};
use serial_test::serial;
use std::sync::{Arc, Mutex};

// Helper that guarantees a sufficiently long secret for tests.
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("REVU_DATA_DIR", tempfile::tempdir().unwrap().path());
    std::env::set_var("REVU_BOOTSTRAP_ADMINS", "");
}

/// Captures outgoing confirmation mail so tests can read the code.
#[derive(Default, Clone)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<(String, String)>>>, // (email, code)
}

impl RecordingMailer {
    fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().expect("no mail sent").1.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_confirmation(
        &self,
        email: &str,
        _username: &str,
        code: &str,
    ) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

fn state(mailer: Arc<dyn Mailer>) -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        mailer,
        rate_limiter: None,
    }
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    setup_env();
    let token = create_jwt("tester", Role::User, false).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.sub, "tester");
    assert_eq!(auth.0.role, Role::User);
    assert!(!auth.0.superuser);
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    setup_env();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial]
async fn signup_then_token_state_machine() {
    setup_env();
    let mailer = RecordingMailer::default();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(Arc::new(mailer.clone()))))
            .configure(config),
    )
    .await;

    // signup issues a code through the mail sink
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"alice","email":"alice@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["username"], "alice");
    let first_code = mailer.last_code();

    // wrong code is a 400 and does not rotate the stored code
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"alice","confirmation_code":"wrong"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // the original code still works after the failed attempt
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"alice","confirmation_code":first_code}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    // the minted token authenticates the self-profile route
    let req = test::TestRequest::get()
        .uri("/api/v1/users/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["username"], "alice");
    assert_eq!(me["role"], "user");

    // re-signup with the same pair is idempotent but rotates the code
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"alice","email":"alice@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let second_code = mailer.last_code();
    assert_ne!(first_code, second_code);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"alice","confirmation_code":first_code}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400, "rotated-out code must be rejected");

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"alice","confirmation_code":second_code}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
#[serial]
async fn signup_validation_failures() {
    setup_env();
    let mailer = RecordingMailer::default();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(Arc::new(mailer.clone()))))
            .configure(config),
    )
    .await;

    // reserved username
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"me","email":"me@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["field"], "username");
    assert!(body["error"].as_str().unwrap().contains("reserved"));

    // malformed email
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"carol","email":"not-an-email"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["field"], "email");

    // seed an identity, then collide on each field separately
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"dave","email":"dave@example.com"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"dave","email":"other@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["field"], "username");

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"erin","email":"dave@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["field"], "email");
}

#[actix_web::test]
#[serial]
async fn token_endpoint_edge_cases() {
    setup_env();
    let mailer = RecordingMailer::default();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(Arc::new(mailer.clone()))))
            .configure(config),
    )
    .await;

    // unknown username is NotFound, not a validation error
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"ghost","confirmation_code":"x"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // missing confirmation_code names the field
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"ghost"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["field"], "confirmation_code");
}

#[actix_web::test]
#[serial]
async fn bootstrap_admins_are_elevated_at_token_mint() {
    setup_env();
    std::env::set_var("REVU_BOOTSTRAP_ADMINS", "root");
    let mailer = RecordingMailer::default();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(Arc::new(mailer.clone()))))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"root","email":"root@example.com"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let code = mailer.last_code();

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/token")
        .set_json(&serde_json::json!({"username":"root","confirmation_code":code}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    // the elevated token passes admin-only gates
    let req = test::TestRequest::post()
        .uri("/api/v1/categories")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"name":"Films","slug":"films"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    std::env::set_var("REVU_BOOTSTRAP_ADMINS", "");
}
