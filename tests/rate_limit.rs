#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use revu::mail::LogMailer;
use revu::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use revu::repo::inmem::InMemRepo;
use revu::{config, AppState};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("REVU_DATA_DIR", tempfile::tempdir().unwrap().path());
}

fn tight_signup_limits() -> RateLimitConfig {
    RateLimitConfig {
        signup_limit: 1,
        signup_window: Duration::from_secs(300),
        review_limit: 100,
        review_window: Duration::from_secs(60),
        comment_limit: 100,
        comment_window: Duration::from_secs(60),
    }
}

#[actix_web::test]
#[serial]
async fn signup_is_rate_limited_per_client() {
    setup_env();
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(), tight_signup_limits());
    let state = AppState {
        repo: Arc::new(InMemRepo::new()),
        mailer: Arc::new(LogMailer),
        rate_limiter: Some(limiter),
    };
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"alice","email":"alice@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200, "first signup allowed");

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/signup")
        .set_json(&serde_json::json!({"username":"bob","email":"bob@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429, "second signup from the same client limited");
}

#[::core::prelude::v1::test]
fn facade_keys_actions_separately() {
    let facade = RateLimiterFacade::new(InMemoryRateLimiter::new(), tight_signup_limits());
    assert!(facade.allow_signup("10.0.0.1"));
    assert!(!facade.allow_signup("10.0.0.1"));
    // a different action and a different client are unaffected
    assert!(facade.allow_review("10.0.0.1"));
    assert!(facade.allow_signup("10.0.0.2"));
}
