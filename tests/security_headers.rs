#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use revu::mail::LogMailer;
use revu::repo::inmem::InMemRepo;
use revu::{config, AppState, SecurityHeaders};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("REVU_DATA_DIR", tempfile::tempdir().unwrap().path());
    std::env::remove_var("ENABLE_HSTS");
}

fn state() -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        mailer: Arc::new(LogMailer),
        rate_limiter: None,
    }
}

#[actix_web::test]
#[serial]
async fn baseline_headers_are_applied() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/categories").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let headers = resp.headers();
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert!(headers.get("content-security-policy").is_some());
    // HSTS is opt-in and off by default
    assert!(headers.get("strict-transport-security").is_none());
}

#[actix_web::test]
#[serial]
async fn hsts_is_opt_in() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env().with_hsts(true))
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/genres").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp
        .headers()
        .get("strict-transport-security")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("max-age"));
}
