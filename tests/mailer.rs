use revu::mail::{LogMailer, Mailer, WebhookMailer};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn webhook_mailer_posts_the_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mailer = WebhookMailer::new(format!("{}/send", server.uri()));
    mailer
        .send_confirmation("alice@example.com", "alice", "CODE123")
        .await
        .expect("delivery");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["to"], "alice@example.com");
    assert_eq!(body["body"], "CODE123");
    assert!(body["subject"].as_str().unwrap().contains("confirmation"));
}

#[tokio::test]
async fn webhook_mailer_reports_relay_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mailer = WebhookMailer::new(server.uri());
    let err = mailer
        .send_confirmation("alice@example.com", "alice", "CODE123")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("delivery failed"));
}

#[tokio::test]
async fn log_mailer_never_fails() {
    LogMailer
        .send_confirmation("alice@example.com", "alice", "CODE123")
        .await
        .expect("log sink");
}
