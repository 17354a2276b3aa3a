mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use common::TestHarness;

fn email(attachments: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "to": "Reports <reports-harbor@prism.test>",
        "from": "sam@harbor.test",
        "subject": "Monthly numbers",
        "attachments": attachments,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_email_without_attachments_is_answered_not_queued() {
    let harness = TestHarness::new();

    let response = harness.services.webhook.handle(&email(json!([])));

    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert_eq!(response.body["status"], "rejected");
    assert_eq!(response.body["tenant"], "harbor");
    assert!(response.body["reportIds"].as_array().unwrap().is_empty());

    let stats = harness.services.queue.stats().unwrap();
    assert_eq!(stats.analyze.waiting, 0);
    assert_eq!(stats.notify.waiting, 1);

    harness.drain().await;

    let replies = harness.sent_to("sam@harbor.test");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].subject, "Re: Monthly numbers");
    assert!(replies[0].text.contains("no attachments"));

    // Nothing was analysed, so no role heard about it.
    assert_eq!(harness.outbox.sent().len(), 1);
    assert_eq!(harness.services.queue.stats().unwrap().analyze.completed, 0);
}

#[tokio::test]
async fn test_unsupported_attachment_is_rejected_with_reason() {
    let harness = TestHarness::new();
    let body = email(json!([{
        "filename": "photo.jpg",
        "content": STANDARD.encode([0xffu8, 0xd8, 0xff, 0xe0]),
    }]));

    let response = harness.services.webhook.handle(&body);

    assert_eq!(response.status, 200);
    assert_eq!(response.body["status"], "rejected");
    assert_eq!(response.body["rejected"].as_array().unwrap().len(), 1);

    harness.drain().await;
    let replies = harness.sent_to("sam@harbor.test");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("photo.jpg"));
}

#[tokio::test]
async fn test_malformed_payload_is_a_client_error() {
    let harness = TestHarness::new();

    let response = harness.services.webhook.handle(b"{\"attachments\": 42}");

    assert_eq!(response.status, 400);
    assert!(!response.is_success());
    assert!(harness.services.queue.stats().unwrap().is_idle());
}
