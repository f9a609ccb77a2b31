//! End-to-end reconciliation flows through the HTTP surface.

mod common;

use common::{card_payload, response_json, wallet_payload, TestApp};
use http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn card_success_confirms_order_and_replay_is_idempotent() {
    let app = TestApp::new();
    let order_id = app.create_order("P-123", 5000, "EGP").await;

    let payload = card_payload("evt_1", "P-123", "captured", "50.00");
    let response = app.deliver_card(&payload).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["result"], "applied");
    assert_eq!(ack["payment_status"], "succeeded");
    assert_eq!(ack["order_id"], order_id.as_str());

    let status = response_json(
        app.get(&format!("/api/v1/orders/{order_id}/payment-status"))
            .await,
    )
    .await;
    assert_eq!(status["payment_status"], "succeeded");
    assert_eq!(status["order_status"], "confirmed");

    // Same event id delivered again: acknowledged, nothing re-applied.
    let response = app.deliver_card(&payload).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "duplicate");
    assert_eq!(ack["payment_status"], "succeeded");
}

#[tokio::test]
async fn wallet_success_confirms_order() {
    let app = TestApp::new();
    app.create_order("P-200", 7500, "EGP").await;

    let response = app
        .deliver_wallet(&wallet_payload("we_1", "P-200", "SUCCESS", 7500))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "applied");
    assert_eq!(ack["payment_status"], "succeeded");

    let status = response_json(app.get("/api/v1/payment-status/P-200").await).await;
    assert_eq!(status["payment_status"], "succeeded");
}

#[tokio::test]
async fn terminal_failure_is_sticky_against_late_success() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    let response = app
        .deliver_card(&card_payload("evt_fail", "P-123", "declined", "50.00"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["result"], "applied");

    // Late success with a new event id does not resurrect the order.
    let response = app
        .deliver_card(&card_payload("evt_late", "P-123", "captured", "50.00"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "terminal_state_sticky");

    let status = response_json(app.get("/api/v1/payment-status/P-123").await).await;
    assert_eq!(status["payment_status"], "failed");
    assert_eq!(status["order_status"], "cancelled");
}

#[tokio::test]
async fn failure_after_success_is_conflict_and_status_unchanged() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    let response = app
        .deliver_card(&card_payload("evt_1", "P-123", "captured", "50.00"))
        .await;
    assert_eq!(response_json(response).await["result"], "applied");

    // Provider later reports the same payment as declined.
    let response = app
        .deliver_card(&card_payload("evt_2", "P-123", "declined", "50.00"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "terminal_state_sticky");

    let status = response_json(app.get("/api/v1/payment-status/P-123").await).await;
    assert_eq!(status["payment_status"], "succeeded");
    assert_eq!(status["order_status"], "confirmed");

    let conflicts = response_json(app.get("/api/v1/admin/conflicts").await).await;
    let conflicts = conflicts.as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["external_event_id"], "evt_2");
    assert_eq!(conflicts[0]["payment_status_at_conflict"], "succeeded");
}

#[tokio::test]
async fn amount_mismatch_is_recorded_and_auditable() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    let response = app
        .deliver_card(&card_payload("evt_1", "P-123", "captured", "49.99"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "amount_mismatch");

    // Order untouched.
    let status = response_json(app.get("/api/v1/payment-status/P-123").await).await;
    assert_eq!(status["payment_status"], "pending");

    let conflicts = response_json(app.get("/api/v1/admin/conflicts").await).await;
    let conflicts = conflicts.as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["reason"], "amount_mismatch");
    assert_eq!(conflicts[0]["external_event_id"], "evt_1");
}

#[tokio::test]
async fn cross_provider_double_success_is_flagged() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    app.deliver_card(&card_payload("evt_1", "P-123", "captured", "50.00"))
        .await;
    let response = app
        .deliver_wallet(&wallet_payload("we_1", "P-123", "SUCCESS", 5000))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "provider_disagreement");
}

#[tokio::test]
async fn partial_refunds_accumulate_to_full_refund() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    app.deliver_card(&card_payload("evt_1", "P-123", "captured", "50.00"))
        .await;

    let ack = response_json(
        app.deliver_card(&card_payload("ref_1", "P-123", "refunded", "20.00"))
            .await,
    )
    .await;
    assert_eq!(ack["result"], "applied");
    assert_eq!(ack["payment_status"], "succeeded");

    let ack = response_json(
        app.deliver_card(&card_payload("ref_2", "P-123", "refunded", "30.00"))
            .await,
    )
    .await;
    assert_eq!(ack["result"], "applied");
    assert_eq!(ack["payment_status"], "refunded");

    // Refunds never cancel a confirmed order.
    let status = response_json(app.get("/api/v1/payment-status/P-123").await).await;
    assert_eq!(status["order_status"], "confirmed");

    // One more minor unit is an over-refund.
    let ack = response_json(
        app.deliver_card(&card_payload("ref_3", "P-123", "refunded", "0.01"))
            .await,
    )
    .await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "terminal_state_sticky");
}

#[tokio::test]
async fn over_refund_is_rejected_while_partially_refunded() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;
    app.deliver_card(&card_payload("evt_1", "P-123", "captured", "50.00"))
        .await;
    app.deliver_card(&card_payload("ref_1", "P-123", "refunded", "20.00"))
        .await;

    // 20 + 40 would exceed the 50 charge.
    let ack = response_json(
        app.deliver_card(&card_payload("ref_2", "P-123", "refunded", "40.00"))
            .await,
    )
    .await;
    assert_eq!(ack["result"], "conflict_recorded");
    assert_eq!(ack["reason"], "over_refund");
}

#[tokio::test]
async fn unmatched_event_is_parked_as_orphan() {
    let app = TestApp::new();

    let response = app
        .deliver_wallet(&wallet_payload("we_lost", "P-unknown", "SUCCESS", 5000))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["result"], "orphaned");

    let orphans = response_json(app.get("/api/v1/admin/orphans").await).await;
    let orphans = orphans.as_array().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["order_reference_id"], "P-unknown");
    assert_eq!(orphans[0]["external_event_id"], "we_lost");

    // Redelivery of the parked event is a duplicate, not a second orphan.
    let response = app
        .deliver_wallet(&wallet_payload("we_lost", "P-unknown", "SUCCESS", 5000))
        .await;
    assert_eq!(response_json(response).await["result"], "duplicate");
}

#[tokio::test]
async fn duplicate_order_registration_conflicts() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;

    let response = app
        .post_json(
            "/api/v1/orders",
            json!({
                "unique_payment_id": "P-123",
                "expected_amount_minor": 9000,
                "currency": "EGP",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_order_registration_is_rejected() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/api/v1/orders",
            json!({
                "unique_payment_id": "P-123",
                "expected_amount_minor": 0,
                "currency": "EGP",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Digits pass the length check but no event can ever carry "EG1".
    let response = app
        .post_json(
            "/api/v1/orders",
            json!({
                "unique_payment_id": "P-124",
                "expected_amount_minor": 5000,
                "currency": "EG1",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_status_is_404() {
    let app = TestApp::new();
    let response = app.get("/api/v1/payment-status/P-nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get(&format!(
            "/api/v1/orders/{}/payment-status",
            uuid::Uuid::new_v4()
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provider_health_probes() {
    let app = TestApp::new();
    for uri in [
        "/api/v1/webhooks/card/health",
        "/api/v1/webhooks/wallet/health",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["success"], true);
    }
}

#[tokio::test]
async fn health_status_and_metrics_endpoints() {
    let app = TestApp::new();
    app.create_order("P-123", 5000, "EGP").await;
    app.deliver_card(&card_payload("evt_1", "P-123", "captured", "50.00"))
        .await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "ok");

    let status = response_json(app.get("/api/v1/status").await).await;
    assert_eq!(status["service"], "paysync-api");

    let response = app.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains("paysync_events_applied_total 1"));
    assert!(text.contains("paysync_webhooks_received_card_total 1"));

    let json = response_json(app.get("/metrics/json").await).await;
    assert_eq!(json["counters"]["paysync_events_applied_total"], 1);
}
