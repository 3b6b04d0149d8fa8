//! Integration tests for check-in submission, the day listing and the
//! internal evaluation hook.

mod common;

use axum::http::{Method, StatusCode};
use common::{at, test_config, TestApp, SERVICE_KEY};

// ---------------------------------------------------------------------------
// Test: a full day, from check-ins to the evaluator's locked fails
// ---------------------------------------------------------------------------

#[tokio::test]
async fn day_is_judged_and_then_frozen() {
    let app = TestApp::new("2024-01-10T12:00:00Z");
    let (ada_id, ada) = app.sign_up("ada@example.com", "Ada").await;
    let (bob_id, bob) = app.sign_up("bob@example.com", "Bob").await;
    let challenge = app.create_challenge(&ada, true).await;
    let id = challenge["id"].as_str().unwrap();
    app.join(&bob, challenge["join_code"].as_str().unwrap()).await;

    // Success without the required proof is refused.
    let missing = app.check_in(&ada, id, "success", None).await;
    assert_eq!(missing.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(missing.json["code"], "SCREENSHOT_REQUIRED_FOR_SUCCESS");

    let recorded = app
        .check_in(&ada, id, "success", Some(("run.png", "png-bytes")))
        .await;
    assert_eq!(recorded.status, StatusCode::CREATED, "{}", recorded.json);
    assert_eq!(recorded.json["status"], "success");
    assert_eq!(recorded.json["source"], "user");
    assert_eq!(recorded.json["locked"], false);
    assert_eq!(app.blobs.len(), 1);

    // Past the 22:00 deadline the evaluator fails Bob and freezes his day.
    app.clock.set(at("2024-01-10T22:05:00Z"));
    let late = app.check_in(&ada, id, "fail", None).await;
    assert_eq!(late.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(late.json["code"], "CHECKIN_DEADLINE_PASSED");

    let pass = app.evaluate(Some(SERVICE_KEY)).await;
    assert_eq!(pass.status, StatusCode::OK);
    assert_eq!(pass.json["total_fails_created"], 1);
    assert_eq!(pass.json["runs"][0]["evaluation_date"], "2024-01-10");
    assert_eq!(pass.json["runs"][0]["members_processed"], 2);

    // The locked row wins over the deadline check.
    let frozen = app.check_in(&bob, id, "success", Some(("late.png", "png"))).await;
    assert_eq!(frozen.status, StatusCode::CONFLICT);
    assert_eq!(frozen.json["code"], "CHECKIN_LOCKED_FINAL");
    assert_eq!(app.blobs.len(), 1);

    // Everyone in the challenge can review the day.
    let day = app
        .json(
            Method::GET,
            &format!("/challenges/{}/days/2024-01-10/check-ins", id),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(day.status, StatusCode::OK);
    let rows = day.json.as_array().unwrap();
    assert_eq!(rows.len(), 2);

    let ada_row = rows.iter().find(|r| r["user_id"] == ada_id).unwrap();
    assert_eq!(ada_row["display_name"], "Ada");
    assert!(ada_row["proof_url"]
        .as_str()
        .unwrap()
        .starts_with("memory://proofs/"));

    let bob_row = rows.iter().find(|r| r["user_id"] == bob_id).unwrap();
    assert_eq!(bob_row["status"], "fail");
    assert_eq!(bob_row["source"], "system_cron");
    assert_eq!(bob_row["locked"], true);
    assert!(bob_row["proof_url"].is_null());

    // A second pass finds nothing left to do.
    let again = app.evaluate(Some(SERVICE_KEY)).await;
    assert_eq!(again.json["total_fails_created"], 0);
    assert_eq!(again.json["runs"][0]["already_final"], 1);
}

#[tokio::test]
async fn outsiders_cannot_check_in_or_review() {
    let app = TestApp::new("2024-01-10T12:00:00Z");
    let (_, owner) = app.sign_up("owner@example.com", "Owner").await;
    let (_, eve) = app.sign_up("eve@example.com", "Eve").await;
    let challenge = app.create_challenge(&owner, false).await;
    let id = challenge["id"].as_str().unwrap();

    let reply = app.check_in(&eve, id, "success", Some(("x.png", "png"))).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json["code"], "NOT_A_MEMBER");
    assert!(app.blobs.is_empty());

    let day = app
        .json(
            Method::GET,
            &format!("/challenges/{}/days/2024-01-10/check-ins", id),
            Some(&eve),
            None,
        )
        .await;
    assert_eq!(day.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_field_is_validated() {
    let app = TestApp::new("2024-01-10T12:00:00Z");
    let (_, owner) = app.sign_up("owner@example.com", "Owner").await;
    let challenge = app.create_challenge(&owner, false).await;
    let id = challenge["id"].as_str().unwrap();

    let reply = app.check_in(&owner, id, "maybe", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.check_in_count(id.parse().unwrap()), 0);
}

#[tokio::test]
async fn revising_before_the_deadline_replaces_the_proof() {
    let app = TestApp::new("2024-01-10T09:00:00Z");
    let (_, owner) = app.sign_up("owner@example.com", "Owner").await;
    let challenge = app.create_challenge(&owner, false).await;
    let id = challenge["id"].as_str().unwrap();

    let first = app.check_in(&owner, id, "fail", Some(("a.jpg", "jpg"))).await;
    let old_ref = first.json["screenshot_ref"].as_str().unwrap().to_string();

    app.clock.set(at("2024-01-10T21:59:00Z"));
    let second = app.check_in(&owner, id, "success", Some(("b.jpg", "jpg"))).await;
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.json["id"], first.json["id"]);
    assert!(!app.blobs.contains(&old_ref));
    assert_eq!(app.blobs.len(), 1);
}

#[tokio::test]
async fn check_in_after_the_challenge_ended_is_unprocessable() {
    let app = TestApp::new("2024-01-10T12:00:00Z");
    let (_, owner) = app.sign_up("owner@example.com", "Owner").await;
    let challenge = app.create_challenge(&owner, false).await;
    let id = challenge["id"].as_str().unwrap();

    app.clock.set(at("2024-02-05T10:00:00Z"));
    let reply = app.check_in(&owner, id, "success", None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.json["code"], "OUTSIDE_CHALLENGE_WINDOW");
    assert_eq!(app.store.check_in_count(id.parse().unwrap()), 0);
}

// ---------------------------------------------------------------------------
// Test: the internal hook is guarded by the service key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn evaluate_requires_the_service_key() {
    let app = TestApp::new("2024-01-10T23:00:00Z");

    assert_eq!(app.evaluate(None).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.evaluate(Some("guess")).await.status, StatusCode::UNAUTHORIZED);

    let ok = app.evaluate(Some(SERVICE_KEY)).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.json["errors"], 0);
}

#[tokio::test]
async fn evaluate_is_disabled_without_a_configured_key() {
    let app = TestApp::with_config("2024-01-10T23:00:00Z", test_config(None));

    let reply = app.evaluate(Some(SERVICE_KEY)).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}
