//! Call lifecycle API integration tests

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{device_for, participant_status, TestApp};
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_start_call_rings_every_resident() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/calls/start",
            json!({
                "apartmentNumber": "101",
                "buildingId": app.building.to_string(),
                "initiatorId": app.doorman.to_string(),
                "initiatorType": "doorman",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(body["success"], true);
    assert_eq!(data["call"]["status"], "calling");
    assert_eq!(data["apartment"]["number"], "101");
    assert_eq!(data["initiator"]["kind"], "doorman");
    assert_eq!(data["participants"].as_array().unwrap().len(), 3);
    assert_eq!(data["callees"].as_array().unwrap().len(), 2);
    assert_eq!(data["invite"]["t"], "INVITE");
    assert_eq!(data["invite"]["v"], 1);
    assert_eq!(
        data["invite"]["channel"],
        format!("call-{}", data["call"]["id"].as_str().unwrap())
    );
    assert_eq!(data["credential"]["uid"], app.doorman.to_string());
    assert_eq!(participant_status(data, &app.doorman), "connected");
}

#[tokio::test]
async fn test_start_call_validation() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post("/api/calls/start", json!({"apartmentNumber": "101"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = app
        .post(
            "/api/calls/start",
            json!({
                "apartmentNumber": "999",
                "buildingId": app.building.to_string(),
                "initiatorId": app.doorman.to_string(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_gets_error_envelope() {
    let app = TestApp::new().await;
    let call_id = app.start_call().await;

    let request = Request::post(format!("/api/calls/{}/answer", call_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].is_string());

    // Wrong content type is rejected the same way
    let request = Request::post("/api/calls/start")
        .body(Body::from("apartmentNumber=101"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (_, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(body["data"]["call"]["status"], "calling");
}

#[tokio::test(start_paused = true)]
async fn test_first_answer_wins_and_others_are_missed() {
    let app = TestApp::new().await;
    let (r1, r2) = (app.residents[0], app.residents[1]);
    let call_id = app.start_call().await;

    // Let the first fan-out tick deliver
    tokio::time::sleep(Duration::from_millis(50)).await;
    let recipients = app.push.recipients();
    assert!(recipients.contains(&device_for(&r1)));
    assert!(recipients.contains(&device_for(&r2)));

    let (status, body) = app.answer(&call_id, &r2).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["call"]["status"], "answered");
    assert!(data["call"]["answered_at"].is_string());
    assert_eq!(participant_status(data, &r2), "connected");
    assert_eq!(participant_status(data, &r1), "missed");
    assert_eq!(data["credential"]["uid"], r2.to_string());

    let (status, body) = app.answer(&call_id, &r1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    // No more pushes after the answer
    let delivered = app.push.recipients().len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(app.push.recipients().len(), delivered);

    let (_, status_body) = app.get("/api/status").await;
    assert_eq!(status_body["data"]["activeFanoutLoops"], 0);
}

#[tokio::test]
async fn test_concurrent_answers_have_one_winner() {
    let app = TestApp::new().await;
    let mut residents = app.residents.clone();
    for _ in 0..4 {
        residents.push(app.add_resident().await);
    }
    let call_id = app.start_call().await;

    let results = join_all(residents.iter().map(|r| app.answer(&call_id, r))).await;
    let winners = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::OK)
        .count();
    let conflicts = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CONFLICT)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, residents.len() - 1);

    let (_, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    let connected = body["data"]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["participant_type"] == "resident" && p["status"] == "connected")
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_decline_by_everyone_closes_call() {
    let app = TestApp::new().await;
    let (r1, r2) = (app.residents[0], app.residents[1]);
    let call_id = app.start_call().await;

    let (status, body) = app.decline(&call_id, &r1).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allDeclined"], false);
    assert_eq!(body["data"]["call"]["status"], "calling");

    let (status, body) = app.decline(&call_id, &r2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allDeclined"], true);
    assert_eq!(body["data"]["call"]["status"], "declined");

    let (_, before) = app.get(&format!("/api/calls/{}/status", call_id)).await;

    // Answering a closed call mutates nothing
    let (status, _) = app.answer(&call_id, &r1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(body["data"]["call"]["status"], "declined");
    assert!(body["data"]["call"]["answered_at"].is_null());
    assert_eq!(participant_status(&body["data"], &r1), "declined");
    assert_eq!(body["data"]["call"], before["data"]["call"]);
    assert_eq!(body["data"]["participants"], before["data"]["participants"]);
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let app = TestApp::new().await;
    let r1 = app.residents[0];
    let call_id = app.start_call().await;
    app.answer(&call_id, &r1).await;

    let (status, first) = app.end(&call_id, &app.doorman, "doorman").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["call"]["status"], "ended");
    assert!(first["data"]["duration"].is_number());

    let (status, second) = app.end(&call_id, &r1, "resident").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["call"], first["data"]["call"]);
}

#[tokio::test]
async fn test_non_member_cannot_answer() {
    let app = TestApp::new().await;
    let call_id = app.start_call().await;

    let stranger = intercom::domain::shared::value_objects::PartyId::new();
    let (status, body) = app.answer(&call_id, &stranger).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app
        .answer(
            "3f1c0c52-6a57-4b8f-9a51-f7f0b7d4b0aa",
            &app.residents[0],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_is_missed_after_ring_timeout() {
    let app = TestApp::new().await;
    let call_id = app.start_call().await;

    tokio::time::sleep(Duration::from_secs(44)).await;
    let (_, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(body["data"]["call"]["status"], "calling");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let (status, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["call"]["status"], "missed");
    assert!(data["call"]["answered_at"].is_null());
    assert_eq!(participant_status(data, &app.residents[0]), "missed");
    assert_eq!(participant_status(data, &app.residents[1]), "missed");
    let missed = data.clone();

    let (_, status_body) = app.get("/api/status").await;
    assert_eq!(status_body["data"]["activeFanoutLoops"], 0);

    // A late answer changes nothing
    let (status, body) = app.answer(&call_id, &app.residents[0]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    let (_, body) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(body["data"]["call"], missed["call"]);
    assert_eq!(body["data"]["participants"], missed["participants"]);
}

#[tokio::test]
async fn test_ending_ringing_call_misses_callees_and_blocks_answer() {
    let app = TestApp::new().await;
    let (r1, r2) = (app.residents[0], app.residents[1]);
    let call_id = app.start_call().await;

    let (status, body) = app.end(&call_id, &app.doorman, "doorman").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["call"]["status"], "ended");

    let (_, before) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    let before = &before["data"];
    assert_eq!(participant_status(before, &app.doorman), "disconnected");
    assert_eq!(participant_status(before, &r1), "missed");
    assert_eq!(participant_status(before, &r2), "missed");

    let (status, body) = app.answer(&call_id, &r1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (_, after) = app.get(&format!("/api/calls/{}/status", call_id)).await;
    assert_eq!(after["data"]["call"], before["call"]);
    assert_eq!(after["data"]["participants"], before["participants"]);
    assert!(after["data"]["call"]["answered_at"].is_null());
}

#[tokio::test]
async fn test_resident_calls_front_desk() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/calls/call-doorman",
            json!({
                "residentId": app.residents[0].to_string(),
                "buildingId": app.building.to_string(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let data = &body["data"];
    assert_eq!(data["call"]["initiator_type"], "resident");
    assert_eq!(data["call"]["apartment_id"], app.apartment.to_string());
    assert_eq!(data["inviteTargets"], json!([app.doorman.to_string()]));
}

#[tokio::test]
async fn test_queries() {
    let app = TestApp::new().await;
    let ringing = app.start_call().await;
    let answered = app.start_call().await;
    app.answer(&answered, &app.residents[1]).await;

    let (status, body) = app
        .get(&format!(
            "/api/calls/history?buildingId={}&limit=500",
            app.building
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["limit"], 100);
    assert_eq!(body["data"]["offset"], 0);

    let (_, body) = app
        .get(&format!(
            "/api/calls/history?buildingId={}&status=answered",
            app.building
        ))
        .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["calls"][0]["id"], answered);

    let (_, body) = app
        .get(&format!("/api/calls/active?buildingId={}", app.building))
        .await;
    assert_eq!(body["data"]["count"], 2);

    let (_, body) = app
        .get(&format!("/api/calls/pending?residentId={}", app.residents[0]))
        .await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["calls"][0]["id"], ringing);

    let (status, _) = app.get("/api/calls/history?status=ringing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
