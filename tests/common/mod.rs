//! Shared fixture: the full router over the in-memory store and directory

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use intercom::application::{
    CallLifecycleManager, CredentialIssuer, CredentialSettings, FanoutSettings,
    NotificationFanoutLoop,
};
use intercom::domain::access::{
    FixedWindowRateLimiter, IdentityProvider, RateLimitPolicy, VerifiedIdentity,
};
use intercom::domain::directory::{Apartment, Callee, Party};
use intercom::domain::push::{PushGateway, PushMessage, PushReceipt};
use intercom::domain::shared::value_objects::{ApartmentId, BuildingId, PartyId, PartyKind};
use intercom::infrastructure::persistence::{InMemoryCallRepository, InMemoryDirectory};
use intercom::infrastructure::signing::HmacTokenSigner;
use intercom::interface::api::{build_router, AppState};
use intercom::{DomainError, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt; // For `oneshot`

pub const SESSION: &str = "Bearer session-token";

/// Accepts exactly one session token
pub struct StaticIdentity;

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity> {
        if bearer == "session-token" {
            Ok(VerifiedIdentity {
                subject: "front-desk-user".to_string(),
                email: Some("desk@example.com".to_string()),
                role: Some("authenticated".to_string()),
            })
        } else {
            Err(DomainError::Unauthenticated("invalid session".to_string()))
        }
    }
}

/// Records every push it is asked to deliver
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<String>>,
}

impl RecordingPush {
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn send(&self, message: &PushMessage) -> Result<PushReceipt> {
        self.sent.lock().unwrap().push(message.to.clone());
        Ok(PushReceipt { ticket_id: None })
    }
}

pub struct TestApp {
    pub router: Router,
    pub directory: Arc<InMemoryDirectory>,
    pub push: Arc<RecordingPush>,
    pub building: BuildingId,
    pub apartment: ApartmentId,
    pub doorman: PartyId,
    pub residents: Vec<PartyId>,
    _timeout_worker: JoinHandle<()>,
}

pub fn device_for(id: &PartyId) -> String {
    format!("ExponentPushToken[{}]", id)
}

fn callee(id: PartyId, kind: PartyKind, name: &str) -> Callee {
    Callee {
        id,
        kind,
        name: Some(name.to_string()),
        device_address: Some(device_for(&id)),
        notifications_enabled: true,
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate_limit(60).await
    }

    /// Apartment 101 with two active residents and one doorman on duty
    pub async fn with_rate_limit(max_requests: u32) -> Self {
        let calls = Arc::new(InMemoryCallRepository::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let push = Arc::new(RecordingPush::default());

        let building = BuildingId::new();
        let apartment = ApartmentId::new();
        let doorman = PartyId::new();
        let residents = vec![PartyId::new(), PartyId::new()];

        directory
            .add_apartment(Apartment {
                id: apartment,
                number: "101".to_string(),
                block: Some("A".to_string()),
                building_id: building,
                building_name: Some("Edificio Aurora".to_string()),
            })
            .await;
        directory
            .add_party(Party {
                id: doorman,
                kind: PartyKind::Doorman,
                full_name: Some("Carlos".to_string()),
                building_id: Some(building),
            })
            .await;
        directory
            .add_doorman(building, callee(doorman, PartyKind::Doorman, "Carlos"), true)
            .await;
        for (i, resident) in residents.iter().enumerate() {
            let name = format!("Resident {}", i + 1);
            directory
                .add_party(Party {
                    id: *resident,
                    kind: PartyKind::Resident,
                    full_name: Some(name.clone()),
                    building_id: Some(building),
                })
                .await;
            directory
                .add_resident(apartment, callee(*resident, PartyKind::Resident, &name), true)
                .await;
        }

        let (fanout, timeouts) =
            NotificationFanoutLoop::new(push.clone(), calls.clone(), FanoutSettings::default());
        let signer = HmacTokenSigner::new("intercom-test", "test-certificate-secret")
            .expect("signer");
        let credentials = Arc::new(CredentialIssuer::new(
            Some(Arc::new(signer)),
            calls.clone(),
            CredentialSettings::default(),
        ));
        let manager = Arc::new(CallLifecycleManager::new(
            calls.clone(),
            directory.clone(),
            Arc::new(fanout),
            credentials.clone(),
        ));
        let timeout_worker = manager.clone().spawn_timeout_worker(timeouts);

        let state = AppState {
            calls: manager,
            credentials,
            call_store: calls,
            identity: Arc::new(StaticIdentity),
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(RateLimitPolicy {
                max_requests,
                window: Duration::from_secs(60),
            })),
            push_enabled: true,
            expose_errors: false,
            started_at: Utc::now(),
        };

        Self {
            router: build_router(state, None),
            directory,
            push,
            building,
            apartment,
            doorman,
            residents,
            _timeout_worker: timeout_worker,
        }
    }

    pub async fn add_resident(&self) -> PartyId {
        let id = PartyId::new();
        self.directory
            .add_party(Party {
                id,
                kind: PartyKind::Resident,
                full_name: None,
                building_id: Some(self.building),
            })
            .await;
        self.directory
            .add_resident(self.apartment, callee(id, PartyKind::Resident, "Guest"), true)
            .await;
        id
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request(uri, body)).await
    }

    /// Credential endpoints want a session and a client address
    pub async fn post_authed(&self, uri: &str, client: &str, body: Value) -> Response {
        let mut request = json_request(uri, body);
        let headers = request.headers_mut();
        headers.insert(header::AUTHORIZATION, SESSION.parse().unwrap());
        headers.insert("x-forwarded-for", client.parse().unwrap());
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Doorman rings apartment 101; returns the call id
    pub async fn start_call(&self) -> String {
        let (status, body) = self
            .post(
                "/api/calls/start",
                serde_json::json!({
                    "apartmentId": self.apartment.to_string(),
                    "buildingId": self.building.to_string(),
                    "initiatorId": self.doorman.to_string(),
                    "initiatorType": "doorman",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "start failed: {}", body);
        body["data"]["call"]["id"].as_str().unwrap().to_string()
    }

    pub async fn answer(&self, call_id: &str, resident: &PartyId) -> (StatusCode, Value) {
        self.post(
            &format!("/api/calls/{}/answer", call_id),
            serde_json::json!({
                "participantId": resident.to_string(),
                "participantType": "resident",
            }),
        )
        .await
    }

    pub async fn decline(&self, call_id: &str, resident: &PartyId) -> (StatusCode, Value) {
        self.post(
            &format!("/api/calls/{}/decline", call_id),
            serde_json::json!({
                "participantId": resident.to_string(),
                "participantType": "resident",
            }),
        )
        .await
    }

    pub async fn end(&self, call_id: &str, actor: &PartyId, kind: &str) -> (StatusCode, Value) {
        self.post(
            &format!("/api/calls/{}/end", call_id),
            serde_json::json!({"actorId": actor.to_string(), "actorType": kind}),
        )
        .await
    }
}

pub fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Status of the participant record belonging to `party`
pub fn participant_status(body: &Value, party: &PartyId) -> String {
    body["participants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["participant_id"] == party.to_string())
        .map(|p| p["status"].as_str().unwrap().to_string())
        .unwrap_or_default()
}
