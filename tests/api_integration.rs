//! Integration tests for the blast REST API.
//!
//! Each test spins up an Axum server on a random port with a manual clock and
//! a recording transport, then drives it over HTTP with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use blast_dispatch::api::{AppState, blast_routes};
use blast_dispatch::blast::{BudgetHandle, Channel, Dispatcher, DispatcherDeps, JobStore};
use blast_dispatch::channels::{MessageSink, SinkRegistry};
use blast_dispatch::clock::{Clock, ManualClock};
use blast_dispatch::config::{AntiSpamConfig, DispatcherConfig};
use blast_dispatch::contacts::ContactNormalizer;
use blast_dispatch::error::SendError;
use blast_dispatch::members::MemberRegistry;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport that records every message it is asked to deliver.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, phone: &str, text: &str) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), text.to_string()));
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    sink: Arc<RecordingSink>,
    budget: BudgetHandle,
    clock: Arc<ManualClock>,
}

impl TestServer {
    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn wait_for_status(&self, job_id: &str, status: &str) -> Value {
        loop {
            let (_, body) = self.get(&format!("/api/blast/job/{job_id}")).await;
            if body["job"]["status"] == status {
                return body["job"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sink.sent.lock().unwrap().clone()
    }
}

/// Monday 2024-03-04 10:00.
fn monday_morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

/// Start an Axum server on a random port with zero pacing delays.
async fn start_server() -> TestServer {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let budget = BudgetHandle::spawn(clock.now());
    let sink = Arc::new(RecordingSink::default());
    let members = Arc::new(MemberRegistry::new());

    let config = DispatcherConfig {
        send_timeout: Duration::from_secs(1),
        anti_spam: AntiSpamConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            batch_delay_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let dispatcher = Dispatcher::start(
        &config,
        DispatcherDeps {
            store: Arc::new(JobStore::new()),
            budget: budget.clone(),
            sinks: SinkRegistry::new().with(Channel::Sms, sink.clone()),
            members: members.clone(),
            clock: clock.clone(),
        },
    );
    let app = blast_routes(AppState {
        dispatcher,
        members,
        normalizer: ContactNormalizer::default(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        sink,
        budget,
        clock,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn parsed_contacts_blast_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, parsed) = server
            .post(
                "/api/blast/parse-contacts",
                json!({ "rows": [
                    { "Full Name": "Ada", "Mobile": "08012345678", "Email": "ada@example.com" },
                    { "Name": "Bola", "Phone Number": "8098765432", "Group": "Choir" },
                    { "Name": "Nobody" }
                ]}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(parsed["total"], 2);

        let (status, created) = server
            .post(
                "/api/blast/create",
                json!({
                    "contacts": parsed["contacts"],
                    "message": "Hi {{name}}, reach us at {{email}}",
                    "channel": "sms"
                }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(created["success"], true);
        let job_id = created["job_id"].as_str().unwrap().to_string();

        let job = server.wait_for_status(&job_id, "completed").await;
        assert_eq!(job["progress"], 2);
        assert_eq!(job["total"], 2);
        assert_eq!(job["results"][0]["status"], "success");
        assert_eq!(job["results"][1]["contact"]["phone"], "2348098765432");

        let sent = server.sent();
        assert_eq!(
            sent,
            [
                (
                    "2348012345678".to_string(),
                    "Hi Ada, reach us at ada@example.com".to_string()
                ),
                ("2348098765432".to_string(), "Hi Bola, reach us at ".to_string()),
            ]
        );

        let (_, stats) = server.get("/api/blast/stats").await;
        assert_eq!(stats["stats"]["sent_today"], 2);
        assert_eq!(stats["stats"]["sent_this_hour"], 2);

        // Delivered contacts become members once the job completes.
        let members = loop {
            let (_, body) = server.get("/api/blast/members").await;
            if body["members"].as_array().unwrap().len() == 2 {
                break body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(members["members"][0]["name"], "Ada");
        assert_eq!(members["members"][0]["join_date"], "2024-03-04");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn create_validation_errors_are_400() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = server
            .post(
                "/api/blast/create",
                json!({ "contacts": [], "message": "hi", "channel": "sms" }),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let contact = json!([{ "name": "Ada", "phone": "2348012345678" }]);
        let (status, _) = server
            .post(
                "/api/blast/create",
                json!({ "contacts": contact, "message": "", "channel": "sms" }),
            )
            .await;
        assert_eq!(status, 400);

        let (status, body) = server
            .post(
                "/api/blast/create",
                json!({ "contacts": contact, "message": "hi", "channel": "fax" }),
            )
            .await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("fax"));

        let (status, _) = server
            .post(
                "/api/blast/create",
                json!({
                    "contacts": contact,
                    "message": "hi",
                    "channel": "sms",
                    "anti_spam_config": { "min_delay_ms": 9000, "max_delay_ms": 1000 }
                }),
            )
            .await;
        assert_eq!(status, 400);

        // Bodies that do not decode are input errors too.
        let (status, body) = server
            .post("/api/blast/create", json!({ "contacts": contact, "message": "hi" }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (status, body) = server
            .post(
                "/api/blast/create",
                json!({ "contacts": [{ "name": "Ada" }], "message": "hi", "channel": "sms" }),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (_, jobs) = server.get("/api/blast/jobs").await;
        assert!(jobs["jobs"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn daily_limit_pause_then_resume_next_day() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let contacts: Vec<Value> = (1..=3)
            .map(|i| json!({ "name": format!("C{i}"), "phone": format!("234801000000{i}") }))
            .collect();
        let (_, created) = server
            .post(
                "/api/blast/create",
                json!({
                    "contacts": contacts,
                    "message": "hello",
                    "channel": "sms",
                    "anti_spam_config": { "max_messages_per_day": 2 }
                }),
            )
            .await;
        let job_id = created["job_id"].as_str().unwrap().to_string();

        let job = server.wait_for_status(&job_id, "paused").await;
        assert_eq!(job["pause_reason"], "daily_limit");
        assert_eq!(job["progress"], 2);

        // Still the same day: resuming just pauses again.
        let (status, _) = server
            .post(&format!("/api/blast/job/{job_id}/resume"), json!({}))
            .await;
        assert_eq!(status, 200);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = server.wait_for_status(&job_id, "paused").await;
        assert_eq!(job["progress"], 2);

        server.clock.advance(TimeDelta::days(1));
        server.budget.tick(server.clock.now()).await.unwrap();

        let (status, _) = server
            .post(&format!("/api/blast/job/{job_id}/resume"), json!({}))
            .await;
        assert_eq!(status, 200);

        let job = server.wait_for_status(&job_id, "completed").await;
        assert_eq!(job["progress"], 3);
        assert_eq!(server.sent().len(), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn global_pause_and_resume() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, _) = server.post("/api/blast/pause", json!({})).await;
        assert_eq!(status, 200);

        let (_, created) = server
            .post(
                "/api/blast/create",
                json!({
                    "contacts": [{ "name": "Ada", "phone": "2348012345678" }],
                    "message": "hello",
                    "channel": "sms"
                }),
            )
            .await;
        let job_id = created["job_id"].as_str().unwrap().to_string();

        let job = server.wait_for_status(&job_id, "paused").await;
        assert_eq!(job["pause_reason"], "operator");
        let (_, stats) = server.get("/api/blast/stats").await;
        assert_eq!(stats["stats"]["is_paused"], true);
        assert_eq!(stats["stats"]["current_job_id"], job_id.as_str());

        // Operator pauses are lifted globally, not per job.
        let (status, _) = server
            .post(&format!("/api/blast/job/{job_id}/resume"), json!({}))
            .await;
        assert_eq!(status, 409);

        server.post("/api/blast/resume", json!({})).await;
        server.wait_for_status(&job_id, "completed").await;
        assert_eq!(server.sent().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_job_is_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = server.get("/api/blast/job/blast_nope").await;
        assert_eq!(status, 404);
        assert_eq!(body["success"], false);

        let (status, _) = server
            .post("/api/blast/job/blast_nope/resume", json!({}))
            .await;
        assert_eq!(status, 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn jobs_listed_newest_first() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ids = Vec::new();
        for message in ["first", "second"] {
            let (_, created) = server
                .post(
                    "/api/blast/create",
                    json!({
                        "contacts": [{ "name": "Ada", "phone": "2348012345678" }],
                        "message": message,
                        "channel": "sms"
                    }),
                )
                .await;
            ids.push(created["job_id"].as_str().unwrap().to_string());
        }

        let (status, body) = server.get("/api/blast/jobs").await;
        assert_eq!(status, 200);
        let listed: Vec<&str> = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|job| job["id"].as_str().unwrap())
            .collect();
        assert_eq!(listed, [ids[1].as_str(), ids[0].as_str()]);
    })
    .await
    .expect("test timed out");
}
