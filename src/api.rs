//! REST endpoints for submitting and operating blasts.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::blast::{Channel, Dispatcher};
use crate::config::AntiSpamOverrides;
use crate::contacts::{Contact, ContactNormalizer, Row};
use crate::error::{Error, JobError};
use crate::members::MemberRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub members: Arc<MemberRegistry>,
    pub normalizer: ContactNormalizer,
}

/// Build the Axum router with the blast REST routes.
pub fn blast_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/blast/parse-contacts", post(parse_contacts))
        .route("/api/blast/create", post(create_blast))
        .route("/api/blast/jobs", get(list_jobs))
        .route("/api/blast/job/{id}", get(get_job))
        .route("/api/blast/job/{id}/resume", post(resume_job))
        .route("/api/blast/job/{id}/cancel", post(cancel_job))
        .route("/api/blast/pause", post(pause_all))
        .route("/api/blast/resume", post(resume_all))
        .route("/api/blast/stats", get(stats))
        .route("/api/blast/members", get(list_members))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error body returned by every failing endpoint.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Job(e) => e.into(),
            Error::Submit(e) => Self {
                status: StatusCode::BAD_REQUEST,
                message: e.to_string(),
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: other.to_string(),
            },
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::NotFound { .. } => StatusCode::NOT_FOUND,
            JobError::InvalidTransition { .. } | JobError::AlreadyQueued { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

/// Malformed or mistyped request bodies are input errors like any other.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Blast API error");
        }
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "blast-dispatch"
    }))
}

// ── Contacts ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ParseContactsRequest {
    rows: Vec<Row>,
}

async fn parse_contacts(
    State(state): State<AppState>,
    body: Result<Json<ParseContactsRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let contacts = state.normalizer.normalize(&body.rows);
    let dropped = body.rows.len() - contacts.len();
    Ok(Json(json!({
        "success": true,
        "total": contacts.len(),
        "dropped": dropped,
        "contacts": contacts,
    })))
}

// ── Jobs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateBlastRequest {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    message: String,
    channel: String,
    #[serde(default)]
    anti_spam_config: Option<AntiSpamOverrides>,
}

async fn create_blast(
    State(state): State<AppState>,
    body: Result<Json<CreateBlastRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let channel: Channel = body.channel.parse().map_err(Error::from)?;
    let total = body.contacts.len();
    let job_id = state
        .dispatcher
        .create_job(body.contacts, &body.message, channel, body.anti_spam_config)
        .await?;

    Ok(Json(json!({
        "success": true,
        "job_id": job_id,
        "message": format!("Blast job created for {total} contacts"),
    })))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.dispatcher.list_jobs().await;
    Json(json!({ "success": true, "jobs": jobs }))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let job = state.dispatcher.get_job(&id).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}

async fn resume_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.dispatcher.resume_job(&id).await?;
    Ok(Json(json!({ "success": true, "message": "Blast job re-queued" })))
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let job = state.dispatcher.cancel_job(&id).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}

// ── Global control ──────────────────────────────────────────────────────

async fn pause_all(State(state): State<AppState>) -> impl IntoResponse {
    state.dispatcher.pause_all();
    Json(json!({ "success": true, "message": "Blasts paused" }))
}

async fn resume_all(State(state): State<AppState>) -> impl IntoResponse {
    state.dispatcher.resume_all();
    Json(json!({ "success": true, "message": "Blasts resumed" }))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.dispatcher.stats().await;
    Json(json!({ "success": true, "stats": stats }))
}

// ── Members ─────────────────────────────────────────────────────────────

async fn list_members(State(state): State<AppState>) -> impl IntoResponse {
    let members = state.members.list().await;
    info!(count = members.len(), "Listing members");
    Json(json!({ "success": true, "members": members }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::blast::{BudgetHandle, DispatcherDeps, JobStore};
    use crate::channels::{ConsoleSink, SinkRegistry};
    use crate::clock::SystemClock;
    use crate::config::DispatcherConfig;

    fn app() -> Router {
        let members = Arc::new(MemberRegistry::new());
        let clock = Arc::new(SystemClock);
        let dispatcher = Dispatcher::start(
            &DispatcherConfig::default(),
            DispatcherDeps {
                store: Arc::new(JobStore::new()),
                budget: BudgetHandle::spawn(chrono::Local::now().naive_local()),
                sinks: SinkRegistry::new().with(Channel::Sms, Arc::new(ConsoleSink::new("sms"))),
                members: members.clone(),
                clock,
            },
        );
        blast_routes(AppState {
            dispatcher,
            members,
            normalizer: ContactNormalizer::default(),
        })
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_ok() {
        let (status, body) = call(app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn parse_contacts_normalizes_rows() {
        let rows = json!({ "rows": [
            { "Full Name": "Ada", "Mobile": "08012345678" },
            { "Notes": "no name or phone" }
        ]});
        let (status, body) = call(app(), "POST", "/api/blast/parse-contacts", Some(rows)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["dropped"], 1);
        assert_eq!(body["contacts"][0]["phone"], "2348012345678");
    }

    #[tokio::test]
    async fn create_rejects_invalid_channel() {
        let req = json!({
            "contacts": [{ "name": "Ada", "phone": "2348012345678" }],
            "message": "hello",
            "channel": "telegram"
        });
        let (status, body) = call(app(), "POST", "/api/blast/create", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("telegram"));
    }

    #[tokio::test]
    async fn create_rejects_empty_contacts() {
        let req = json!({ "contacts": [], "message": "hello", "channel": "sms" });
        let (status, body) = call(app(), "POST", "/api/blast/create", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No contacts provided");
    }

    #[tokio::test]
    async fn create_rejects_unconfigured_channel() {
        let req = json!({
            "contacts": [{ "name": "Ada", "phone": "2348012345678" }],
            "message": "hello",
            "channel": "whatsapp"
        });
        let (status, _) = call(app(), "POST", "/api/blast/create", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_with_undecodable_body_is_400() {
        let missing_channel = json!({
            "contacts": [{ "name": "Ada", "phone": "2348012345678" }],
            "message": "hi"
        });
        let (status, body) =
            call(app(), "POST", "/api/blast/create", Some(missing_channel)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("channel"));

        let contact_without_phone = json!({
            "contacts": [{ "name": "Ada" }],
            "message": "hi",
            "channel": "sms"
        });
        let (status, body) =
            call(app(), "POST", "/api/blast/create", Some(contact_without_phone)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("phone"));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/blast/parse-contacts")
            .header("content-type", "application/json")
            .body(Body::from("{\"rows\": ["))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn parse_contacts_requires_json_body() {
        let (status, body) = call(app(), "POST", "/api/blast/parse-contacts", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = app();
        let (status, body) = call(app.clone(), "GET", "/api/blast/job/blast_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(app, "POST", "/api/blast/job/blast_missing/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pause_and_resume_reflected_in_stats() {
        let app = app();
        let (status, _) = call(app.clone(), "POST", "/api/blast/pause", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(app.clone(), "GET", "/api/blast/stats", None).await;
        assert_eq!(body["stats"]["is_paused"], true);

        call(app.clone(), "POST", "/api/blast/resume", None).await;
        let (_, body) = call(app, "GET", "/api/blast/stats", None).await;
        assert_eq!(body["stats"]["is_paused"], false);
        assert_eq!(body["stats"]["sent_today"], 0);
    }

    #[tokio::test]
    async fn cancel_queued_job_then_conflict() {
        let app = app();
        call(app.clone(), "POST", "/api/blast/pause", None).await;

        let req = json!({
            "contacts": [
                { "name": "Ada", "phone": "2348012345678" },
                { "name": "Bola", "phone": "2348012345679" }
            ],
            "message": "Hi {{name}}",
            "channel": "sms"
        });
        let (status, body) = call(app.clone(), "POST", "/api/blast/create", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["job_id"].as_str().unwrap().to_string();

        let cancel = format!("/api/blast/job/{id}/cancel");
        let (status, body) = call(app.clone(), "POST", &cancel, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        // Once the run loop observes the flag the job is terminal.
        let failed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let uri = format!("/api/blast/job/{id}");
                let (_, body) = call(app.clone(), "GET", &uri, None).await;
                if body["job"]["status"] == "failed" {
                    break body;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(failed["job"]["progress"], 0);

        let (status, _) = call(app.clone(), "POST", &cancel, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(app, "POST", &format!("/api/blast/job/{id}/resume"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
