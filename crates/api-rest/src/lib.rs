//! # API REST
//!
//! REST API for the Dinkes merge service.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, API-key checks)
//! - the registry of live merge sessions
//!
//! Uses `api-shared` for wire types and `dinkes-core` for everything else.

#![warn(rust_2018_idioms)]

mod error;
mod handlers;

pub use error::ApiError;

use api_shared::API_KEY_HEADER;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dinkes_core::{MergeService, MergeSession, SessionPhase, ShardableUuid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_datasets,
        handlers::search,
        handlers::create_session,
        handlers::get_session,
        handlers::session_search,
        handlers::session_confirm,
        handlers::session_retry,
        handlers::delete_session,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::ErrorRes,
        api_shared::DatasetRes,
        api_shared::ListDatasetsRes,
        api_shared::SearchReq,
        api_shared::RecordDto,
        api_shared::SearchHitDto,
        api_shared::LookupFailureDto,
        api_shared::FieldConflictDto,
        api_shared::MergedRecordDto,
        api_shared::ConfirmationDto,
        api_shared::CreateSessionRes,
        api_shared::SessionRes,
    ))
)]
pub struct ApiDoc;

type SharedSession = Arc<tokio::sync::Mutex<MergeSession>>;

/// Most sessions the registry holds at once.
pub const MAX_SESSIONS: usize = 1024;

/// Sessions untouched for this long are dropped.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    session: SharedSession,
    last_touched: Instant,
}

/// Live merge sessions keyed by id.
///
/// The map lock is only held to look a session up; each session has its own async lock so a
/// slow reconciliation in one session never blocks another.
///
/// Idle sessions expire after the TTL. When the registry is full, creating a session evicts
/// the least recently used one.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<ShardableUuid, SessionEntry>>>,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_limits(MAX_SESSIONS, SESSION_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_sessions` is raised to at least one.
    pub fn with_limits(max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_sessions: max_sessions.max(1),
            idle_ttl,
        }
    }

    /// Starts an idle session and returns its id.
    pub fn create(&self, service: &MergeService) -> Result<(ShardableUuid, SessionPhase), ApiError> {
        let session = service.session();
        let phase = session.phase();
        let mut sessions = self.lock()?;
        let now = Instant::now();

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_touched) < self.idle_ttl);
        if sessions.len() < before {
            tracing::info!("expired {} idle merge sessions", before - sessions.len());
        }

        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::warn!("session registry full, evicted merge session {}", oldest);
        }

        let mut id = ShardableUuid::new();
        while sessions.contains_key(&id) {
            id = ShardableUuid::new();
        }
        sessions.insert(
            id,
            SessionEntry {
                session: Arc::new(tokio::sync::Mutex::new(session)),
                last_touched: now,
            },
        );
        Ok((id, phase))
    }

    /// Looks a session up and marks it as used.
    pub fn get(&self, id: &ShardableUuid) -> Result<SharedSession, ApiError> {
        let mut sessions = self.lock()?;
        let now = Instant::now();
        let expired = match sessions.get_mut(id) {
            Some(entry) if now.duration_since(entry.last_touched) < self.idle_ttl => {
                entry.last_touched = now;
                return Ok(entry.session.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.remove(id);
            tracing::info!("merge session {} expired", id);
        }
        Err(ApiError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &ShardableUuid) -> Result<(), ApiError> {
        self.lock()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ShardableUuid, SessionEntry>>, ApiError> {
        self.sessions
            .lock()
            .map_err(|_| ApiError::Internal("session registry lock poisoned".into()))
    }
}

/// Application state for the REST API server.
///
/// Shared by every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    service: MergeService,
    sessions: SessionRegistry,
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// `api_key` of `None` leaves every route open.
    pub fn new(service: MergeService, api_key: Option<String>) -> Self {
        Self {
            service,
            sessions: SessionRegistry::new(),
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .map(Arc::from),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

/// Builds the REST router.
///
/// `/health` and the OpenAPI docs are always public. Every other route requires the
/// `x-api-key` header when an API key is configured.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/datasets", get(handlers::list_datasets))
        .route("/search", post(handlers::search))
        .route("/merge/sessions", post(handlers::create_session))
        .route(
            "/merge/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/merge/sessions/:id/search", post(handlers::session_search))
        .route("/merge/sessions/:id/confirm", post(handlers::session_confirm))
        .route("/merge/sessions/:id/retry", post(handlers::session_retry))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(err) = api_shared::validate_api_key(provided, expected) {
            tracing::warn!("rejected {} {}: {}", req.method(), req.uri().path(), err);
            return ApiError::from(err).into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use dinkes_core::{DatasetCatalogue, InMemoryIdentityIndex, MemoryMergeSink, Reconciler};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CATALOGUE: &str = r#"
datasets:
  - id: seksi-p2p
    name: Seksi Pencegahan dan Penanggulangan Penyakit
    records:
      - id: rec-001
        nik: "3171234567890001"
        name: Budi Santoso
        address: Jl. Merdeka No. 1, Jakarta
        dob: "1985-08-17"
        phone: "081234567890"
        lastVisit: "2024-05-20"
  - id: seksi-sdk
    name: Seksi Sumber Daya Kesehatan
    records:
      - id: rec-003
        nik: "3273123456789001"
        name: Agus Wijaya
        address: Jl. Asia Afrika No. 5, Bandung
        lastVisit: "2024-04-15"
  - id: seksi-kesmas
    name: Seksi Kesehatan Masyarakat
    records:
      - id: rec-004
        nik: "3171234567890001"
        name: Budi S.
        address: Jl. Merdeka No. 1, Jakarta Pusat
        dob: "1985-08-17"
        lastVisit: "2023-12-01"
"#;

    struct Harness {
        app: Router,
        sink: Arc<MemoryMergeSink>,
        state: AppState,
    }

    fn harness(api_key: Option<&str>) -> Harness {
        let catalogue = DatasetCatalogue::parse(CATALOGUE).expect("catalogue should parse");
        let index = InMemoryIdentityIndex::from_catalogue(catalogue);
        let sink = Arc::new(MemoryMergeSink::new());
        let service = MergeService::new(Arc::new(index), Reconciler::rule_based(), sink.clone());
        let state = AppState::new(service, api_key.map(str::to_string));
        Harness {
            app: router(state.clone()),
            sink,
            state,
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        api_key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = send(app, Method::POST, "/merge/sessions", None, None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["phase"], "idle");
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = harness(Some("secret"));
        let (status, body) = send(&h.app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn protected_routes_require_api_key() {
        let h = harness(Some("secret"));

        let (status, body) = send(&h.app, Method::GET, "/datasets", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing API key");

        let (status, _) = send(&h.app, Method::GET, "/datasets", None, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&h.app, Method::GET, "/datasets", None, Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["datasets"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn datasets_keep_catalogue_order() {
        let h = harness(None);
        let (_, body) = send(&h.app, Method::GET, "/datasets", None, None).await;
        let ids: Vec<_> = body["datasets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["seksi-p2p", "seksi-sdk", "seksi-kesmas"]);
    }

    #[tokio::test]
    async fn stateless_search_returns_hits_only() {
        let h = harness(None);
        let (status, body) = send(
            &h.app,
            Method::POST,
            "/search",
            Some(json!({
                "nik": "3171234567890001",
                "datasetIds": ["seksi-p2p", "seksi-sdk", "seksi-kesmas"]
            })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let hits = body.as_array().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["datasetName"], "Seksi Kesehatan Masyarakat");
        assert_eq!(hits[0]["record"]["lastVisit"], "2023-12-01");
        assert_eq!(hits[1]["record"]["name"], "Budi Santoso");
    }

    #[tokio::test]
    async fn search_rejects_bad_requests() {
        let h = harness(None);

        let (status, _) = send(
            &h.app,
            Method::POST,
            "/search",
            Some(json!({ "nik": "  ", "datasetIds": ["seksi-p2p"] })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.app,
            Method::POST,
            "/search",
            Some(json!({ "nik": "3171234567890001", "datasetIds": [] })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &h.app,
            Method::POST,
            "/search",
            Some(json!({ "nik": "3171234567890001", "datasetIds": ["seksi-gizi"] })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("seksi-gizi"));
    }

    #[tokio::test]
    async fn session_proposes_then_confirms() {
        let h = harness(None);
        let id = new_session(&h.app).await;

        let (status, body) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/search"),
            Some(json!({
                "nik": "3171234567890001",
                "datasetIds": ["seksi-p2p", "seksi-kesmas"]
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "proposed");
        assert_eq!(
            body["trail"],
            json!(["searching", "multipleMatchesMerging", "proposed"])
        );
        assert_eq!(body["candidates"].as_array().unwrap().len(), 2);
        assert_eq!(body["proposal"]["method"], "fallback");
        assert_eq!(body["proposal"]["address"], "Jl. Merdeka No. 1, Jakarta");
        assert!(h.sink.stored().unwrap().is_empty());

        let (status, body) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/confirm"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "confirmed");
        assert_eq!(body["confirmation"]["record"]["nik"], "3171234567890001");
        assert_eq!(h.sink.stored().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_match_needs_no_merge() {
        let h = harness(None);
        let id = new_session(&h.app).await;

        let (_, body) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/search"),
            Some(json!({ "nik": "3273123456789001", "datasetIds": ["seksi-sdk"] })),
            None,
        )
        .await;
        assert_eq!(body["phase"], "proposed");
        assert_eq!(body["proposal"]["method"], "singleRecord");
        assert_eq!(body["proposal"]["confidenceScore"], 1.0);
        assert_eq!(body["proposal"]["id"], "rec-003");
    }

    #[tokio::test]
    async fn unknown_nik_is_not_found() {
        let h = harness(None);
        let id = new_session(&h.app).await;

        let (status, body) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/search"),
            Some(json!({ "nik": "9999999999999999", "datasetIds": ["seksi-p2p"] })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "notFound");
        assert!(body["proposal"].is_null());

        let (status, _) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/confirm"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn retry_outside_failed_is_conflict() {
        let h = harness(None);
        let id = new_session(&h.app).await;
        let (status, _) = send(
            &h.app,
            Method::POST,
            &format!("/merge/sessions/{id}/retry"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_and_malformed_session_ids() {
        let h = harness(None);

        let (status, _) = send(&h.app, Method::GET, "/merge/sessions/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = ShardableUuid::new().to_string();
        let (status, _) = send(&h.app, Method::GET, &format!("/merge/sessions/{missing}"), None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let h = harness(None);
        let id = new_session(&h.app).await;
        assert_eq!(h.state.sessions().len(), 1);

        let (status, _) = send(&h.app, Method::DELETE, &format!("/merge/sessions/{id}"), None, None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(h.state.sessions().is_empty());

        let (status, _) = send(&h.app, Method::GET, &format!("/merge/sessions/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_registry_evicts_least_recently_used() {
        let h = harness(None);
        let registry = SessionRegistry::with_limits(2, SESSION_IDLE_TTL);
        let pause = || std::thread::sleep(Duration::from_millis(2));

        let (first, _) = registry.create(&h.state.service).unwrap();
        pause();
        let (second, _) = registry.create(&h.state.service).unwrap();
        pause();
        registry.get(&first).unwrap();
        pause();
        let (third, _) = registry.create(&h.state.service).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&first).is_ok());
        assert!(registry.get(&third).is_ok());
        assert!(matches!(
            registry.get(&second),
            Err(ApiError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn registry_never_grows_past_its_cap() {
        let h = harness(None);
        let registry = SessionRegistry::with_limits(3, SESSION_IDLE_TTL);
        for _ in 0..10 {
            registry.create(&h.state.service).unwrap();
        }
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let h = harness(None);
        let registry = SessionRegistry::with_limits(10, Duration::from_millis(5));

        let (stale, _) = registry.create(&h.state.service).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            registry.get(&stale),
            Err(ApiError::SessionNotFound(_))
        ));
        assert!(registry.is_empty());

        registry.create(&h.state.service).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let (fresh, _) = registry.create(&h.state.service).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&fresh).is_ok());
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let h = harness(Some("secret"));
        let (status, body) = send(&h.app, Method::GET, "/api-docs/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/merge/sessions/{id}/search"].is_object());
    }
}
