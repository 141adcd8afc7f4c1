use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{sse::{Event as SseEvent, KeepAlive, Sse}, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower::ServiceBuilder;

use jobforge_core::{MatchedJob, Posting, Profile, ProfileId, Run, RunId, StageProgress};
use jobforge_pipeline::{JobSearchContext, ProfilingContext, WorkflowContext, WorkflowRunner};
use jobforge_providers::stub::StubProviderFactory;
use jobforge_queue::{InMemoryTaskStore, Task, TaskKind, TaskStore, Worker, WorkerConfig};
#[cfg(feature = "redis")]
use jobforge_status::{FanoutPublisher, RedisStatusPublisher};
use jobforge_status::{InMemoryStatusBus, StatusPublisher, StatusUpdate, HEARTBEAT_INTERVAL};
use jobforge_store::{
    MatchedJobStore, PostgresStore, PostingStore, ProfileStore, RunStore, StoreError, StoreSet,
};

/// Shared handles behind every route.
struct AppState {
    stores: StoreSet,
    queue: Arc<InMemoryTaskStore>,
    bus: Arc<InMemoryStatusBus>,
}

/// In-memory stores by default; Postgres when `DATABASE_URL` is set.
async fn build_stores() -> StoreSet {
    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPool::connect(&database_url)
                .await
                .expect("failed to connect to Postgres");

            let store = PostgresStore::new(pool);
            store
                .ensure_schema()
                .await
                .expect("failed to apply the Postgres schema");

            StoreSet::postgres(store)
        }
        Err(_) => StoreSet::in_memory(),
    }
}

/// The in-process bus always receives updates; with the `redis` feature and
/// `REDIS_URL` set they also go out over Redis, and updates published by
/// other processes are bridged back into the bus.
#[cfg(feature = "redis")]
fn build_publisher(bus: Arc<InMemoryStatusBus>) -> Arc<dyn StatusPublisher> {
    match std::env::var("REDIS_URL") {
        Ok(redis_url) => match RedisStatusPublisher::new(&redis_url) {
            Ok(redis) => {
                redis.bridge_into(bus.clone());
                let targets: Vec<Arc<dyn StatusPublisher>> = vec![bus, Arc::new(redis)];
                Arc::new(FanoutPublisher::new(targets))
            }
            Err(e) => {
                tracing::warn!("REDIS_URL set but unusable ({e}), status stays in-process");
                bus
            }
        },
        Err(_) => bus,
    }
}

#[cfg(not(feature = "redis"))]
fn build_publisher(bus: Arc<InMemoryStatusBus>) -> Arc<dyn StatusPublisher> {
    if std::env::var("REDIS_URL").is_ok() {
        tracing::warn!("REDIS_URL set but redis feature not enabled, status stays in-process");
    }
    bus
}

pub async fn build_app() -> Router {
    let stores = build_stores().await;

    let bus = Arc::new(InMemoryStatusBus::new());
    let publisher = build_publisher(bus.clone());

    let runner = Arc::new(WorkflowRunner::new(
        stores.clone(),
        Arc::new(StubProviderFactory::with_defaults()),
        publisher,
    ));

    let queue = Arc::new(InMemoryTaskStore::new());
    let mut worker = Worker::new(queue.clone());
    worker.register_handler("*", runner);
    // Detached: dropping the handle leaves the loop running for the life of
    // the process.
    let _ = worker.spawn(WorkerConfig::default().with_name("pipeline-worker"));

    let state = Arc::new(AppState { stores, queue, bus });

    Router::new()
        .route("/health", get(health))
        .route("/runs", post(submit_run))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/matches", get(get_run_matches))
        .route("/runs/:id/stream", get(stream_run))
        .route("/profiles", post(submit_profile).get(lookup_profile))
        .route("/profiles/:id", get(get_profile))
        .layer(Extension(state))
        .layer(ServiceBuilder::new())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct SubmitRunRequest {
    query: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    profile_id: Option<ProfileId>,
    #[serde(default)]
    num_results: Option<u32>,
    #[serde(default)]
    max_screening: Option<u32>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    google_domain: Option<String>,
    #[serde(default)]
    hl: Option<String>,
    #[serde(default)]
    gl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitProfileRequest {
    name: String,
    email: String,
    raw_profile_text: String,
    #[serde(default)]
    reference_links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileLookup {
    name: String,
    email: String,
}

async fn submit_run(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SubmitRunRequest>,
) -> axum::response::Response {
    if body.query.trim().is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "query must not be empty",
        );
    }

    let mut ctx = JobSearchContext::new(body.query, body.location);
    ctx.profile_id = body.profile_id;
    if let Some(num_results) = body.num_results {
        ctx.num_results = num_results;
    }
    if let Some(max_screening) = body.max_screening {
        ctx.max_screening = max_screening;
    }
    if let Some(max_retries) = body.max_retries {
        ctx.max_retries = max_retries;
    }
    if let Some(google_domain) = body.google_domain {
        ctx.google_domain = google_domain;
    }
    if let Some(hl) = body.hl {
        ctx.hl = hl;
    }
    if let Some(gl) = body.gl {
        ctx.gl = gl;
    }

    enqueue_workflow(&state, TaskKind::JobSearch, ctx).await
}

async fn submit_profile(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SubmitProfileRequest>,
) -> axum::response::Response {
    // Content checks (name/email/text) are the validation node's job; a bad
    // submission is accepted here and fails its run.
    let mut ctx = ProfilingContext::new(body.name, body.email, body.raw_profile_text);
    ctx.reference_links = body.reference_links;

    enqueue_workflow(&state, TaskKind::Profiling, ctx).await
}

/// Create the pending run row, then enqueue the task that drives it.
async fn enqueue_workflow<C>(
    state: &AppState,
    kind: TaskKind,
    mut ctx: C,
) -> axum::response::Response
where
    C: WorkflowContext + Serialize,
{
    let run_id = match state.stores.runs.create(Run::new(ctx.profile_id())).await {
        Ok(run_id) => run_id,
        Err(e) => return store_error_to_response(e),
    };
    ctx.set_run_id(run_id);

    let payload = match serde_json::to_value(&ctx) {
        Ok(payload) => payload,
        Err(e) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialize_error",
                e.to_string(),
            )
        }
    };

    if let Err(e) = state.queue.enqueue(Task::new(kind, payload).for_run(run_id)) {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", e.to_string());
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id })),
    )
        .into_response()
}

async fn get_run(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let run_id: RunId = match id.parse() {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid run id"),
    };

    match state.stores.runs.get(run_id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(run_to_json(&run))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "run not found"),
        Err(e) => store_error_to_response(e),
    }
}

async fn get_run_matches(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let run_id: RunId = match id.parse() {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid run id"),
    };

    // Unknown runs are 404, not an empty list.
    match state.stores.runs.get(run_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "not_found", "run not found"),
        Err(e) => return store_error_to_response(e),
    }

    let jobs = match state.stores.matches.list_for_run(run_id).await {
        Ok(jobs) => jobs,
        Err(e) => return store_error_to_response(e),
    };

    let mut items = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let posting = match state.stores.postings.get(job.posting_id).await {
            Ok(posting) => posting,
            Err(e) => return store_error_to_response(e),
        };
        items.push(matched_job_to_json(job, posting.as_ref()));
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "run_id": run_id,
            "count": items.len(),
            "matches": items,
        })),
    )
        .into_response()
}

async fn stream_run(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let run_id: RunId = match id.parse() {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid run id"),
    };

    let stream = run_updates(state.bus.subscribe(), run_id).map(|update| {
        let data = serde_json::to_string(&update).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(SseEvent::default().event("status").data(data))
    });

    // Fires only when no real update went out in the window. A named event
    // rather than a bare comment, so EventSource clients observe it.
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(HEARTBEAT_INTERVAL)
                .event(SseEvent::default().event("heartbeat").data("{}")),
        )
        .into_response()
}

/// Updates for one run, in emission order. Other runs' updates and lagged
/// gaps are dropped; the stored run row stays the source of truth.
fn run_updates(
    rx: broadcast::Receiver<StatusUpdate>,
    run_id: RunId,
) -> impl tokio_stream::Stream<Item = StatusUpdate> {
    BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(update) if update.run_id == run_id => Some(update),
        _ => None,
    })
}

async fn get_profile(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let profile_id: ProfileId = match id.parse() {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid profile id"),
    };

    match state.stores.profiles.get(profile_id).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile_to_json(&profile))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "profile not found"),
        Err(e) => store_error_to_response(e),
    }
}

/// Profiles are created asynchronously, so the submitter learns the stored id
/// by looking the profile up under the same name + email it submitted.
async fn lookup_profile(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ProfileLookup>,
) -> axum::response::Response {
    match state
        .stores
        .profiles
        .find_by_contact(&params.name, &params.email)
        .await
    {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile_to_json(&profile))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "no profile for that contact"),
        Err(e) => store_error_to_response(e),
    }
}

fn run_to_json(run: &Run) -> serde_json::Value {
    serde_json::json!({
        "id": run.id,
        "profile_id": run.profile_id,
        "status": run.status,
        "error_message": run.error_message,
        "total_matched_jobs": run.total_matched_jobs,
        "research_completed_count": run.research_completed_count,
        "research_failed_count": run.research_failed_count,
        "fabrication_completed_count": run.fabrication_completed_count,
        "fabrication_failed_count": run.fabrication_failed_count,
        "delivery_triggered": run.delivery_triggered,
        "delivery_triggered_at": run.delivery_triggered_at,
        "completed_at": run.completed_at,
        "created_at": run.created_at,
        "updated_at": run.updated_at,
    })
}

fn matched_job_to_json(job: &MatchedJob, posting: Option<&Posting>) -> serde_json::Value {
    serde_json::json!({
        "id": job.id,
        "posting": posting.map(|p| serde_json::json!({
            "id": p.id,
            "title": p.title,
            "company": p.company,
            "location": p.location,
            "url": p.url,
        })),
        "reason": job.reason,
        "research": stage_to_json(&job.research),
        "fabrication": stage_to_json(&job.fabrication),
        "created_at": job.created_at,
    })
}

fn stage_to_json(stage: &StageProgress) -> serde_json::Value {
    serde_json::json!({
        "status": stage.status,
        "attempts": stage.attempts,
        "error": stage.error,
        "completed_at": stage.completed_at,
    })
}

fn profile_to_json(profile: &Profile) -> serde_json::Value {
    serde_json::json!({
        "id": profile.id,
        "name": profile.name,
        "email": profile.email,
        "profile_text": profile.profile_text,
        "reference_links": profile.reference_links,
        "created_at": profile.created_at,
        "last_used_at": profile.last_used_at,
    })
}

fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
        StoreError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialize_error", msg)
        }
    }
}

fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
