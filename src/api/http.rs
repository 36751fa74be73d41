use std::future::Future;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::types::*;
use crate::config::Config;
use crate::error::{RefgraphError, Result};
use crate::graph::{AssetQuery, Direction};
use crate::jobs::{ChunkWindow, JobScheduler, JobStatus, TraversalRequest};

/// Check if a port is available by attempting to bind to it
async fn check_port_available(host: &str, port: u16) -> bool {
    match tokio::net::TcpListener::bind((host, port)).await {
        Ok(_) => true,
        Err(_) => false,
    }
}

/// Cut an object path (`/Game/A/B.B_C`) down to its package path (`/Game/A/B`).
pub fn normalize_package_path(path: &str) -> String {
    let path = path.trim();
    match path.find('.') {
        Some(dot) => path[..dot].to_string(),
        None => path.to_string(),
    }
}

/// Request defaults and limits taken from the config at startup
#[derive(Debug, Clone, Copy)]
struct RequestDefaults {
    depth: u32,
    direction: Direction,
    inline_node_threshold: usize,
    chunk_limit: usize,
    max_chunk_limit: usize,
}

/// HTTP front end for reference-chain analysis and chunked job retrieval
pub struct HttpServer {
    state: AppState,
    allowed_origins: Vec<String>,
}

impl HttpServer {
    pub fn new(scheduler: JobScheduler, config: &Config) -> Self {
        let defaults = RequestDefaults {
            depth: config.traversal.default_depth,
            direction: config.default_direction(),
            inline_node_threshold: config.jobs.inline_node_threshold,
            chunk_limit: config.chunking.default_limit,
            max_chunk_limit: config.chunking.max_limit,
        };
        Self {
            state: AppState { scheduler, defaults },
            allowed_origins: config.http_server.allowed_origins.clone(),
        }
    }

    /// Bind `host:port` and serve until `shutdown` resolves.
    pub async fn run<F>(&self, host: &str, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !check_port_available(host, port).await {
            return Err(RefgraphError::Config(format!(
                "Port {} is already in use. Stop the other process or set http_server.port in config.toml",
                port
            )));
        }

        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| {
                RefgraphError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to bind to {}:{}: {}", host, port, e),
                ))
            })?;

        log::info!("Starting refgraph HTTP server on http://{}:{}", host, port);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: tokio::net::TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                RefgraphError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("HTTP server error: {}", e),
                ))
            })?;
        Ok(())
    }

    pub fn router(&self) -> Router {
        // Restrict CORS only when origins are configured
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route(
                "/analysis/reference-chain",
                get(handle_chain).post(handle_chain_post),
            )
            .route("/analysis/reference-chain/async", get(handle_chain_async))
            .route("/analysis/job/status", get(handle_job_status))
            .route("/analysis/job/result", get(handle_job_result))
            .route("/asset/references", get(handle_asset_references))
            .route("/asset/referencers", get(handle_asset_referencers))
            .route("/asset/metadata", get(handle_asset_metadata))
            .route("/asset/search", get(handle_asset_search))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    scheduler: JobScheduler,
    defaults: RequestDefaults,
}

impl AppState {
    fn traversal_request(
        &self,
        start: Option<&str>,
        direction: Option<&str>,
        depth: Option<i64>,
    ) -> std::result::Result<TraversalRequest, Response> {
        let start = start.map(normalize_package_path).unwrap_or_default();
        if start.is_empty() {
            return Err(error_response(StatusCode::BAD_REQUEST, "Missing start", None));
        }

        let direction = match direction.map(str::trim).filter(|d| !d.is_empty()) {
            None => self.defaults.direction,
            Some(d) => d.parse::<Direction>().map_err(|e| {
                error_response(StatusCode::BAD_REQUEST, "Invalid direction", Some(e))
            })?,
        };

        let depth = depth.unwrap_or(i64::from(self.defaults.depth));
        Ok(TraversalRequest::new(start, direction, depth))
    }

    fn submit(&self, request: TraversalRequest) -> Response {
        let id = self.scheduler.submit(request);
        (StatusCode::OK, Json(JobEnvelope::new(&id.to_string()))).into_response()
    }
}

fn error_response(status: StatusCode, error: &str, detail: Option<String>) -> Response {
    let mut body = json!({ "ok": false, "error": error });
    if let Some(detail) = detail {
        body["detail"] = json!(detail);
    }
    (status, Json(body)).into_response()
}

fn failure_response(e: RefgraphError) -> Response {
    let (status, error) = match &e {
        RefgraphError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
        RefgraphError::JobNotFound(_) => (StatusCode::NOT_FOUND, "Job not found"),
        RefgraphError::HomeUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Graph source unavailable")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    if status.is_server_error() {
        log::error!("Request failed: {}", e);
    }
    error_response(status, error, Some(e.to_string()))
}

fn parse_number(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}

fn parse_job_id(raw: Option<&str>) -> std::result::Result<Uuid, Response> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing id", None));
    }
    Uuid::parse_str(raw).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "Invalid job id", Some(e.to_string()))
    })
}

fn required_path(raw: Option<&str>) -> std::result::Result<String, Response> {
    let path = raw.map(normalize_package_path).unwrap_or_default();
    if path.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing path", None));
    }
    Ok(path)
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "refgraph",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// Answer inline when the tree is small, otherwise queue a job.
///
/// The inline check shares the home thread with queued traversals, so it is
/// skipped while any job is in flight and the request goes straight to a job.
async fn handle_chain(State(state): State<AppState>, Query(query): Query<ChainQuery>) -> Response {
    let request = match state.traversal_request(
        query.start.as_deref(),
        query.direction.as_deref(),
        parse_number(query.depth.as_deref()),
    ) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let in_flight = state.scheduler.in_flight();
    if in_flight > 0 {
        log::debug!(
            "{} job(s) in flight, queueing {} without an inline check",
            in_flight,
            request.start
        );
        return state.submit(request);
    }

    match state
        .scheduler
        .try_inline(&request, state.defaults.inline_node_threshold)
        .await
    {
        Ok(Some(report)) => (
            StatusCode::OK,
            Json(InlineChainResponse {
                ok: true,
                mode: "inline".to_string(),
                report,
            }),
        )
            .into_response(),
        Ok(None) => state.submit(request),
        Err(e) => failure_response(e),
    }
}

async fn handle_chain_async(
    State(state): State<AppState>,
    Query(query): Query<ChainQuery>,
) -> Response {
    match state.traversal_request(
        query.start.as_deref(),
        query.direction.as_deref(),
        parse_number(query.depth.as_deref()),
    ) {
        Ok(request) => state.submit(request),
        Err(response) => response,
    }
}

async fn handle_chain_post(State(state): State<AppState>, body: Bytes) -> Response {
    let body: ChainBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body", Some(e.to_string()));
        }
    };

    match state.traversal_request(body.start.as_deref(), body.direction.as_deref(), body.depth) {
        Ok(request) => state.submit(request),
        Err(response) => response,
    }
}

async fn handle_job_status(State(state): State<AppState>, Query(query): Query<JobQuery>) -> Response {
    let id = match parse_job_id(query.id.as_deref()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(job) = state.scheduler.store().get(&id) else {
        return error_response(StatusCode::NOT_FOUND, "Job not found", Some(id.to_string()));
    };

    let total_chars = (job.status == JobStatus::Done).then(|| job.result.char_len());
    let error = (job.status == JobStatus::Error).then(|| job.error.clone());
    let response = JobStatusResponse {
        ok: true,
        id: job.id.to_string(),
        status: job.status,
        total_chars,
        error,
        created_at: job.created_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn handle_job_result(State(state): State<AppState>, Query(query): Query<JobQuery>) -> Response {
    let id = match parse_job_id(query.id.as_deref()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(job) = state.scheduler.store().get(&id) else {
        return error_response(StatusCode::NOT_FOUND, "Job not found", Some(id.to_string()));
    };

    if job.status != JobStatus::Done {
        let mut body = json!({
            "ok": false,
            "error": "Job not ready",
            "status": job.status,
        });
        if job.status == JobStatus::Error {
            body["detail"] = json!(job.error);
        }
        return (StatusCode::ACCEPTED, Json(body)).into_response();
    }

    let offset = parse_number(query.offset.as_deref()).unwrap_or(0);
    let limit = parse_number(query.limit.as_deref())
        .unwrap_or_else(|| i64::try_from(state.defaults.chunk_limit).unwrap_or(i64::MAX));
    let window = ChunkWindow::clamp(
        offset,
        limit,
        job.result.char_len(),
        state.defaults.max_chunk_limit,
    );

    let response = ChunkResponse {
        ok: true,
        id: job.id.to_string(),
        offset: window.offset,
        limit: window.limit,
        total_chars: window.total_chars,
        next_offset: window.next_offset,
        done: window.done,
        chunk: window.slice(&job.result).to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn handle_asset_references(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Response {
    asset_edges(&state, query, Direction::Dependencies).await
}

async fn handle_asset_referencers(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Response {
    asset_edges(&state, query, Direction::Referencers).await
}

/// Direct neighbors of one node, looked up on the home context
async fn asset_edges(state: &AppState, query: PathQuery, direction: Direction) -> Response {
    let path = match required_path(query.path.as_deref()) {
        Ok(path) => path,
        Err(response) => return response,
    };

    let lookup = path.clone();
    let nodes = state
        .scheduler
        .home()
        .call(move |source| source.neighbors(&lookup, direction))
        .await
        .and_then(|inner| inner);

    match nodes {
        Ok(nodes) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "path": path,
                "direction": direction,
                "count": nodes.len(),
                "nodes": nodes,
            })),
        )
            .into_response(),
        Err(e) => failure_response(e),
    }
}

async fn handle_asset_metadata(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Response {
    let path = match required_path(query.path.as_deref()) {
        Ok(path) => path,
        Err(response) => return response,
    };

    let lookup = path.clone();
    match state
        .scheduler
        .home()
        .call(move |source| source.describe(&lookup))
        .await
    {
        Ok(info) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "path": path,
                "name": info.name,
                "kind": info.kind,
            })),
        )
            .into_response(),
        Err(e) => failure_response(e),
    }
}

/// Wildcard search by asset name with an optional class filter
async fn handle_asset_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let search = match AssetQuery::new(query.pattern.as_deref().unwrap_or("*"), query.kind.as_deref()) {
        Ok(search) => search,
        Err(e) => return failure_response(e),
    };

    let pattern = search.pattern().to_string();
    let matches = state
        .scheduler
        .home()
        .call(move |source| source.search(&search))
        .await
        .and_then(|inner| inner);

    match matches {
        Ok(matches) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "pattern": pattern,
                "count": matches.len(),
                "matches": matches,
            })),
        )
            .into_response(),
        Err(e) => failure_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        AssetMatch, GraphDataSource, InMemoryGraph, NodeInfo, NodeRef, ReferenceChain,
    };
    use crate::jobs::store::tests::ManualClock;
    use crate::jobs::{DispatchPool, HomeContext, JobStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn sample_graph() -> InMemoryGraph {
        let mut g = InMemoryGraph::new();
        g.add_edge("/Game/Hero", "/Game/Skin");
        g.add_edge("/Game/Hero", "/Game/Anim");
        g.add_edge("/Game/Anim", "/Game/Skeleton");
        g.add_edge("/Game/Level", "/Game/Hero");
        g.add_node("/Game/Hero", "Hero", "Blueprint");
        g.fail_on("/Game/Broken");
        g
    }

    /// The sample graph, except that expanding `/Game/Slow` stalls the home thread
    struct StallingGraph(InMemoryGraph);

    impl GraphDataSource for StallingGraph {
        fn dependencies(&self, node: &str) -> Result<Vec<NodeRef>> {
            if node == "/Game/Slow" {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.0.dependencies(node)
        }

        fn referencers(&self, node: &str) -> Result<Vec<NodeRef>> {
            self.0.referencers(node)
        }

        fn describe(&self, node: &str) -> NodeInfo {
            self.0.describe(node)
        }

        fn search(&self, query: &AssetQuery) -> Result<Vec<AssetMatch>> {
            self.0.search(query)
        }
    }

    struct Harness {
        router: Router,
        scheduler: JobScheduler,
        pool: DispatchPool,
        home: HomeContext,
    }

    impl Harness {
        async fn new(config: Config) -> Self {
            let store = JobStore::new(config.retention());
            Self::with_parts(config, store, || Ok(sample_graph()))
        }

        fn with_parts<F, S>(config: Config, store: JobStore, factory: F) -> Self
        where
            F: FnOnce() -> Result<S> + Send + 'static,
            S: GraphDataSource + 'static,
        {
            let home = HomeContext::spawn("home-test", factory).unwrap();
            let (scheduler, pool) = JobScheduler::start(store, home.handle(), 1);
            let router = HttpServer::new(scheduler.clone(), &config).router();
            Self { router, scheduler, pool, home }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
        }

        async fn wait_for(&self, job_id: &str, wanted: &str) -> Value {
            for _ in 0..200 {
                let (_, body) = self.get(&format!("/analysis/job/status?id={}", job_id)).await;
                if body["status"] == wanted {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {} never reached {}", job_id, wanted);
        }

        async fn finish(self) {
            self.pool.shutdown_and_join().await;
            self.home.shutdown();
        }
    }

    #[test]
    fn test_normalize_package_path() {
        assert_eq!(normalize_package_path("/Game/A/B.B_C"), "/Game/A/B");
        assert_eq!(normalize_package_path(" /Game/A/B "), "/Game/A/B");
        assert_eq!(normalize_package_path(".B"), "");
    }

    #[tokio::test]
    async fn test_health() {
        let h = Harness::new(Config::default()).await;
        let (status, body) = h.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        h.finish().await;
    }

    #[tokio::test]
    async fn test_small_chain_is_inline() {
        let h = Harness::new(Config::default()).await;
        let (status, body) = h
            .get("/analysis/reference-chain?start=/Game/Hero.Hero_C&direction=dependencies&depth=2")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "inline");
        assert_eq!(body["start"], "/Game/Hero");
        assert_eq!(body["unique_nodes"], 4);
        assert_eq!(body["chain"]["kind"], "Blueprint");
        assert!(h.scheduler.store().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_large_chain_goes_async_and_reassembles() {
        let mut config = Config::default();
        config.jobs.inline_node_threshold = 2;
        let h = Harness::new(config).await;

        let (status, envelope) = h.get("/analysis/reference-chain?start=/Game/Hero").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope["ok"], true);
        assert_eq!(envelope["mode"], "async");
        let job_id = envelope["job_id"].as_str().unwrap().to_string();
        assert_eq!(
            envelope["status_url"],
            format!("/analysis/job/status?id={}", job_id)
        );

        let status_body = h.wait_for(&job_id, "done").await;
        let total = status_body["total_chars"].as_u64().unwrap();
        assert!(status_body.get("error").is_none());

        let mut payload = String::new();
        let mut offset = 0;
        loop {
            let (status, chunk) = h
                .get(&format!("/analysis/job/result?id={}&offset={}&limit=7", job_id, offset))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(chunk["offset"], offset);
            let text = chunk["chunk"].as_str().unwrap();
            assert_eq!(chunk["limit"].as_u64().unwrap(), text.chars().count() as u64);
            payload.push_str(text);
            offset = chunk["next_offset"].as_u64().unwrap();
            if chunk["done"] == true {
                break;
            }
        }
        assert_eq!(offset, total);

        let report: ReferenceChain = serde_json::from_str(&payload).unwrap();
        assert_eq!(report.start, "/Game/Hero");
        assert_eq!(report.direction, Direction::Both);
        assert_eq!(report.unique_nodes, 5);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_last_chunk_reports_remaining_limit() {
        let h = Harness::new(Config::default()).await;
        let (_, envelope) = h.get("/analysis/reference-chain/async?start=/Game/Hero").await;
        let job_id = envelope["job_id"].as_str().unwrap().to_string();
        let total = h.wait_for(&job_id, "done").await["total_chars"].as_u64().unwrap();

        let (status, chunk) = h
            .get(&format!(
                "/analysis/job/result?id={}&offset={}&limit=100",
                job_id,
                total - 3
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chunk["limit"], 3);
        assert_eq!(chunk["chunk"].as_str().unwrap().chars().count(), 3);
        assert_eq!(chunk["next_offset"], total);
        assert_eq!(chunk["done"], true);

        // Whole payload in one request: the limit shrinks to the payload size
        let (_, chunk) = h
            .get(&format!("/analysis/job/result?id={}&limit=1000000", job_id))
            .await;
        assert_eq!(chunk["limit"], total);
        assert_eq!(chunk["done"], true);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_auto_route_skips_inline_check_while_jobs_are_in_flight() {
        let config = Config::default();
        let store = JobStore::new(config.retention());
        let h = Harness::with_parts(config, store, || {
            let mut g = sample_graph();
            g.add_edge("/Game/Slow", "/Game/Hero");
            Ok(StallingGraph(g))
        });

        let (_, envelope) = h
            .get("/analysis/reference-chain/async?start=/Game/Slow&direction=dependencies")
            .await;
        let slow_id = envelope["job_id"].as_str().unwrap().to_string();
        assert!(h.scheduler.in_flight() > 0);

        // Small enough to answer inline, but the home thread is busy
        let (status, body) = h
            .get("/analysis/reference-chain?start=/Game/Hero&direction=dependencies")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "async");
        let queued_id = body["job_id"].as_str().unwrap().to_string();

        h.wait_for(&slow_id, "done").await;
        h.wait_for(&queued_id, "done").await;
        for _ in 0..200 {
            if h.scheduler.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.scheduler.in_flight(), 0);

        // Idle again: the same request is answered inline
        let (_, body) = h
            .get("/analysis/reference-chain?start=/Game/Hero&direction=dependencies")
            .await;
        assert_eq!(body["mode"], "inline");
        h.finish().await;
    }

    #[tokio::test]
    async fn test_evicted_job_is_not_found() {
        let clock = ManualClock::new();
        let config = Config::default();
        let store = JobStore::with_clock(config.retention(), clock.as_clock());
        let h = Harness::with_parts(config, store, || Ok(sample_graph()));

        let (_, envelope) = h.get("/analysis/reference-chain/async?start=/Game/Hero").await;
        let job_id = envelope["job_id"].as_str().unwrap().to_string();
        h.wait_for(&job_id, "done").await;
        let (status, _) = h.get(&format!("/analysis/job/result?id={}", job_id)).await;
        assert_eq!(status, StatusCode::OK);

        clock.advance(601);
        let (status, body) = h.get(&format!("/analysis/job/status?id={}", job_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
        let (status, _) = h.get(&format!("/analysis/job/result?id={}", job_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(h.scheduler.store().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_async_route_and_post() {
        let h = Harness::new(Config::default()).await;
        let (status, envelope) = h
            .get("/analysis/reference-chain/async?start=/Game/Level&direction=dependencies")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope["mode"], "async");

        let request = Request::builder()
            .method("POST")
            .uri("/analysis/reference-chain")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"start":"/Game/Anim","direction":"referencers","depth":99}"#))
            .unwrap();
        let (status, envelope) = h.send(request).await;
        assert_eq!(status, StatusCode::OK);
        let job_id = envelope["job_id"].as_str().unwrap().to_string();
        h.wait_for(&job_id, "done").await;

        let (_, chunk) = h.get(&format!("/analysis/job/result?id={}", job_id)).await;
        assert_eq!(chunk["done"], true);
        let report: Value = serde_json::from_str(chunk["chunk"].as_str().unwrap()).unwrap();
        assert_eq!(report["max_depth"], 10);
        assert_eq!(report["chain"]["children"][0]["path"], "/Game/Hero");
        h.finish().await;
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let h = Harness::new(Config::default()).await;

        let (status, body) = h.get("/analysis/reference-chain/async").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, _) = h
            .get("/analysis/reference-chain?start=/Game/Hero&direction=sideways")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h.get("/analysis/job/status?id=not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = h.get("/analysis/job/result").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/analysis/reference-chain")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = h.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Nothing was queued by any of the above
        assert!(h.scheduler.store().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = Harness::new(Config::default()).await;
        let id = Uuid::new_v4();
        let (status, body) = h.get(&format!("/analysis/job/status?id={}", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
        let (status, _) = h.get(&format!("/analysis/job/result?id={}", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_result_not_ready() {
        let h = Harness::new(Config::default()).await;
        // Registered but never dispatched, so it stays pending
        let id = h.scheduler.store().create();
        let (status, body) = h.get(&format!("/analysis/job/result?id={}", id)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "Job not ready");
        assert_eq!(body["status"], "pending");

        let (status, body) = h.get(&format!("/analysis/job/status?id={}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("total_chars").is_none());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_failed_job_reports_error() {
        let h = Harness::new(Config::default()).await;
        let (_, envelope) = h.get("/analysis/reference-chain/async?start=/Game/Broken").await;
        let job_id = envelope["job_id"].as_str().unwrap().to_string();

        let status_body = h.wait_for(&job_id, "error").await;
        assert!(status_body["error"].as_str().unwrap().contains("/Game/Broken"));
        assert!(status_body.get("total_chars").is_none());

        let (status, body) = h.get(&format!("/analysis/job/result?id={}", job_id)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "error");
        h.finish().await;
    }

    #[tokio::test]
    async fn test_asset_routes() {
        let h = Harness::new(Config::default()).await;

        let (status, body) = h.get("/asset/references?path=/Game/Hero.Hero").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], json!(["/Game/Skin", "/Game/Anim"]));

        let (_, body) = h.get("/asset/referencers?path=/Game/Hero").await;
        assert_eq!(body["nodes"], json!(["/Game/Level"]));

        let (_, body) = h.get("/asset/metadata?path=/Game/Hero").await;
        assert_eq!(body["name"], "Hero");
        assert_eq!(body["kind"], "Blueprint");

        let (status, _) = h.get("/asset/references").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = h.get("/asset/references?path=/Game/Broken").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_asset_search() {
        let h = Harness::new(Config::default()).await;

        // Bare text matches as a substring, ignoring case
        let (status, body) = h.get("/asset/search?pattern=sk").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pattern"], "*sk*");
        assert_eq!(body["count"], 2);
        assert_eq!(body["matches"][0]["path"], "/Game/Skeleton");
        assert_eq!(body["matches"][1]["path"], "/Game/Skin");

        let (_, body) = h.get("/asset/search?pattern=Sk%3Fn").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["matches"][0]["name"], "Skin");

        let (_, body) = h.get("/asset/search?pattern=*&type=blueprint").await;
        assert_eq!(
            body["matches"],
            json!([{ "name": "Hero", "path": "/Game/Hero", "type": "Blueprint" }])
        );

        let (_, body) = h.get("/asset/search").await;
        assert_eq!(body["pattern"], "*");
        assert_eq!(body["count"], 5);

        let (_, body) = h.get("/asset/search?pattern=Nothing*").await;
        assert_eq!(body["count"], 0);
        assert_eq!(body["matches"], json!([]));
        h.finish().await;
    }

    #[tokio::test]
    async fn test_home_gone_is_service_unavailable() {
        let h = Harness::new(Config::default()).await;
        let Harness { router, scheduler, pool, home } = h;
        home.shutdown();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/asset/metadata?path=/Game/Hero")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        drop(scheduler);
        pool.shutdown_and_join().await;
    }
}
