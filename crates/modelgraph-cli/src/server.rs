//! modelgraph upload server.
//!
//! Small hyper server in front of the [`UploadCoordinator`]:
//! - `POST /upload` streams a multipart `file` field to disk and extracts it,
//! - `POST /upload-chunk` stages one chunk; the chunk that completes an
//!   upload gets the graph back,
//! - `GET /health` for liveness probes.
//!
//! Coordinator calls do blocking file I/O and parsing, so they run on the
//! tokio blocking pool. A background ticker reaps abandoned uploads.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
    CONTENT_LENGTH, CONTENT_TYPE, ORIGIN, VARY,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use modelgraph_graph::{Graph, GraphCaps};
use modelgraph_ingest_step::StepEntitySource;
use modelgraph_storage::{ChunkOutcome, ChunkStore, ChunkUpload, UploadCoordinator, UploadError};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use url::form_urlencoded;

use crate::ServeArgs;

const FILE_ID_HEADER: &str = "file-id";
const CHUNK_NUMBER_HEADER: &str = "chunk-number";
const TOTAL_CHUNKS_HEADER: &str = "total-chunks";
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone)]
struct ServerConfig {
    listen: SocketAddr,
    upload_dir: PathBuf,
    default_caps: GraphCaps,
    session_ttl: Duration,
    reap_interval: Duration,
    cors_origins: Vec<String>,
    max_chunk_bytes: u64,
    ready_file: Option<PathBuf>,
}

struct ServerState {
    config: ServerConfig,
    coordinator: Arc<UploadCoordinator>,
}

pub(crate) fn cmd_serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig {
        listen: args.listen,
        upload_dir: args
            .upload_dir
            .unwrap_or_else(|| std::env::temp_dir().join("uploads")),
        default_caps: GraphCaps::new(args.default_max_nodes, args.default_max_relationships),
        session_ttl: Duration::from_secs(args.session_ttl_secs),
        reap_interval: Duration::from_secs(args.reap_interval_secs),
        cors_origins: args.cors_origins,
        max_chunk_bytes: args.max_chunk_bytes,
        ready_file: args.ready_file,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(async move { serve_async(config).await })
}

async fn serve_async(config: ServerConfig) -> Result<()> {
    let store = ChunkStore::new(&config.upload_dir)
        .with_context(|| format!("serve: cannot use upload dir {}", config.upload_dir.display()))?;
    let coordinator = Arc::new(UploadCoordinator::new(
        store,
        Arc::new(StepEntitySource),
        config.session_ttl,
    ));

    if !config.reap_interval.is_zero() && !config.session_ttl.is_zero() {
        let coordinator = coordinator.clone();
        let interval = config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let coordinator = coordinator.clone();
                match tokio::task::spawn_blocking(move || coordinator.reap_expired()).await {
                    Ok(Ok(report)) if report.sessions > 0 => {
                        tracing::info!(sessions = report.sessions, "reaper pass");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "reaper pass failed"),
                    Err(e) => tracing::warn!(error = %e, "reaper task failed"),
                }
            }
        });
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    tracing::info!(
        addr = %bound,
        upload_dir = %config.upload_dir.display(),
        max_nodes = config.default_caps.max_nodes,
        max_relationships = config.default_caps.max_relationships,
        "listening"
    );
    if let Some(path) = config.ready_file.as_ref() {
        write_ready_file(path, bound);
    }

    let state = Arc::new(ServerState {
        config,
        coordinator,
    });

    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "connection error");
            }
        });
    }
}

fn write_ready_file(path: &Path, bound: SocketAddr) {
    let payload = serde_json::json!({
        "addr": bound.to_string(),
        "pid": std::process::id(),
    });
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(path = %parent.display(), error = %e, "failed to create ready file directory");
        }
    }
    if let Err(e) = std::fs::write(path, payload.to_string()) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write ready file");
    }
}

// ============================================================================
// Routing
// ============================================================================

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let resp = match (method, path.as_str()) {
        (Method::OPTIONS, _) => preflight_response(),
        (Method::GET, "/health" | "/healthz") => {
            json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
        }
        (Method::POST, "/upload" | "/api/upload") => match handle_upload(req, &state).await {
            Ok(graph) => graph_response(&graph),
            Err(e) => upload_error_response(&e),
        },
        (Method::POST, "/upload-chunk" | "/api/upload-chunk") => {
            match handle_chunk(req, &state).await {
                Ok(ChunkOutcome::Received { index }) => json_response(
                    StatusCode::OK,
                    &serde_json::json!({ "message": format!("Chunk {index} received") }),
                ),
                Ok(ChunkOutcome::Completed(graph)) => graph_response(&graph),
                Err(e) => upload_error_response(&e),
            }
        }
        _ => json_error(StatusCode::NOT_FOUND, &format!("no route for {path}")),
    };

    Ok(with_cors(resp, origin.as_deref(), &state.config.cors_origins))
}

async fn handle_upload(req: Request<Incoming>, state: &ServerState) -> Result<Graph, UploadError> {
    let params = parse_query_params(req.uri().query());
    let caps = caps_from_params(&params, state.config.default_caps)?;
    let boundary = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| UploadError::validation("expected a multipart/form-data body"))?;

    // Removed on every early exit, including the client going away mid-body.
    let incoming = IncomingFile::new(state.coordinator.clone());
    let bytes = receive_multipart_file(req.into_body(), boundary, incoming.path()).await?;
    tracing::info!(path = %incoming.path().display(), bytes, "file uploaded");

    let coordinator = state.coordinator.clone();
    let path = incoming.into_path();
    tokio::task::spawn_blocking(move || coordinator.process_file(path, caps))
        .await
        .map_err(join_error)?
}

/// Whole-file upload path owned by a request until it is handed to the
/// coordinator.
struct IncomingFile {
    coordinator: Arc<UploadCoordinator>,
    path: PathBuf,
}

impl IncomingFile {
    fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        let path = coordinator.store().incoming_path();
        Self { coordinator, path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Release the file; the caller becomes responsible for removing it.
    fn into_path(mut self) -> PathBuf {
        std::mem::take(&mut self.path)
    }
}

impl Drop for IncomingFile {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = self.coordinator.store().remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove partial upload");
        }
    }
}

/// Stream the `file` field of a multipart body into `path`.
async fn receive_multipart_file(
    body: Incoming,
    boundary: String,
    path: &Path,
) -> Result<u64, UploadError> {
    let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| UploadError::storage(format!("creating {}", path.display()), e))?;
        let mut written = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| UploadError::storage(format!("writing {}", path.display()), e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| UploadError::storage(format!("writing {}", path.display()), e))?;
        return Ok(written);
    }

    Err(UploadError::validation(format!(
        "multipart field '{UPLOAD_FIELD}' is missing"
    )))
}

async fn handle_chunk(
    req: Request<Incoming>,
    state: &ServerState,
) -> Result<ChunkOutcome, UploadError> {
    let params = parse_query_params(req.uri().query());
    let caps = caps_from_params(&params, state.config.default_caps)?;
    let headers = req.headers();
    let session_id = required_header(headers, FILE_ID_HEADER)?.to_string();
    let index: u32 = numeric_header(headers, CHUNK_NUMBER_HEADER)?;
    let total_chunks: u32 = numeric_header(headers, TOTAL_CHUNKS_HEADER)?;

    let limit = state.config.max_chunk_bytes;
    if let Some(size) = content_length(headers) {
        if size > limit {
            return Err(UploadError::PayloadTooLarge { size, limit });
        }
    }
    let bytes = read_limited_body(req.into_body(), limit).await?;

    let upload = ChunkUpload {
        session_id,
        index,
        total_chunks,
        bytes,
    };
    let coordinator = state.coordinator.clone();
    tokio::task::spawn_blocking(move || coordinator.accept_chunk(upload, caps))
        .await
        .map_err(join_error)?
}

async fn read_limited_body(body: Incoming, limit: u64) -> Result<Bytes, UploadError> {
    let limited = Limited::new(body, usize::try_from(limit).unwrap_or(usize::MAX));
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(UploadError::PayloadTooLarge {
                size: limit.saturating_add(1),
                limit,
            })
        }
        Err(e) => Err(UploadError::validation(format!(
            "failed to read request body: {e}"
        ))),
    }
}

// ============================================================================
// Request parsing
// ============================================================================

fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(q) = query else {
        return out;
    };
    for (k, v) in form_urlencoded::parse(q.as_bytes()) {
        out.insert(k.into_owned(), v.into_owned());
    }
    out
}

fn caps_from_params(
    params: &HashMap<String, String>,
    defaults: GraphCaps,
) -> Result<GraphCaps, UploadError> {
    let cap = |name: &str, default: usize| -> Result<usize, UploadError> {
        match params.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                UploadError::validation(format!(
                    "{name} must be a non-negative integer (got `{raw}`)"
                ))
            }),
        }
    };
    Ok(GraphCaps::new(
        cap("max_nodes", defaults.max_nodes)?,
        cap("max_relationships", defaults.max_relationships)?,
    ))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, UploadError> {
    let value = headers
        .get(name)
        .ok_or_else(|| UploadError::validation(format!("missing `{name}` header")))?;
    let value = value
        .to_str()
        .map_err(|_| UploadError::validation(format!("`{name}` header is not valid text")))?
        .trim();
    if value.is_empty() {
        return Err(UploadError::validation(format!("`{name}` header is empty")));
    }
    Ok(value)
}

fn numeric_header(headers: &HeaderMap, name: &str) -> Result<u32, UploadError> {
    let raw = required_header(headers, name)?;
    raw.parse::<u32>().map_err(|_| {
        UploadError::validation(format!(
            "`{name}` header must be a non-negative integer (got `{raw}`)"
        ))
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn multipart_error(e: multer::Error) -> UploadError {
    UploadError::validation(format!("invalid multipart body: {e}"))
}

fn join_error(e: tokio::task::JoinError) -> UploadError {
    UploadError::storage("running upload task", std::io::Error::other(e))
}

// ============================================================================
// Responses
// ============================================================================

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value)
        .unwrap_or_else(|_| b"{\"detail\":\"failed to serialize response\"}".to_vec());
    json_bytes_response(status, body)
}

fn graph_response(graph: &Graph) -> Response<Full<Bytes>> {
    match graph.to_json_vec() {
        Ok(body) => {
            tracing::info!(
                bytes = body.len(),
                nodes = graph.nodes.len(),
                edges = graph.edges.len(),
                "graph response serialized"
            );
            json_bytes_response(StatusCode::OK, body)
        }
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to serialize graph: {e}"),
        ),
    }
}

fn json_bytes_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from_static(b"{\"detail\":\"internal error\"}")))
        })
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let v = serde_json::json!({ "detail": msg });
    json_response(status, &v)
}

fn upload_error_response(e: &UploadError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %e, "upload failed");
    } else {
        tracing::warn!(status = status.as_u16(), error = %e, "upload rejected");
    }
    json_error(status, &e.to_string())
}

fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .header(
            ACCESS_CONTROL_ALLOW_HEADERS,
            "content-type, file-id, chunk-number, total-chunks",
        )
        .header(ACCESS_CONTROL_MAX_AGE, "600")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Echo the request origin back when it is allowed.
fn with_cors(
    mut resp: Response<Full<Bytes>>,
    origin: Option<&str>,
    allowed: &[String],
) -> Response<Full<Bytes>> {
    let Some(origin) = origin else {
        return resp;
    };
    if !allowed.iter().any(|a| a == "*" || a == origin) {
        return resp;
    }
    let Ok(value) = HeaderValue::from_str(origin) else {
        return resp;
    };
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    resp
}
