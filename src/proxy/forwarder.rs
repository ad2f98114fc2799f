//! Transparent forwarding with capture on the side.
//!
//! The handler relays the exchange byte-for-byte and records a preview of
//! each body through [`TeeStream`]. The capture record is inserted on
//! inbound arrival, before the upstream is contacted, so an exchange is
//! observable through `list()`/`get()` for its whole lifetime. Capture work
//! that is not needed to build the relayed response runs in detached tasks
//! keyed by the record id, so a slow store or exporter can never delay the
//! client.

use bytes::{Buf, Bytes};
use chrono::Utc;
use futures::{Stream, TryStreamExt};
use hyper::Body;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;
use warp::http::{HeaderMap, Method, Response, StatusCode};

use crate::capture::redact::{redact_headers, redact_json};
use crate::capture::{llm, BodyKind, CaptureRecord, CapturedRequest, CapturedResponse, FlowTags};
use crate::error::{FlowLensError, UpstreamError};
use crate::proxy::tee::{shared_accumulator, SharedAccumulator, TeeStream};
use crate::state::AppState;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Forward one request to the configured upstream and record the exchange.
pub async fn handle<S, B>(
    state: Arc<AppState>,
    method: Method,
    tail: warp::path::Tail,
    raw_query: String,
    headers: HeaderMap,
    body: S,
) -> Response<Body>
where
    S: Stream<Item = Result<B, warp::Error>> + Send + 'static,
    B: Buf + Send + 'static,
{
    let id = Uuid::new_v4().to_string();
    let started = Utc::now().timestamp_millis();
    let preview_limit = state.config.capture.preview_limit;

    let path = format!("/{}", tail.as_str());
    let query = if raw_query.is_empty() {
        None
    } else {
        Some(raw_query.clone())
    };
    let target = build_target_url(&state.config.proxy.upstream, &path, query.as_deref());

    let tags = FlowTags::from_headers(&headers);
    let request_headers = redact_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );
    let request_content_type = header_value(&headers, "content-type");
    let has_body = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or_else(|| headers.contains_key("transfer-encoding"));

    // The record exists from the moment the request arrives. Body fields
    // are filled in once the inbound body finishes streaming; if the
    // upstream never answers or the client walks away, the record stays
    // request-only rather than never existing.
    let mut record = CaptureRecord::new(
        id.clone(),
        CapturedRequest {
            ts: started,
            method: method.as_str().to_string(),
            url: target.clone(),
            path,
            query,
            headers: request_headers,
            body_bytes: 0,
            body_preview: None,
            encoding: None,
        },
    );
    record.session_id = tags.session_id.clone();
    record.correlation_id = tags.correlation_id.clone();
    record.user_id = tags.user_id.clone();
    state.store.insert(record);

    let req_acc = shared_accumulator(preview_limit);
    let mut upstream_req = state
        .http
        .request(
            reqwest::Method::from_bytes(method.as_str().as_bytes())
                .unwrap_or(reqwest::Method::GET),
            &target,
        )
        .headers(forward_request_headers(&headers));
    if has_body {
        let chunks: Pin<Box<dyn Stream<Item = Result<Bytes, warp::Error>> + Send>> =
            Box::pin(body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())));
        let (req_done_tx, req_done_rx) = oneshot::channel();
        let tee = TeeStream::new(chunks, req_acc.clone(), Some(req_done_tx));
        upstream_req = upstream_req.body(reqwest::Body::wrap_stream(tee));

        spawn_request_finalize(
            state.clone(),
            id.clone(),
            request_content_type.clone(),
            req_acc.clone(),
            req_done_rx,
        );
    }

    debug!(%id, method = %method, target = %target, "forwarding");

    let upstream_res = match upstream_req.send().await {
        Ok(res) => res,
        Err(err) => {
            let err = FlowLensError::from(UpstreamError::Unreachable(err.to_string()));
            warn!(%id, target = %target, "{err}");
            return Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .header("content-type", "text/plain; charset=utf-8")
                .body(Body::from("upstream unreachable"))
                .unwrap_or_else(|_| Response::new(Body::empty()));
        }
    };

    let status = upstream_res.status().as_u16();
    let response_content_type = upstream_res
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response_headers = redact_headers(upstream_res.headers().iter().filter_map(
        |(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)),
    ));
    let relay_headers: Vec<(String, Vec<u8>)> = upstream_res
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();

    let stream_id = id.clone();
    let res_stream = upstream_res.bytes_stream().inspect_err(move |e| {
        let err = UpstreamError::Stream(e.to_string());
        debug!(id = %stream_id, "{err}");
    });
    let res_acc = shared_accumulator(preview_limit);
    let (done_tx, done_rx) = oneshot::channel();
    let res_tee = TeeStream::new(Box::pin(res_stream), res_acc.clone(), Some(done_tx));

    spawn_completion(
        state.clone(),
        id,
        started,
        target,
        status,
        response_headers,
        response_content_type,
        request_content_type,
        req_acc,
        tags,
        res_acc,
        done_rx,
    );

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &relay_headers {
        builder = builder.header(name.as_str(), value.as_slice());
    }
    builder
        .body(Body::wrap_stream(res_tee))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Fill in the stored request's body fields once the inbound body has been
/// fully relayed upstream. A client that disconnects mid-body drops the
/// sender, and the record keeps its zeroed body fields.
fn spawn_request_finalize(
    state: Arc<AppState>,
    id: String,
    content_type: Option<String>,
    accumulator: SharedAccumulator,
    done_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        if done_rx.await.is_err() {
            debug!(%id, "request body ended early, body fields left empty");
            return;
        }
        let preview_limit = state.config.capture.preview_limit;
        let (body_bytes, buf) = accumulator.lock().unwrap().snapshot();
        let (body_preview, encoding) = build_preview(&buf, content_type.as_deref(), preview_limit);
        state
            .store
            .update_request_body(&id, body_bytes, body_preview, encoding);
    });
}

/// Finish the record once the response body has fully streamed to the
/// client. If the stream errors or the client disconnects, the completion
/// channel closes without firing and the record stays request-only.
#[allow(clippy::too_many_arguments)]
fn spawn_completion(
    state: Arc<AppState>,
    id: String,
    started: i64,
    target: String,
    status: u16,
    headers: HashMap<String, String>,
    content_type: Option<String>,
    request_content_type: Option<String>,
    request_accumulator: SharedAccumulator,
    tags: FlowTags,
    accumulator: SharedAccumulator,
    done_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        if done_rx.await.is_err() {
            debug!(%id, "response stream ended early, record left in flight");
            return;
        }
        let finished = Utc::now().timestamp_millis();
        let preview_limit = state.config.capture.preview_limit;
        let (body_bytes, buf) = accumulator.lock().unwrap().snapshot();
        let (body_preview, encoding) = build_preview(&buf, content_type.as_deref(), preview_limit);

        state.store.attach_response(
            &id,
            CapturedResponse {
                ts: finished,
                status,
                headers,
                body_bytes,
                body_preview: body_preview.clone(),
                encoding,
                duration_ms: finished - started,
            },
        );

        // The request body finished long before the response did, so its
        // accumulator is final here regardless of task scheduling.
        let (_, req_buf) = request_accumulator.lock().unwrap().snapshot();
        let (request_preview, _) =
            build_preview(&req_buf, request_content_type.as_deref(), preview_limit);

        let metadata = llm::extract(&target, request_preview.as_deref(), body_preview.as_deref());
        state.store.enrich(&id, metadata, tags);

        if let Some(record) = state.store.get(&id) {
            let record = Arc::new(record);
            state.events.publish(record.clone());
            if let Some(exporter) = &state.exporter {
                let exporter = exporter.clone();
                tokio::spawn(async move {
                    if let Err(err) = exporter.export(&record).await {
                        warn!("trace export failed: {err}");
                    }
                });
            }
        }
    });
}

fn build_target_url(upstream: &str, path: &str, query: Option<&str>) -> String {
    let base = upstream.trim_end_matches('/');
    match query {
        Some(q) => format!("{base}{path}?{q}"),
        None => format!("{base}{path}"),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn forward_request_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        // Host names the proxy, content-length may not survive the tee as-is.
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

/// Render a captured body as a bounded preview. JSON bodies are redacted
/// before truncation; anything else is kept as text. A body that claims
/// JSON but does not parse (including one cut off by the capture cap)
/// falls back to text.
pub fn build_preview(
    buf: &[u8],
    content_type: Option<&str>,
    limit: usize,
) -> (Option<String>, Option<BodyKind>) {
    if buf.is_empty() {
        return (None, None);
    }
    let text = String::from_utf8_lossy(buf);
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if is_json {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            let rendered = redact_json(value).to_string();
            return (Some(truncate_chars(&rendered, limit)), Some(BodyKind::Json));
        }
    }
    (Some(truncate_chars(&text, limit)), Some(BodyKind::Text))
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}
