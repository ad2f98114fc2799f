use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::with_state;
use crate::capture::{CaptureRecord, ListFilter};
use crate::state::AppState;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("events")
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with_state(state.clone()))
        .and_then(list_events);

    let get = warp::path!("events" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_event);

    let cost = warp::path!("stats" / "cost")
        .and(warp::get())
        .and(warp::query::<SinceQuery>())
        .and(with_state(state.clone()))
        .and_then(cost_stats);

    let flow = warp::path!("stats" / "flow")
        .and(warp::get())
        .and(warp::query::<SinceQuery>())
        .and(with_state(state.clone()))
        .and_then(flow_stats);

    let related = warp::path!("stats" / "flow" / "related")
        .and(warp::get())
        .and(warp::query::<RelatedQuery>())
        .and(with_state(state.clone()))
        .and_then(related_events);

    let replay = warp::path!("replay" / String)
        .and(warp::post())
        .and(warp::query::<ReplayQuery>())
        .and(with_state(state))
        .and_then(replay_event);

    warp::path("api").and(list.or(get).or(cost).or(flow).or(related).or(replay))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    /// Comma-separated method list.
    pub method: Option<String>,
    /// Comma-separated status list; entries that are not numbers are dropped.
    pub status: Option<String>,
    pub path_includes: Option<String>,
    /// Free-text search across path and body previews.
    pub q: Option<String>,
    pub since_ts: Option<i64>,
}

impl EventsQuery {
    fn into_filter(self) -> ListFilter {
        ListFilter {
            methods: self.method.map(|m| split_csv(&m)),
            statuses: self.status.map(|s| {
                s.split(',')
                    .filter_map(|part| part.trim().parse::<u16>().ok())
                    .collect()
            }),
            path_includes: self.path_includes.filter(|p| !p.is_empty()),
            search: self.q.filter(|q| !q.is_empty()),
            since_ts: self.since_ts,
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

async fn list_events(
    query: EventsQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let records = state.store.list(&query.into_filter());
    Ok(warp::reply::json(&records))
}

async fn get_event(id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    match state.store.get(&id) {
        Some(record) => Ok(warp::reply::with_status(
            warp::reply::json(&record),
            StatusCode::OK,
        )),
        None => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "error": "not found", "id": id })),
            StatusCode::NOT_FOUND,
        )),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    /// Minimum arrival timestamp, milliseconds since epoch. Defaults to the
    /// last 24 hours.
    pub since: Option<i64>,
}

impl SinceQuery {
    fn window(&self) -> ListFilter {
        ListFilter {
            since_ts: Some(
                self.since
                    .unwrap_or_else(|| Utc::now().timestamp_millis() - DAY_MS),
            ),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
struct CostBucket {
    cost: f64,
    requests: u64,
    tokens: u64,
}

impl CostBucket {
    fn add(&mut self, cost: f64, tokens: u64) {
        self.cost += cost;
        self.requests += 1;
        self.tokens += tokens;
    }
}

/// Aggregate LLM spend over the stored window: totals, per-provider and
/// per-model buckets, the ten most expensive calls, and an hourly
/// cost-over-time series with a running cumulative.
async fn cost_stats(query: SinceQuery, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let records = state.store.list(&query.window());

    let total_requests = records.len();
    let mut total_cost = 0.0;
    let mut total_llm_requests = 0u64;
    let mut total_tokens = 0u64;
    let mut by_provider: BTreeMap<String, CostBucket> = BTreeMap::new();
    let mut by_model: BTreeMap<String, CostBucket> = BTreeMap::new();
    let mut expensive: Vec<serde_json::Value> = Vec::new();
    let mut cost_by_hour: BTreeMap<i64, f64> = BTreeMap::new();

    for record in &records {
        let Some(llm) = &record.llm else { continue };
        let cost = llm.cost.unwrap_or(0.0);
        let tokens = llm.total_tokens.unwrap_or(0);
        let model = llm.model.as_deref().unwrap_or("unknown");

        total_llm_requests += 1;
        total_cost += cost;
        total_tokens += tokens;
        by_provider
            .entry(llm.provider.name().to_string())
            .or_default()
            .add(cost, tokens);
        by_model.entry(model.to_string()).or_default().add(cost, tokens);

        if cost > 0.0 {
            expensive.push(serde_json::json!({
                "id": record.id,
                "cost": cost,
                "model": model,
                "path": record.request.path,
                "timestamp": record.request.ts,
            }));
        }

        let bucket = (record.request.ts / HOUR_MS) * HOUR_MS;
        *cost_by_hour.entry(bucket).or_insert(0.0) += cost;
    }

    expensive.sort_by(|a, b| {
        let (a, b) = (cost_of(a), cost_of(b));
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    expensive.truncate(10);

    let mut cumulative = 0.0;
    let cost_over_time: Vec<serde_json::Value> = cost_by_hour
        .into_iter()
        .map(|(timestamp, cost)| {
            cumulative += cost;
            serde_json::json!({ "timestamp": timestamp, "cost": cost, "cumulative": cumulative })
        })
        .collect();

    Ok(warp::reply::json(&serde_json::json!({
        "totalCost": total_cost,
        "totalRequests": total_requests,
        "totalLLMRequests": total_llm_requests,
        "totalTokens": total_tokens,
        "byProvider": by_provider,
        "byModel": by_model,
        "mostExpensive": expensive,
        "costOverTime": cost_over_time,
    })))
}

fn cost_of(entry: &serde_json::Value) -> f64 {
    entry["cost"].as_f64().unwrap_or(0.0)
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowBucket {
    requests: u64,
    duration: i64,
    first_seen: i64,
    last_seen: i64,
}

impl FlowBucket {
    fn add(&mut self, ts: i64, duration: i64) {
        if self.requests == 0 {
            self.first_seen = ts;
            self.last_seen = ts;
        }
        self.requests += 1;
        self.duration += duration;
        self.first_seen = self.first_seen.min(ts);
        self.last_seen = self.last_seen.max(ts);
    }
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserBucket {
    requests: u64,
    llm_cost: f64,
    sessions: u64,
}

/// Group the stored window by the flow tags: per-session and
/// per-correlation request counts and durations, per-user request counts
/// and LLM spend.
async fn flow_stats(query: SinceQuery, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let records = state.store.list(&query.window());

    let mut sessions: BTreeMap<String, FlowBucket> = BTreeMap::new();
    let mut correlations: BTreeMap<String, FlowBucket> = BTreeMap::new();
    let mut users: BTreeMap<String, UserBucket> = BTreeMap::new();

    for record in &records {
        let ts = record.request.ts;
        let duration = record
            .response
            .as_ref()
            .map(|res| res.duration_ms)
            .unwrap_or(0);

        if let Some(session) = &record.session_id {
            sessions.entry(session.clone()).or_default().add(ts, duration);
        }
        if let Some(correlation) = &record.correlation_id {
            correlations
                .entry(correlation.clone())
                .or_default()
                .add(ts, duration);
        }
        if let Some(user) = &record.user_id {
            let bucket = users.entry(user.clone()).or_default();
            bucket.requests += 1;
            if let Some(cost) = record.llm.as_ref().and_then(|llm| llm.cost) {
                bucket.llm_cost += cost;
            }
            if record.session_id.is_some() {
                bucket.sessions += 1;
            }
        }
    }

    Ok(warp::reply::json(&serde_json::json!({
        "sessions": sessions,
        "correlations": correlations,
        "users": users,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedQuery {
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
}

impl RelatedQuery {
    fn matches(&self, record: &CaptureRecord) -> bool {
        let same = |filter: &Option<String>, value: &Option<String>| {
            matches!((filter, value), (Some(f), Some(v)) if f == v)
        };
        same(&self.session_id, &record.session_id)
            || same(&self.correlation_id, &record.correlation_id)
            || same(&self.user_id, &record.user_id)
    }
}

/// Every record sharing any of the given flow tags, oldest first.
async fn related_events(
    query: RelatedQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let mut related: Vec<CaptureRecord> = state
        .store
        .list(&ListFilter::default())
        .into_iter()
        .filter(|record| query.matches(record))
        .collect();
    related.sort_by_key(|record| record.request.ts);

    Ok(warp::reply::json(&serde_json::json!({
        "total": related.len(),
        "events": related,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayQuery {
    /// `dangerHeaders=1` replays credential headers as stored. They are
    /// redacted at capture time, so this mostly matters for custom setups.
    pub danger_headers: Option<String>,
}

/// Re-issue a captured request against its original target and report the
/// new status plus a bounded body preview. The replayed exchange does not
/// pass through the capture pipeline.
async fn replay_event(
    id: String,
    query: ReplayQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let Some(record) = state.store.get(&id) else {
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "ok": false, "error": "not_found" })),
            StatusCode::NOT_FOUND,
        ));
    };

    let include_credentials = query.danger_headers.as_deref() == Some("1");
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &record.request.headers {
        let lower = name.to_lowercase();
        if !include_credentials && matches!(lower.as_str(), "authorization" | "cookie") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(lower.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let method = reqwest::Method::from_bytes(record.request.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut request = state.http.request(method, &record.request.url).headers(headers);
    if let Some(body) = &record.request.body_preview {
        request = request.body(body.clone());
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let limit = state.config.capture.preview_limit;
            let preview: String = text.chars().take(limit).collect();
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "ok": true,
                    "status": status,
                    "bodyPreview": preview,
                })),
                StatusCode::OK,
            ))
        }
        Err(err) => {
            warn!(%id, "replay failed: {err}");
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "ok": false, "error": "unreachable" })),
                StatusCode::BAD_GATEWAY,
            ))
        }
    }
}
