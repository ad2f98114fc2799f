use super::*;
use crate::capture::llm::{LlmMetadata, Provider};
use crate::capture::{CaptureRecord, CapturedRequest, CapturedResponse};
use crate::config::Config;
use std::collections::HashMap;
use warp::test::request;

fn test_state() -> Arc<AppState> {
    let (state, _shutdown_rx) = AppState::new(Config::default());
    state
}

fn seed_record(state: &AppState, id: &str, method: &str, path: &str, status: Option<u16>) {
    let mut record = CaptureRecord::new(
        id.to_string(),
        CapturedRequest {
            ts: 1000,
            method: method.to_string(),
            url: format!("http://upstream{path}"),
            path: path.to_string(),
            query: None,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
        },
    );
    if let Some(status) = status {
        record.response = Some(CapturedResponse {
            ts: 1100,
            status,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
            duration_ms: 100,
        });
    }
    state.store.insert(record);
}

fn seed_llm_record(state: &AppState, id: &str, model: &str, cost: f64, ts: i64) {
    let mut record = CaptureRecord::new(
        id.to_string(),
        CapturedRequest {
            ts,
            method: "POST".to_string(),
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            path: "/v1/chat/completions".to_string(),
            query: None,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
        },
    );
    record.response = Some(CapturedResponse {
        ts: ts + 500,
        status: 200,
        headers: HashMap::new(),
        body_bytes: 0,
        body_preview: None,
        encoding: None,
        duration_ms: 500,
    });
    record.llm = Some(LlmMetadata {
        provider: Provider::OpenAi,
        model: Some(model.to_string()),
        prompt_tokens: Some(100),
        completion_tokens: Some(50),
        total_tokens: Some(150),
        cost: Some(cost),
        temperature: None,
        max_tokens: None,
        finish_reason: Some("stop".to_string()),
    });
    state.store.insert(record);
}

#[tokio::test]
async fn test_list_events_empty() {
    let state = test_state();
    let routes = api::routes(state);

    let resp = request().method("GET").path("/api/events").reply(&routes).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_events_filters_by_method_and_status() {
    let state = test_state();
    seed_record(&state, "r1", "GET", "/a", Some(200));
    seed_record(&state, "r2", "POST", "/b", Some(404));
    seed_record(&state, "r3", "POST", "/c", Some(200));
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/events?method=POST&status=200")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["r3"]);
}

#[tokio::test]
async fn test_get_event_by_id() {
    let state = test_state();
    seed_record(&state, "r1", "GET", "/a", None);
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/events/r1")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["id"], "r1");
    assert_eq!(body["req"]["method"], "GET");
}

#[tokio::test]
async fn test_get_unknown_event_is_404() {
    let state = test_state();
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/events/missing")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["error"], "not found");
}

#[tokio::test]
async fn test_cost_stats_aggregates_by_model() {
    let state = test_state();
    seed_llm_record(&state, "c1", "gpt-4", 0.09, 1000);
    seed_llm_record(&state, "c2", "gpt-4", 0.03, 2000);
    seed_llm_record(&state, "c3", "gpt-3.5-turbo", 0.001, 3000);
    seed_record(&state, "plain", "GET", "/static", Some(200));
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/stats/cost?since=0")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["totalRequests"], 4);
    assert_eq!(body["totalLLMRequests"], 3);
    assert_eq!(body["totalTokens"], 450);
    assert!((body["totalCost"].as_f64().unwrap() - 0.121).abs() < 1e-9);
    assert_eq!(body["byModel"]["gpt-4"]["requests"], 2);
    assert_eq!(body["byProvider"]["openai"]["tokens"], 450);
    assert_eq!(body["mostExpensive"][0]["id"], "c1");
    assert_eq!(body["mostExpensive"][0]["model"], "gpt-4");
}

#[tokio::test]
async fn test_cost_stats_since_window() {
    let state = test_state();
    seed_llm_record(&state, "old", "gpt-4", 0.09, 1000);
    seed_llm_record(&state, "new", "gpt-4", 0.03, 5000);
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/stats/cost?since=4000")
        .reply(&routes)
        .await;

    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["totalLLMRequests"], 1);
    assert_eq!(body["mostExpensive"][0]["id"], "new");
}

#[tokio::test]
async fn test_cost_over_time_accumulates_hourly() {
    const HOUR: i64 = 60 * 60 * 1000;
    let state = test_state();
    seed_llm_record(&state, "c1", "gpt-4", 0.09, 1000);
    seed_llm_record(&state, "c2", "gpt-4", 0.03, HOUR + 1000);
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/stats/cost?since=0")
        .reply(&routes)
        .await;

    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    let series = body["costOverTime"].as_array().unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0]["timestamp"], 0);
    assert_eq!(series[1]["timestamp"], HOUR);
    assert!((series[0]["cumulative"].as_f64().unwrap() - 0.09).abs() < 1e-9);
    assert!((series[1]["cumulative"].as_f64().unwrap() - 0.12).abs() < 1e-9);
}

fn seed_tagged_record(
    state: &AppState,
    id: &str,
    ts: i64,
    session: Option<&str>,
    user: Option<&str>,
) {
    let mut record = CaptureRecord::new(
        id.to_string(),
        CapturedRequest {
            ts,
            method: "GET".to_string(),
            url: "http://upstream/a".to_string(),
            path: "/a".to_string(),
            query: None,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
        },
    );
    record.response = Some(CapturedResponse {
        ts: ts + 40,
        status: 200,
        headers: HashMap::new(),
        body_bytes: 0,
        body_preview: None,
        encoding: None,
        duration_ms: 40,
    });
    record.session_id = session.map(str::to_string);
    record.user_id = user.map(str::to_string);
    state.store.insert(record);
}

#[tokio::test]
async fn test_flow_stats_groups_by_session_and_user() {
    let state = test_state();
    seed_tagged_record(&state, "f1", 1000, Some("s1"), Some("u1"));
    seed_tagged_record(&state, "f2", 2000, Some("s1"), Some("u1"));
    seed_tagged_record(&state, "f3", 3000, Some("s2"), None);
    seed_tagged_record(&state, "f4", 4000, None, None);
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/stats/flow?since=0")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["sessions"]["s1"]["requests"], 2);
    assert_eq!(body["sessions"]["s1"]["firstSeen"], 1000);
    assert_eq!(body["sessions"]["s1"]["lastSeen"], 2000);
    assert_eq!(body["sessions"]["s1"]["duration"], 80);
    assert_eq!(body["sessions"]["s2"]["requests"], 1);
    assert_eq!(body["users"]["u1"]["requests"], 2);
    assert_eq!(body["users"]["u1"]["sessions"], 2);
}

#[tokio::test]
async fn test_related_events_match_any_tag_oldest_first() {
    let state = test_state();
    seed_tagged_record(&state, "f1", 3000, Some("s1"), None);
    seed_tagged_record(&state, "f2", 1000, Some("s1"), None);
    seed_tagged_record(&state, "f3", 2000, Some("s2"), Some("u9"));
    seed_tagged_record(&state, "f4", 4000, None, None);
    let routes = api::routes(state);

    let resp = request()
        .method("GET")
        .path("/api/stats/flow/related?sessionId=s1&userId=u9")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["total"], 3);
    let ids: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["f2", "f3", "f1"]);
}

#[tokio::test]
async fn test_replay_strips_credential_headers() {
    let upstream = warp::path!("echo").map(|| {
        warp::reply::json(&serde_json::json!({ "replayed": true }))
    });
    let auth_probe = warp::header::<String>("authorization")
        .map(|_: String| warp::reply::with_status("leaked", warp::http::StatusCode::FORBIDDEN));
    let (addr, server) =
        warp::serve(auth_probe.or(upstream)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let state = test_state();
    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Bearer sk-test".to_string());
    headers.insert("x-custom".to_string(), "kept".to_string());
    let record = CaptureRecord::new(
        "rp1".to_string(),
        CapturedRequest {
            ts: 1000,
            method: "GET".to_string(),
            url: format!("http://{addr}/echo"),
            path: "/echo".to_string(),
            query: None,
            headers,
            body_bytes: 0,
            body_preview: None,
            encoding: None,
        },
    );
    state.store.insert(record);
    let routes = api::routes(state);

    let resp = request()
        .method("POST")
        .path("/api/replay/rp1")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], 200);
    assert!(body["bodyPreview"].as_str().unwrap().contains("replayed"));
}

#[tokio::test]
async fn test_replay_unknown_id_is_not_found() {
    let state = test_state();
    let routes = api::routes(state);

    let resp = request()
        .method("POST")
        .path("/api/replay/missing")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = test_state();
    let all = routes(state);

    let resp = request().method("GET").path("/health").reply(&all).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ws_rehydration_batch_is_capped_and_newest_first() {
    let state = test_state();
    for i in 0..150 {
        // Distinct arrival times so the sort order is observable.
        let mut record = CaptureRecord::new(
            format!("r{i}"),
            CapturedRequest {
                ts: i,
                method: "GET".to_string(),
                url: "http://upstream/a".to_string(),
                path: "/a".to_string(),
                query: None,
                headers: HashMap::new(),
                body_bytes: 0,
                body_preview: None,
                encoding: None,
            },
        );
        record.response = Some(CapturedResponse {
            ts: i + 1,
            status: 200,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
            duration_ms: 1,
        });
        state.store.insert(record);
    }
    let route = ws::route(state);

    let mut client = warp::test::ws()
        .path("/api/ws")
        .handshake(route)
        .await
        .expect("handshake");

    let msg = client.recv().await.expect("rehydrate frame");
    let body: serde_json::Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 100);
    assert_eq!(data[0]["id"], "r149");
    assert_eq!(data[99]["id"], "r50");
}

#[tokio::test]
async fn test_ws_rehydrates_recent_records() {
    let state = test_state();
    seed_record(&state, "r1", "GET", "/a", Some(200));
    let route = ws::route(state);

    let mut client = warp::test::ws()
        .path("/api/ws")
        .handshake(route)
        .await
        .expect("handshake");

    let msg = client.recv().await.expect("rehydrate frame");
    let body: serde_json::Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
    assert_eq!(body["type"], "rehydrate");
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], "r1");
}
