//! The unit of storage: one proxied HTTP exchange.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::llm::LlmMetadata;

/// How a body preview was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    /// Parsed as JSON and redacted before truncation.
    Json,
    /// Raw text, truncated. Also the fallback when a body claims JSON but
    /// fails to parse.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Arrival time, milliseconds since epoch.
    pub ts: i64,
    pub method: String,
    /// Absolute target URL the request was forwarded to.
    pub url: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Redacted header map.
    pub headers: HashMap<String, String>,
    /// True wire length, independent of preview truncation.
    pub body_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    /// Completion time, milliseconds since epoch.
    pub ts: i64,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyKind>,
    /// Completion minus arrival, milliseconds.
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    #[serde(rename = "req")]
    pub request: CapturedRequest,
    /// Absent until the upstream completes; attached exactly once.
    #[serde(rename = "res", default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl CaptureRecord {
    pub fn new(id: String, request: CapturedRequest) -> Self {
        Self {
            id,
            request,
            response: None,
            llm: None,
            session_id: None,
            correlation_id: None,
            user_id: None,
        }
    }
}

/// Conjunctive filter for [`CaptureStore::list`](super::CaptureStore::list).
/// Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Method set membership (e.g. GET, POST).
    pub methods: Option<Vec<String>>,
    /// Status set membership; only applied to records with a response.
    pub statuses: Option<Vec<u16>>,
    /// Substring match on path.
    pub path_includes: Option<String>,
    /// Case-insensitive substring over path + both body previews.
    pub search: Option<String>,
    /// Minimum arrival timestamp, milliseconds since epoch.
    pub since_ts: Option<i64>,
}

impl CaptureRecord {
    pub fn matches(&self, filter: &ListFilter) -> bool {
        if let Some(since) = filter.since_ts {
            if self.request.ts < since {
                return false;
            }
        }
        if let Some(methods) = &filter.methods {
            if !methods.iter().any(|m| m.eq_ignore_ascii_case(&self.request.method)) {
                return false;
            }
        }
        if let Some(statuses) = &filter.statuses {
            if let Some(res) = &self.response {
                if !statuses.contains(&res.status) {
                    return false;
                }
            }
        }
        if let Some(fragment) = &filter.path_includes {
            if !self.request.path.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &filter.search {
            let haystack = format!(
                "{} {} {}",
                self.request.path,
                self.request.body_preview.as_deref().unwrap_or(""),
                self.response
                    .as_ref()
                    .and_then(|r| r.body_preview.as_deref())
                    .unwrap_or("")
            )
            .to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(method: &str, path: &str, status: Option<u16>) -> CaptureRecord {
        let mut rec = CaptureRecord::new(
            "test-id".to_string(),
            CapturedRequest {
                ts: 1000,
                method: method.to_string(),
                url: format!("http://upstream{path}"),
                path: path.to_string(),
                query: None,
                headers: HashMap::new(),
                body_bytes: 0,
                body_preview: Some("{\"prompt\":\"hello\"}".to_string()),
                encoding: Some(BodyKind::Json),
            },
        );
        rec.response = status.map(|status| CapturedResponse {
            ts: 1050,
            status,
            headers: HashMap::new(),
            body_bytes: 0,
            body_preview: None,
            encoding: None,
            duration_ms: 50,
        });
        rec
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(record("GET", "/a", None).matches(&ListFilter::default()));
    }

    #[test]
    fn test_method_filter() {
        let filter = ListFilter {
            methods: Some(vec!["POST".to_string()]),
            ..Default::default()
        };
        assert!(record("POST", "/a", None).matches(&filter));
        assert!(record("post", "/a", None).matches(&filter));
        assert!(!record("GET", "/a", None).matches(&filter));
    }

    #[test]
    fn test_status_filter_skips_pending_records() {
        let filter = ListFilter {
            statuses: Some(vec![200]),
            ..Default::default()
        };
        assert!(record("GET", "/a", Some(200)).matches(&filter));
        assert!(!record("GET", "/a", Some(404)).matches(&filter));
        // In-flight records have no status to reject on.
        assert!(record("GET", "/a", None).matches(&filter));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let filter = ListFilter {
            search: Some("HELLO".to_string()),
            ..Default::default()
        };
        assert!(record("GET", "/a", None).matches(&filter));

        let filter = ListFilter {
            search: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(!record("GET", "/a", None).matches(&filter));
    }

    #[test]
    fn test_since_ts() {
        let filter = ListFilter {
            since_ts: Some(2000),
            ..Default::default()
        };
        assert!(!record("GET", "/a", None).matches(&filter));
    }
}
