//! Session/correlation/user tagging for cross-request flow grouping.
//!
//! Derivation reads the original (unredacted) request headers, since the
//! cookie header is already scrubbed by the time a record is stored.

use warp::http::HeaderMap;

/// Conventional header names checked in order; the first present wins. The
/// precedence is fixed rather than derived, so clients relying on one name
/// over another keep seeing the same grouping.
const SESSION_HEADERS: [&str; 2] = ["x-session-id", "x-session"];
const CORRELATION_HEADERS: [&str; 3] = ["x-correlation-id", "x-request-id", "x-trace-id"];
const USER_HEADERS: [&str; 2] = ["x-user-id", "x-user"];

const SESSION_COOKIE: &str = "session_id";
const USER_COOKIE: &str = "user_id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowTags {
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
}

impl FlowTags {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            session_id: first_header(headers, &SESSION_HEADERS)
                .or_else(|| cookie_value(headers, SESSION_COOKIE)),
            correlation_id: first_header(headers, &CORRELATION_HEADERS),
            user_id: first_header(headers, &USER_HEADERS)
                .or_else(|| cookie_value(headers, USER_COOKIE)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.correlation_id.is_none() && self.user_id.is_none()
    }
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    // A present but unreadable value falls through to the next name.
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|value| value.to_str().ok()))
        .map(str::to_string)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
