use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use crate::error::{ConfigError, FlowLensError, Result};
use crate::proxy::forwarder;
use crate::state::AppState;

pub mod api;
pub mod ws;

#[cfg(test)]
mod api_tests;

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let addr: SocketAddr = addr.parse().map_err(|e| {
        FlowLensError::Config(ConfigError::Parse(format!("invalid listen address: {e}")))
    })?;

    tracing::info!(
        "listening on {} (upstream {})",
        addr,
        state.config.proxy.upstream
    );

    let routes = routes(state.clone());
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = state.shutdown_tx.subscribe().recv().await;
    });
    server.await;

    tracing::info!("server stopped");
    Ok(())
}

/// Full route set: dashboard API + WebSocket under `/api`, liveness at
/// `/health`, and the capture endpoint under `/proxy`.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_origin(state.config.events.dashboard_origin.as_str())
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["Content-Type"]);

    let api_routes = api::routes(state.clone()).with(cors);
    let ws_route = ws::route(state.clone());

    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "service": "flowlens"
        }))
    });

    health.or(ws_route).or(api_routes).or(proxy_route(state))
}

/// Any method, any path under `/proxy`; the remainder plus the query
/// string is the upstream-relative target.
fn proxy_route(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("proxy")
        .and(warp::method())
        .and(warp::path::tail())
        .and(
            warp::query::raw()
                .or(warp::any().map(String::new))
                .unify(),
        )
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and(with_state(state))
        .and_then(|method, tail, query, headers, body, state| async move {
            Ok::<_, warp::Rejection>(forwarder::handle(state, method, tail, query, headers, body).await)
        })
}

pub(crate) fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}
