//! Raw hyper request dispatch. One listener serves both the public
//! ACME/reload surface and the admin/cluster inspection routes; nothing
//! here assumes a web framework.

use crate::server::state::AppState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::collections::HashMap;
use tracing::warn;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn json(status: u16, body: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body.to_string()))
        .unwrap()
}

fn text(status: u16, body: impl Into<String>) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(full_body(body.into()))
        .unwrap()
}

fn not_found() -> Response<BoxBody> {
    json(404, serde_json::json!({"error": "not found"}))
}

fn error_response(err: crate::error::ProxyCtlError) -> Response<BoxBody> {
    let status = crate::error::http_status(&err);
    json(status, serde_json::json!({"error": err.to_string()}))
}

fn query_params(req: &Request<Incoming>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| {
            q.split('&')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let k = parts.next()?;
                    let v = parts.next().unwrap_or("");
                    Some((k.to_string(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub async fn handle(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, p) if p.starts_with("/.well-known/acme-challenge/") => {
            let token = p.trim_start_matches("/.well-known/acme-challenge/");
            handle_challenge(&state, token).await
        }

        (&Method::GET, "/health" | "/healthz") => json(200, serde_json::json!({"status": "ok"})),

        (&Method::POST, "/reload") => handle_reload(&state, false).await,
        (&Method::POST, "/cluster/reload") => {
            let params = query_params(&req);
            let broadcast = params.get("broadcast").map(|v| v == "true").unwrap_or(false);
            handle_reload(&state, broadcast).await
        }

        (&Method::GET, "/cluster/nodes") => match state.cluster.get_all_nodes().await {
            Ok(nodes) => json(200, serde_json::json!(nodes)),
            Err(e) => error_response(e),
        },

        (&Method::GET, "/cluster/stats") => match state.cluster.get_stats().await {
            Ok(stats) => json(200, serde_json::json!(stats)),
            Err(e) => error_response(e),
        },

        (&Method::GET, "/cluster/leader") => match state.cluster.get_leader_node().await {
            Ok(Some(node)) => json(200, serde_json::json!(node)),
            Ok(None) => json(404, serde_json::json!({"error": "no leader"})),
            Err(e) => error_response(e),
        },

        (&Method::GET, "/cluster/leader/status") => json(
            200,
            serde_json::json!({"is_leader": state.lock.is_leader(), "instance_id": state.lock.instance_id()}),
        ),

        (&Method::POST, "/cluster/admin/cleanup") => match state.cluster.manual_cleanup().await {
            Ok(()) => json(200, serde_json::json!({"ok": true})),
            Err(e) => error_response(e),
        },

        (&Method::POST, "/cluster/admin/enforce-leader") => match state.cluster.manual_enforce_leader().await {
            Ok(()) => json(200, serde_json::json!({"ok": true})),
            Err(e) => error_response(e),
        },

        (&Method::POST, "/cluster/admin/ensure-leader") => match state.cluster.ensure_leader_exists().await {
            Ok(became_leader) => json(200, serde_json::json!({"became_leader": became_leader})),
            Err(e) => error_response(e),
        },

        (&Method::POST, "/cluster/admin/become-leader") => {
            json(200, serde_json::json!({"became_leader": state.cluster.try_become_leader().await}))
        }

        (&Method::GET, "/certificates") => match state.certs.list_with_status().await {
            Ok(certs) => json(200, serde_json::json!(certs)),
            Err(e) => error_response(e),
        },

        _ => not_found(),
    };

    Ok(response)
}

async fn handle_challenge(state: &AppState, token: &str) -> Response<BoxBody> {
    match state.challenges.lookup(token).await {
        Ok(Some(challenge)) => text(200, challenge.key_auth),
        Ok(None) => not_found(),
        Err(e) => {
            warn!("http: challenge lookup failed, token={}, error={}", token, e);
            error_response(e)
        }
    }
}

async fn handle_reload(state: &AppState, broadcast: bool) -> Response<BoxBody> {
    let outcome = state.fanout.reload(broadcast).await;
    let status = if outcome.ok { 200 } else { 500 };
    json(status, serde_json::json!(outcome))
}
