//! HTTP surface for `http` and `https` endpoints.
//!
//! Every request is routed by path through the bind group's [`Dispatcher`]:
//! - `POST <path>` with `{"action": ..., "body": ...}` invokes an operation
//! - `GET <metadata path>` returns the service description

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{body::Bytes, Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use super::dispatch::{Dispatcher, Route, WireReply};
use super::metadata::GET_ACTION;

#[derive(Debug, Deserialize)]
struct HttpRequest {
    action: String,
    #[serde(default)]
    body: Value,
}

/// Builds the router serving one bind group.
pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn handle_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path();

    if method == Method::GET {
        return match dispatcher.route(path) {
            Some(Route::Metadata) | None => {
                reply(dispatcher.dispatch(Some(path), GET_ACTION, Value::Null))
            }
            Some(Route::Service { .. }) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let reply_body = match serde_json::from_slice::<HttpRequest>(&body) {
        Ok(request) => dispatcher.dispatch(Some(path), &request.action, request.body),
        Err(e) => dispatcher.reject(format!("malformed request: {e}")),
    };
    reply(reply_body)
}

fn reply(reply: WireReply) -> Response {
    let status = if reply.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(reply)).into_response()
}
