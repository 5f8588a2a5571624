//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Outbox (listing and create-and-send)
//! - Individual activities

use axum::body::Bytes;
use axum::{
    Router,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::Value;

use crate::AppState;
use crate::auth::ApiClient;
use crate::error::AppError;
use crate::federation::InboundRequest;
use crate::service::{ActivityDraft, InboxReceipt, OUTBOX_PAGE_SIZE};

const ACTIVITY_JSON: &str = "application/activity+json";

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:username - Actor profile
/// - POST /users/:username/inbox - Personal inbox
/// - POST /inbox - Shared inbox
/// - GET /users/:username/outbox - Outbox
/// - POST /users/:username/outbox - Create and send (bearer token)
/// - GET /users/:username/activities/:id - Single public activity
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/users/:username/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
        .route("/users/:username/outbox", get(outbox).post(send))
        .route("/users/:username/activities/:id", get(activity))
}

fn activity_json(document: Value) -> Response {
    ([(header::CONTENT_TYPE, ACTIVITY_JSON)], Json(document)).into_response()
}

/// GET /users/:username
///
/// Returns ActivityPub Actor document.
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let account = state.accounts.get_by_username(&username).await?;
    Ok(activity_json(state.accounts.actor_document(&account)))
}

/// POST /users/:username/inbox
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Verify username exists
/// 2. Verify HTTP Signature over the raw body
/// 3. Record the activity
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    state.accounts.get_by_username(&username).await?;
    receive(&state, &method, &uri, &headers, &body).await
}

/// POST /inbox
///
/// Shared inbox, same processing as the personal inbox.
async fn shared_inbox(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, &method, &uri, &headers, &body).await
}

async fn receive(
    state: &AppState,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    // The signed request target includes the query string.
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let receipt = state
        .inbox
        .receive(InboundRequest {
            method: method.as_str(),
            path,
            headers,
            body,
        })
        .await?;

    if receipt == InboxReceipt::Duplicate {
        tracing::debug!(path = %path, "Acknowledged repeated delivery");
    }
    Ok(StatusCode::ACCEPTED)
}

/// GET /users/:username/outbox
///
/// Returns the latest public activities as an OrderedCollection.
async fn outbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let (items, total) = state.outbox.list_public(&username, OUTBOX_PAGE_SIZE).await?;
    let uris = state.accounts.uris(&username);

    Ok(activity_json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": uris.outbox,
        "type": "OrderedCollection",
        "totalItems": total,
        "orderedItems": items,
    })))
}

/// POST /users/:username/outbox
///
/// Creates an activity from the submitted draft and delivers it.
/// Responds 201 with the new activity id in `Location` and the
/// per-target report as body.
async fn send(
    State(state): State<AppState>,
    Path(username): Path<String>,
    _client: ApiClient,
    Json(draft): Json<ActivityDraft>,
) -> Result<Response, AppError> {
    let report = state.outbox.create_and_send(&username, draft).await?;

    tracing::info!(
        activity = %report.activity_id,
        targets = report.deliveries.len(),
        delivered = report.delivered_count(),
        skipped = report.skipped_recipients.len(),
        "Outbox send finished"
    );

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, report.activity_id.clone())],
        Json(report),
    )
        .into_response())
}

/// GET /users/:username/activities/:id
async fn activity(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let activity_id = format!("{}/activities/{}", state.accounts.uris(&username).id, id);
    let activity = state.outbox.get_public(&activity_id).await?;

    let document = serde_json::to_value(activity).map_err(|e| AppError::Internal(e.into()))?;
    Ok(activity_json(document))
}
