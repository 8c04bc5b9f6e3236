//! Ticket command routes and the approval callback.
//!
//! - `POST /api/v1/tickets`                 create (or draft) a ticket
//! - `GET  /api/v1/tickets/{id}`            read a ticket
//! - `POST /api/v1/tickets/{id}/submit`     send a draft for approval
//! - `POST /api/v1/tickets/{id}/confirm`    destination-unit confirmation
//! - `POST /api/v1/tickets/{id}/approve`    final approval by an admin
//! - `POST /api/v1/tickets/{id}/cancel`     cancel a pending ticket
//! - `POST /api/v1/approvals/callback`      decision pushed by the approval service
//!
//! The caller is named by the `x-actor-id` header; authenticating it is left
//! to whatever sits in front of this service.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use equiptrack_core::{
    errors::{ApplicationError, InterfaceError},
    ApprovalCallback, CallbackOutcome, NewTicket, RequestContext, Ticket, TicketId, TicketService,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::dispatch::CALLBACK_PATH;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const CALLBACK_SECRET_HEADER: &str = "x-equiptrack-callback-secret";
const CALLBACK_ACTOR: &str = "approval-service";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<TicketService>,
    callback_secret: Option<SecretString>,
}

impl ApiState {
    pub fn new(service: Arc<TicketService>, callback_secret: Option<SecretString>) -> Self {
        Self { service, callback_secret }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/tickets", post(create_ticket))
        .route("/api/v1/tickets/{id}", get(get_ticket))
        .route("/api/v1/tickets/{id}/submit", post(submit_ticket))
        .route("/api/v1/tickets/{id}/confirm", post(confirm_ticket))
        .route("/api/v1/tickets/{id}/approve", post(approve_ticket))
        .route("/api/v1/tickets/{id}/cancel", post(cancel_ticket))
        .route(CALLBACK_PATH, post(approval_callback))
        .with_state(state)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()))
}

fn request_context(headers: &HeaderMap) -> ApiResult<RequestContext> {
    let correlation_id = correlation_id(headers);
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match actor {
        Some(actor) => Ok(RequestContext::new(actor, correlation_id)),
        None => Err(interface_error(InterfaceError::BadRequest {
            message: format!("missing `{ACTOR_HEADER}` header"),
            correlation_id,
        })),
    }
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "api.request_failed",
        correlation_id = %error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "request failed"
    );
    (
        status,
        Json(ApiError {
            error: error.user_message().to_string(),
            detail: error.message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

fn failed(ctx: &RequestContext) -> impl FnOnce(ApplicationError) -> (StatusCode, Json<ApiError>) {
    let correlation_id = ctx.correlation_id.clone();
    move |error| interface_error(error.into_interface(correlation_id))
}

async fn create_ticket(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewTicket>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.create(&ctx, body).await.map_err(failed(&ctx))?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Ticket>> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.ticket(&TicketId(id)).await.map_err(failed(&ctx))?;
    Ok(Json(ticket))
}

async fn submit_ticket(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Ticket>> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.submit(&ctx, &TicketId(id)).await.map_err(failed(&ctx))?;
    Ok(Json(ticket))
}

async fn confirm_ticket(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Ticket>> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.confirm(&ctx, &TicketId(id)).await.map_err(failed(&ctx))?;
    Ok(Json(ticket))
}

async fn approve_ticket(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Ticket>> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.approve(&ctx, &TicketId(id)).await.map_err(failed(&ctx))?;
    Ok(Json(ticket))
}

async fn cancel_ticket(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Ticket>> {
    let ctx = request_context(&headers)?;
    let ticket = state.service.cancel(&ctx, &TicketId(id)).await.map_err(failed(&ctx))?;
    Ok(Json(ticket))
}

async fn approval_callback(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ApprovalCallback>,
) -> ApiResult<Json<CallbackOutcome>> {
    let correlation_id = correlation_id(&headers);
    if let Some(secret) = &state.callback_secret {
        let provided = headers.get(CALLBACK_SECRET_HEADER).and_then(|value| value.to_str().ok());
        if !provided.is_some_and(|provided| secrets_match(provided, secret.expose_secret())) {
            warn!(
                event_name = "api.callback_unauthorized",
                correlation_id = %correlation_id,
                ticket_id = %body.ticket_id,
                "approval callback rejected: bad or missing secret"
            );
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError {
                    error: "Callback authentication failed.".to_string(),
                    detail: format!("invalid or missing `{CALLBACK_SECRET_HEADER}` header"),
                    correlation_id,
                }),
            ));
        }
    }

    let ctx = RequestContext::new(CALLBACK_ACTOR, correlation_id);
    let outcome = state.service.handle_callback(&ctx, &body).await.map_err(failed(&ctx))?;
    Ok(Json(outcome))
}

/// Compares digests so the time taken does not depend on where the inputs
/// first differ or on their lengths.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.iter().zip(expected.iter()).fold(0u8, |diff, (left, right)| diff | (left ^ right)) == 0
}
