//! Verification and metadata extraction endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use zk_auth_verifier::{DispatchError, ExtractedToken, Message, MessageType, VerificationError};

use crate::state::AppState;
use crate::types::{
    ErrorBody, ErrorCode, ErrorResponse, ExtractResponse, MessageRequest, ValidateResponse,
    VerifyRequest, VerifyResponse,
};

/// Create verification routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/verify", post(verify_auth))
        .route("/auth/extract", post(extract))
        .route("/auth/request/validate", post(validate_request))
        .route("/credentials/verify", post(verify_credential_fetch))
}

/// Map a dispatch failure to its HTTP status and error body.
pub fn error_body(err: &DispatchError) -> (StatusCode, ErrorBody) {
    let mut body = ErrorBody {
        code: ErrorCode::Rejected,
        message: err.to_string(),
        scope_index: None,
        circuit_id: None,
        rule: None,
        retryable: false,
    };
    let status = match err {
        DispatchError::Malformed(_) => {
            body.code = ErrorCode::MalformedMessage;
            StatusCode::BAD_REQUEST
        }
        DispatchError::Rejected {
            index,
            circuit_id,
            source,
        } => {
            body.scope_index = Some(*index);
            body.circuit_id = Some(circuit_id.clone());
            match source {
                VerificationError::State(state) if state.is_retryable() => {
                    body.code = ErrorCode::StateUnavailable;
                    StatusCode::SERVICE_UNAVAILABLE
                }
                VerificationError::Query(violation) => {
                    body.rule = Some(violation.rule().to_string());
                    StatusCode::OK
                }
                _ => StatusCode::OK,
            }
        }
    };
    body.retryable = body.code.is_retryable();
    (status, body)
}

fn malformed(reason: impl std::fmt::Display) -> DispatchError {
    DispatchError::Malformed(reason.to_string())
}

fn verdict(state: &AppState, result: Result<Vec<ExtractedToken>, DispatchError>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match result {
        Ok(tokens) => {
            state.record_verified();
            info!(%request_id, tokens = tokens.len(), "message verified");
            let response = VerifyResponse {
                request_id,
                valid: true,
                tokens,
                error: None,
                verified_at: Utc::now(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            state.record_rejected();
            let (status, body) = error_body(&err);
            warn!(%request_id, code = ?body.code, error = %err, "message not verified");
            let response = VerifyResponse {
                request_id,
                valid: false,
                tokens: Vec::new(),
                error: Some(body),
                verified_at: Utc::now(),
            };
            (status, Json(response)).into_response()
        }
    }
}

fn parse_body(
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<(Message, Option<Message>), DispatchError> {
    let Json(body) = body.map_err(|e| malformed(e.body_text()))?;
    let message = Message::from_value(&body.message)?;
    let request = body
        .request
        .as_ref()
        .map(Message::from_value)
        .transpose()?;
    Ok((message, request))
}

/// Verify an authorization response
/// POST /api/v1/auth/verify
#[instrument(skip(state, body))]
async fn verify_auth(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let result = match parse_body(body) {
        Ok((message, request)) => {
            state
                .dispatcher()
                .verify(&message, request.as_ref(), &state.context())
                .await
        }
        Err(err) => Err(err),
    };
    verdict(&state, result)
}

/// Verify the proofs attached to a credential fetch request
/// POST /api/v1/credentials/verify
#[instrument(skip(state, body))]
async fn verify_credential_fetch(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let result = match parse_body(body) {
        Ok((message, _)) if message.message_type() != MessageType::CredentialFetchRequest => {
            Err(malformed(format!(
                "expected a credential fetch request, got {}",
                message.message_type()
            )))
        }
        Ok((message, request)) => {
            state
                .dispatcher()
                .verify(&message, request.as_ref(), &state.context())
                .await
        }
        Err(err) => Err(err),
    };
    verdict(&state, result)
}

/// Failure of an endpoint that returns no verdict. A scope rejection there
/// means the message itself cannot be processed.
fn unprocessable(err: &DispatchError) -> Response {
    let (status, error) = error_body(err);
    let status = if status == StatusCode::OK {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        status
    };
    (status, Json(ErrorResponse { error })).into_response()
}

fn parse_message(body: Result<Json<MessageRequest>, JsonRejection>) -> Result<Message, DispatchError> {
    let Json(body) = body.map_err(|e| malformed(e.body_text()))?;
    Message::from_value(&body.message)
}

/// Decode proofs and return their metadata without verifying them
/// POST /api/v1/auth/extract
#[instrument(skip(state, body))]
async fn extract(
    State(state): State<AppState>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    match parse_message(body).and_then(|message| state.dispatcher().extract_metadata(&message)) {
        Ok(tokens) => (StatusCode::OK, Json(ExtractResponse { tokens })).into_response(),
        Err(err) => unprocessable(&err),
    }
}

/// Check an authorization request before it is sent to a holder
/// POST /api/v1/auth/request/validate
#[instrument(skip(state, body))]
async fn validate_request(
    State(state): State<AppState>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    match parse_message(body).and_then(|message| state.dispatcher().validate_request(&message)) {
        Ok(()) => (StatusCode::OK, Json(ValidateResponse { valid: true })).into_response(),
        Err(err) => unprocessable(&err),
    }
}
