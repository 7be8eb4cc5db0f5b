//! Type definitions for the Auth Server
//!
//! Request/response bodies and the error codes the API returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use zk_auth_verifier::{CircuitId, ExtractedToken};

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Message could not be parsed or has the wrong shape
    MalformedMessage,
    /// A scope entry failed verification
    Rejected,
    /// State registry could not be read; retry later
    StateUnavailable,
}

impl ErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StateUnavailable)
    }
}

// ==================== Request Types ====================

/// Verification request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Authorization response or credential fetch request
    pub message: Value,
    /// Originating authorization request; its rules are enforced when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
}

/// Request carrying a single message, for extraction and request validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: Value,
}

// ==================== Response Types ====================

/// Where and why verification failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Scope index of the rejected entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_id: Option<String>,
    /// Query rule that failed, for query violations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub retryable: bool,
}

/// Verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub request_id: String,
    pub valid: bool,
    pub tokens: Vec<ExtractedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub verified_at: DateTime<Utc>,
}

/// Error envelope for endpoints without a verification verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Metadata extraction result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub tokens: Vec<ExtractedToken>,
}

/// Authorization request validation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status
    pub status: String,
    /// Server version
    pub version: String,
}

/// Detailed status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub supported_circuits: Vec<CircuitId>,
    pub total_verified: u64,
    pub total_rejected: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}
