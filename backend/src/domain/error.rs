//! Domain-level error types.
//!
//! These errors are transport agnostic. Inbound adapters map them to HTTP
//! responses, WebSocket frames, or any other protocol-specific envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// The requested ride does not exist.
    NotFound,
    /// Another driver won the acceptance race; the ride is no longer open.
    AlreadyTaken,
    /// The ride is not in the accepted state (or belongs to another driver).
    NotAccepted,
    /// The ride is not in the ongoing state (or belongs to another driver).
    NotOngoing,
    /// The supplied one-time code does not match.
    InvalidOtp,
    /// The one-time code expired before the ride was started.
    OtpExpired,
    /// The one-time code attempt ceiling was reached; the ride must be
    /// re-requested.
    OtpExhausted,
    /// A location sample carried out-of-range coordinates.
    InvalidLocation,
    /// The route/fare provider could not be reached; no fare is fabricated.
    UpstreamUnavailable,
    /// An unexpected error occurred inside the domain.
    InternalError,
}

/// Domain error payload carried from services to inbound adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainError {
    #[schema(example = "already_taken")]
    code: ErrorCode,
    #[schema(example = "ride is no longer available")]
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl DomainError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details for the client (never the OTP itself).
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary structured details, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Malformed or missing input.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Unknown ride identifier.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Lost the acceptance race.
    pub fn already_taken(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyTaken, message)
    }

    /// Wrong-state transition attempt against an accepted ride.
    pub fn not_accepted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotAccepted, message)
    }

    /// Wrong-state transition attempt against an ongoing ride.
    pub fn not_ongoing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotOngoing, message)
    }

    /// One-time code mismatch.
    pub fn invalid_otp(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOtp, message)
    }

    /// One-time code past its expiry.
    pub fn otp_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OtpExpired, message)
    }

    /// One-time code attempt ceiling reached.
    pub fn otp_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OtpExhausted, message)
    }

    /// Out-of-range coordinates.
    pub fn invalid_location(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidLocation, message)
    }

    /// Route/fare provider failure.
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, message)
    }

    /// Unexpected internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for DomainError {}
