//! Structured quota denials.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

/// Why a request was denied. Denials are correct outcomes, not system failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuotaError {
    #[error("API key has expired on {}", expires_at.with_timezone(&Local).format("%Y-%m-%d"))]
    Expired { expires_at: DateTime<Utc> },

    #[error("Model '{requested_model}' is not allowed for this API key")]
    ModelNotAllowed {
        requested_model: String,
        allowed_models: Vec<String>,
    },

    #[error("Token limit exceeded. Used: {used} / Limit: {limit}")]
    TokenLimitExceeded { used: u64, limit: i64 },

    #[error("Cost limit exceeded. Used: ${used:.2} / Limit: ${limit:.2}")]
    CostLimitExceeded { used: f64, limit: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaErrorKind {
    Expired,
    ModelNotAllowed,
    TokenLimitExceeded,
    CostLimitExceeded,
}

impl QuotaErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired => "api_key_expired",
            Self::ModelNotAllowed => "model_not_allowed",
            Self::TokenLimitExceeded => "token_limit_exceeded",
            Self::CostLimitExceeded => "cost_limit_exceeded",
        }
    }

    /// Response category a transport layer groups this denial under.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Expired => "authentication_error",
            Self::ModelNotAllowed => "permission_error",
            Self::TokenLimitExceeded | Self::CostLimitExceeded => "quota_exceeded",
        }
    }

    /// Suggested HTTP status. Mapping is up to the caller.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Expired => 401,
            _ => 403,
        }
    }
}

impl std::fmt::Display for QuotaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Wire shape of a denial: `{type, code, message, details}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl QuotaError {
    pub fn kind(&self) -> QuotaErrorKind {
        match self {
            Self::Expired { .. } => QuotaErrorKind::Expired,
            Self::ModelNotAllowed { .. } => QuotaErrorKind::ModelNotAllowed,
            Self::TokenLimitExceeded { .. } => QuotaErrorKind::TokenLimitExceeded,
            Self::CostLimitExceeded { .. } => QuotaErrorKind::CostLimitExceeded,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn error_type(&self) -> &'static str {
        self.kind().error_type()
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// The offending values, enough to render a message without re-reading state.
    pub fn details(&self) -> Value {
        match self {
            Self::Expired { expires_at } => json!({
                "expires_at": expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
            Self::ModelNotAllowed {
                requested_model,
                allowed_models,
            } => json!({
                "requested_model": requested_model,
                "allowed_models": allowed_models,
            }),
            Self::TokenLimitExceeded { used, limit } => json!({
                "used_tokens": used,
                "max_tokens": limit,
            }),
            Self::CostLimitExceeded { used, limit } => json!({
                "used_cost_usd": used,
                "max_cost_usd": limit,
            }),
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error_type: self.error_type(),
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

impl Serialize for QuotaError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_payload().serialize(serializer)
    }
}
