use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Rule parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid transition for campaign {campaign_id}: {from} -> {to} ({reason})")]
    InvalidTransition {
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        reason: String,
    },

    #[error("Audience resolution error: {0}")]
    Resolution(String),

    #[error("Campaign {0} not found")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failure to turn rule text into a segment rule. Token-level variants carry
/// the offending token and its byte offset in the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("rule text is empty")]
    Empty,

    #[error("unknown field '{token}' at position {position}")]
    UnknownField { token: String, position: usize },

    #[error("unknown operator '{token}' at position {position}")]
    UnknownOperator { token: String, position: usize },

    #[error("operator '{token}' cannot be applied to field '{field}' at position {position}")]
    UnsupportedOperator {
        field: String,
        token: String,
        position: usize,
    },

    #[error("literal '{token}' at position {position} does not match field '{field}' (expected {expected})")]
    TypeMismatch {
        field: String,
        token: String,
        expected: String,
        position: usize,
    },

    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("unexpected end of rule, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("rule nesting exceeds the maximum depth of {max}")]
    TooDeep { max: usize },
}

impl ParseError {
    /// The offending token, when the error points at one.
    pub fn token(&self) -> Option<&str> {
        match self {
            ParseError::UnknownField { token, .. }
            | ParseError::UnknownOperator { token, .. }
            | ParseError::UnsupportedOperator { token, .. }
            | ParseError::TypeMismatch { token, .. }
            | ParseError::UnexpectedToken { token, .. } => Some(token),
            _ => None,
        }
    }
}
