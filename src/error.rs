//! Error types for the Openbank client.

use chrono::NaiveDate;
use thiserror::Error;

/// Openbank client errors.
#[derive(Error, Debug)]
pub enum BankError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid date in {field}: {value:?}")]
    DateParse { field: &'static str, value: String },

    #[error("Invalid amount in {field}: {value:?}")]
    AmountParse { field: &'static str, value: String },

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Server returned a SOAP fault: {0}")]
    ServerFault(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid date range: {from} is after {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BankError {
    /// Get the string code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::DateParse { .. } => "DATE_PARSE_ERROR",
            Self::AmountParse { .. } => "AMOUNT_PARSE_ERROR",
            Self::PreconditionViolation(_) => "PRECONDITION_VIOLATION",
            Self::ServerFault(_) => "SERVER_FAULT",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Shorthand for a [`BankError::MalformedResponse`].
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }
}

impl From<reqwest::Error> for BankError {
    fn from(e: reqwest::Error) -> Self {
        BankError::Transport(e.to_string())
    }
}

impl From<serde_yaml::Error> for BankError {
    fn from(e: serde_yaml::Error) -> Self {
        BankError::Config(e.to_string())
    }
}

/// Result alias used across the crate.
pub type BankResult<T> = Result<T, BankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BankError::AuthenticationFailed("bad password".into()).code(),
            "AUTHENTICATION_FAILED"
        );
        assert_eq!(BankError::malformed("truncated").code(), "MALFORMED_RESPONSE");
        assert_eq!(
            BankError::DateParse {
                field: "fechaValor",
                value: "31/12/2024".into()
            }
            .code(),
            "DATE_PARSE_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = BankError::AmountParse {
            field: "importe/IMPORTE",
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "Invalid amount in importe/IMPORTE: \"abc\"");

        let err = BankError::InvalidDateRange {
            from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid date range: 2024-03-01 is after 2024-02-01"
        );
    }
}
