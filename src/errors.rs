use sqlx::Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited by external provider")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
}

impl AppError {
    /// Whether this error is worth retrying with backoff.
    ///
    /// Transient: rate limits, pool/connection trouble, network and timeout
    /// signatures. Everything else (validation, malformed data, missing rows)
    /// is permanent and fails fast after a single confirmation attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::RateLimited => true,
            AppError::Db(e) => is_transient_db(e),
            AppError::External(msg) => has_transient_signature(msg),
            AppError::Validation(_) | AppError::NotFound(_) => false,
        }
    }

    pub fn classification(&self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Coarse error class recorded on every executed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

fn is_transient_db(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            // Postgres serialization / deadlock / lock-not-available codes
            matches!(
                db.code().as_deref(),
                Some("40001") | Some("40P01") | Some("55P03")
            )
        }
        _ => false,
    }
}

fn has_transient_signature(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    [
        "timeout",
        "timed out",
        "connection",
        "network",
        "rate limit",
        "too many requests",
        "429",
        "502",
        "503",
        "lock",
        "temporarily",
    ]
    .iter()
    .any(|sig| m.contains(sig))
}

impl From<sqlx::Error> for AppError {
    fn from(value: Error) -> Self {
        AppError::Db(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_transient() {
        assert!(AppError::RateLimited.is_transient());
    }

    #[test]
    fn test_validation_is_permanent() {
        let err = AppError::Validation("bad symbol".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.classification(), ErrorClass::Permanent);
    }

    #[test]
    fn test_external_timeout_signature_is_transient() {
        let err = AppError::External("request timed out after 30s".to_string());
        assert!(err.is_transient());
    }

    #[test]
    fn test_external_parse_error_is_permanent() {
        let err = AppError::External("unexpected field in provider payload".to_string());
        assert!(!err.is_transient());
    }
}
