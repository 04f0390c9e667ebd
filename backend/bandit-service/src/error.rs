use thiserror::Error;

pub type Result<T> = std::result::Result<T, BanditError>;

/// Failures of the Arm Store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted instance record: {0}")]
    Corrupted(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        // Data errors come from the record itself, not from the writer.
        if err.is_data() {
            StoreError::Corrupted(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}

/// Engine-level error taxonomy exposed by the manager.
#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Bandit not initialized: {0}")]
    NotFound(String),

    #[error("Unknown arm {arm} in {key}")]
    UnknownArm { key: String, arm: String },

    #[error("Invalid reward: {0}")]
    InvalidReward(f64),

    #[error("Contention on {key} after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid instance: {0}")]
    InvalidInstance(String),

    #[error("Instance {key} has {arms} arms, minimum is {minimum}")]
    InsufficientArms {
        key: String,
        arms: usize,
        minimum: usize,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How the HTTP boundary should surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    BadRequest,
    Retryable,
    Internal,
}

impl BanditError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            BanditError::NotFound(_)
            | BanditError::InsufficientArms { .. }
            | BanditError::Configuration(_) => ErrorClass::Configuration,
            BanditError::UnknownArm { .. } | BanditError::InvalidReward(_) => {
                ErrorClass::BadRequest
            }
            BanditError::Contention { .. } | BanditError::StoreUnavailable(_) => {
                ErrorClass::Retryable
            }
            BanditError::InvalidInstance(_) | BanditError::Serialization(_) => {
                ErrorClass::Internal
            }
        }
    }
}

impl From<StoreError> for BanditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => BanditError::NotFound(key),
            // Only reachable when a conflict escapes the retry loop.
            StoreError::VersionConflict { key, .. } => BanditError::Contention { key, attempts: 1 },
            StoreError::Unavailable(msg) => BanditError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => BanditError::Serialization(msg),
            StoreError::Corrupted(msg) => BanditError::InvalidInstance(msg),
        }
    }
}

impl From<serde_json::Error> for BanditError {
    fn from(err: serde_json::Error) -> Self {
        BanditError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_match_http_mapping() {
        assert_eq!(
            BanditError::NotFound("zbmath".into()).kind(),
            ErrorClass::Configuration
        );
        assert_eq!(
            BanditError::UnknownArm {
                key: "zbmath".into(),
                arm: "x".into()
            }
            .kind(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            BanditError::InvalidReward(f64::NAN).kind(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            BanditError::Contention {
                key: "zbmath".into(),
                attempts: 3
            }
            .kind(),
            ErrorClass::Retryable
        );
        assert_eq!(
            BanditError::StoreUnavailable("timeout".into()).kind(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: BanditError = StoreError::NotFound("energy".into()).into();
        assert!(matches!(err, BanditError::NotFound(key) if key == "energy"));
    }

    #[test]
    fn test_malformed_json_is_corrupted() {
        let json_err = serde_json::from_str::<Vec<u64>>("[1, \"two\"]").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }
}
