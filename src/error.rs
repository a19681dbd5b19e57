use thiserror::Error;

/// Errors raised while building a limiter or loading a policy.
///
/// Limiter operations themselves never fail; only construction does.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    #[error("Policy parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err: ThrottlerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("Policy parse error"));
    }

    #[test]
    fn test_from_validation_errors() {
        use crate::config::BucketConfig;
        use std::time::Duration;
        use validator::Validate;

        let errors = BucketConfig::new(0, Duration::from_secs(1)).validate().unwrap_err();

        let err: ThrottlerError = errors.into();
        assert!(matches!(err, ThrottlerError::InvalidConfig(_)));
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
