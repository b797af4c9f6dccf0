use serde::{Deserialize, Serialize};

/// Error envelope a failing service may return in place of a result.
/// The code is passed through as sent; it is only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    /// Best-effort decode of a failed response body.
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_envelope_with_or_without_code() {
        assert_eq!(
            ApiError::from_body(r#"{"code":"rate_limited","message":"slow down"}"#),
            Some(ApiError {
                code: Some("rate_limited".to_string()),
                message: "slow down".to_string(),
            })
        );
        assert_eq!(
            ApiError::from_body(r#"{"message":"short and stout"}"#),
            Some(ApiError {
                code: None,
                message: "short and stout".to_string(),
            })
        );
        assert_eq!(ApiError::from_body("<html>bad gateway</html>"), None);
    }
}
