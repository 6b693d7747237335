//! Home-server error bodies.
//!
//! Failed Matrix client-server calls answer with
//! `{ "errcode": "M_...", "error": "human readable" }`.

use serde::{Deserialize, Serialize};
use vx_core::error::VxError;

/// Standard Matrix error envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixError {
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MatrixError {
    pub const NOT_FOUND: &'static str = "M_NOT_FOUND";

    /// Parse an error body; anything unparsable becomes the message.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            errcode: None,
            error: (!body.trim().is_empty()).then(|| body.trim().to_string()),
        })
    }

    pub fn is_not_found(&self) -> bool {
        self.errcode.as_deref() == Some(Self::NOT_FOUND)
    }

    /// Map a non-success status and its body onto a [`VxError`].
    pub fn into_error(self, status: u16) -> VxError {
        let message = self.error.clone().unwrap_or_else(|| format!("status {status}"));
        if status == 404 || self.is_not_found() {
            return VxError::NotFound(message);
        }
        if status == 401 || status == 403 {
            return VxError::AuthFailed(message);
        }
        VxError::ServerError {
            status,
            errcode: self.errcode,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_core::error::ErrorClass;

    #[test]
    fn test_parse_matrix_error() {
        let err = MatrixError::from_body(r#"{"errcode":"M_UNKNOWN","error":"boom"}"#);
        assert_eq!(err.errcode.as_deref(), Some("M_UNKNOWN"));
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_plain_text_body() {
        let err = MatrixError::from_body("Bad Gateway");
        assert_eq!(err.errcode, None);
        assert_eq!(err.error.as_deref(), Some("Bad Gateway"));
    }

    #[test]
    fn test_not_found_by_status_or_errcode() {
        assert!(matches!(MatrixError::default().into_error(404), VxError::NotFound(_)));
        let by_code = MatrixError::from_body(r#"{"errcode":"M_NOT_FOUND"}"#);
        assert_eq!(by_code.into_error(400).class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_server_error_keeps_errcode() {
        let err = MatrixError::from_body(r#"{"errcode":"M_LIMIT_EXCEEDED","error":"slow down"}"#)
            .into_error(429);
        match err {
            VxError::ServerError { status, errcode, .. } => {
                assert_eq!(status, 429);
                assert_eq!(errcode.as_deref(), Some("M_LIMIT_EXCEEDED"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_auth_failure() {
        assert!(matches!(MatrixError::default().into_error(401), VxError::AuthFailed(_)));
    }
}
