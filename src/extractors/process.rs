//! Caller-supplied process id, forwarded to post-processing.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const PROCESS_ID_HEADER: &str = "X-Process-ID";

/// Optional process id from the `X-Process-ID` header. Blank values count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessId(pub Option<String>);

impl ProcessId {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ProcessId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(PROCESS_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ProcessId(value))
    }
}
