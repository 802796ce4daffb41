use thiserror::Error;

/// The error kinds the conversation loop relies on. Raw HTTP/transport
/// errors are classified into one of these at the provider boundary and
/// never travel further.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider does not support {0}")]
    UnsupportedCapability(&'static str),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Classify an HTTP status + body into a typed error.
    pub fn from_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(truncate(body)),
            408 => ProviderError::Timeout,
            429 => ProviderError::RateLimit {
                retry_after_ms: retry_after_ms.unwrap_or(5_000),
            },
            400 | 404 | 413 | 422 => ProviderError::BadRequest(truncate(body)),
            _ => ProviderError::Unavailable(format!("HTTP {status}: {}", truncate(body))),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Unavailable(format!("connect failed: {err}"))
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key", None),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, "malformed", None),
            ProviderError::BadRequest(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down", Some(1200)),
            ProviderError::RateLimit {
                retry_after_ms: 1200
            }
        ));
        assert!(matches!(
            ProviderError::from_status(503, "overloaded", None),
            ProviderError::Unavailable(_)
        ));
    }
}
