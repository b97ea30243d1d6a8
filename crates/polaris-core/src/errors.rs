use std::time::Duration;

/// Failures of a model call.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("gateway returned {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// What a caller should do after a failed model call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Retrying cannot help.
    Fatal,
    /// Transient. Carries the gateway's own back-off hint when it sent one.
    Retry { after: Option<Duration> },
    /// The caller gave up on the call.
    Abandoned,
}

impl GatewayError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::MalformedResponse(_) => {
                Disposition::Fatal
            }
            Self::RateLimited { retry_after } => Disposition::Retry { after: *retry_after },
            Self::ServerError { .. } | Self::ProviderOverloaded | Self::NetworkError(_) | Self::Timeout(_) => {
                Disposition::Retry { after: None }
            }
            Self::Cancelled => Disposition::Abandoned,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition(), Disposition::Retry { .. })
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self.disposition() {
            Disposition::Retry { after } => after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status from the model gateway.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            408 | 504 => Self::ServerError { status, body },
            429 => Self::RateLimited { retry_after: None },
            529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
