use http::StatusCode;
use std::io;
use usersync::{SyncError, SyncErrorKind};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("invalid request path: {0}")]
    InvalidPath(String),
    #[error("upstream configuration error: {0}")]
    InvalidUpstream(String),
    #[error("failed to read request body: {0}")]
    RequestBody(String),
    #[error("upstream request failed: {0}")]
    UpstreamRequestFailed(#[from] hyper_util::client::legacy::Error),
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(std::time::Duration),
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),
}

impl ProxyError {
    /// Status answered to the client when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamRequestFailed(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Sync(e) => match e.kind() {
                SyncErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                SyncErrorKind::NotFound | SyncErrorKind::Storage => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                SyncErrorKind::Network | SyncErrorKind::Protocol => StatusCode::BAD_GATEWAY,
            },
            ProxyError::Io(_)
            | ProxyError::Hyper(_)
            | ProxyError::InvalidUpstream(_)
            | ProxyError::RequestBody(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
