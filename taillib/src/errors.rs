use crate::types::Port;
use std::{io, result};
use thiserror::Error;

/// Failure talking to the CI provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Expected to clear with time: network hiccups, rate limiting, 5xx.
    #[error("transient api error: {0}")]
    Transient(String),
    /// Retrying will not help: bad credentials, missing run, garbage body.
    #[error("api error: {0}")]
    Fatal(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum TailError {
    #[error("retries exceeded in '{0}'")]
    RetriesExceeded(&'static str),
    #[error("proxy didn't go live")]
    ProxyNotLive,
    #[error("proxy exited")]
    ProxyExited,
    #[error(
        "found multiple active runs for commit '{sha}':\n\t{}\ntry narrowing down by workflow name (--workflow) or ref name (--ref-name)",
        .urls.join("\n\t")
    )]
    AmbiguousRun { sha: String, urls: Vec<String> },
    #[error("GitHub requested OTP authentication, but no OTP token was provided")]
    OtpRequired,
    #[error("timed out waiting for '{0}'")]
    SelectorTimeout(String),
    #[error("browser: {0}")]
    Browser(String),
    #[error("no free port in {min}..={max}")]
    NoFreePort { min: Port, max: Port },
    #[error("git: {0}")]
    Git(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = result::Result<T, TailError>;
