//! Upstream call failures, classified by what the caller may do about them.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 404/410: upstream confirms the resource does not exist. Never retried.
    #[error("HTTP {status} not found: {url}")]
    NotFound { status: u16, url: String },

    /// 400: the request itself is malformed. Never retried.
    #[error("HTTP 400 bad request: {url}: {body}")]
    BadRequest { url: String, body: String },

    /// Rate limiting, server or network failures that outlived the retry ceiling
    #[error("GET failed after {attempts} attempts: {url}: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// Retrying later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
