//! Error types for the teams-sso crate.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("User sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No pending authorization state in session")]
    MissingState,

    #[error("State validation failed (possible CSRF attack)")]
    StateMismatch,

    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,

    #[error("Identity provider request timed out")]
    Timeout,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to serialize session value '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Local user persistence errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Profile has no userPrincipalName")]
    MissingPrincipalName,

    #[error("Failed to parse users file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for failures caused by the caller's request rather than the provider.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingState | Self::StateMismatch | Self::InvalidAuthCode | Self::OAuthFailed(_)
        )
    }
}

impl AppError {
    /// Returns a user-friendly message for display in the response body.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::MissingState) | Self::Auth(AuthError::StateMismatch) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::OAuthFailed(_)) => "Sign-in failed. Please try again.",
            Self::Auth(AuthError::InvalidAuthCode) => "Sign-in response was incomplete.",
            Self::Auth(AuthError::TokenExchangeFailed(_)) => "Sign-in failed. Please try again.",
            Self::Auth(AuthError::TokenRefreshFailed(_)) | Self::Auth(AuthError::Unauthorized) => {
                "Session expired. Please sign in again."
            }
            Self::Auth(AuthError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Auth(AuthError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Auth(AuthError::Timeout) => "Microsoft did not respond in time. Please retry.",
            Self::Sync(SyncError::MissingPrincipalName) => {
                "Your Microsoft account has no principal name."
            }
            _ => "An error occurred. Please try again.",
        }
    }

    /// HTTP status to answer with when this error ends a request.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth(e) if e.is_client_error() => 400,
            Self::Auth(AuthError::RateLimited) => 429,
            Self::Auth(AuthError::Timeout) => 504,
            _ => 500,
        }
    }
}
