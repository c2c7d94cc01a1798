//! Microsoft Graph API access with a bearer token.

use crate::auth::oauth::transport_error;
use crate::error::AuthError;
use serde_json::Value;
use tracing::{debug, warn};

/// GET `url` with `access_token` and return the JSON body.
pub async fn get_json(
    http_client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<Value, AuthError> {
    debug!(url, "Graph GET");

    let response = http_client
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| transport_error(e, AuthError::GraphRequestFailed))?;

    match response.status().as_u16() {
        200 => response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string())),
        401 => Err(AuthError::Unauthorized),
        403 => Err(AuthError::Forbidden),
        429 => Err(AuthError::RateLimited),
        // Don't expose raw API error details - just log status code
        status => {
            warn!(url, status, "Graph request failed");
            Err(AuthError::GraphRequestFailed(format!("HTTP {}", status)))
        }
    }
}
