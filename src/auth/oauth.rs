//! Azure AD v2 OAuth2 client (confidential web app, authorization code + PKCE).

use crate::auth::graph;
use crate::auth::token::{SecureString, Token, TokenResponse};
use crate::config::Config;
use crate::error::AuthError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (kept in the session, sent in token exchange).
    pub verifier: SecureString,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier_bytes: [u8; 32] = rand::thread_rng().gen();
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = Self::challenge_for(&verifier);

        Self {
            verifier: SecureString::new(verifier),
            challenge,
        }
    }

    /// challenge = BASE64URL(SHA256(verifier))
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random CSRF state value.
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Authorization redirect target plus the values that must survive until the callback.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub pkce_verifier: Option<SecureString>,
}

impl AuthorizationRequest {
    pub fn into_parts(self) -> (Url, PendingAuth) {
        (
            self.url,
            PendingAuth {
                state: self.state,
                pkce_verifier: self.pkce_verifier,
            },
        )
    }
}

/// Pending authorization stored in the session between redirect and callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuth {
    pub state: String,
    #[serde(default)]
    pub pkce_verifier: Option<SecureString>,
}

/// Query parameters of the callback leg.
///
/// Empty values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }

        params
    }

    /// True when the request looks like a redirect back from the identity provider.
    pub fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Identity provider operations the sign-in state machine depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the authorization URL with the configured scopes and a fresh state.
    fn authorization_url(&self) -> AuthorizationRequest;

    /// Exchange an authorization code for a token.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<Token, AuthError>;

    /// Exchange a refresh token for a new token.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Token, AuthError>;

    /// Authenticated GET returning the JSON body.
    async fn get_authenticated(
        &self,
        url: &str,
        token: &Token,
    ) -> Result<serde_json::Value, AuthError>;

    /// Graph endpoint for the signed-in user's profile.
    fn me_url(&self) -> String;
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    fn authorization_url(&self) -> AuthorizationRequest {
        (**self).authorization_url()
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<Token, AuthError> {
        (**self).exchange_code(code, pkce_verifier).await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Token, AuthError> {
        (**self).exchange_refresh_token(refresh_token).await
    }

    async fn get_authenticated(
        &self,
        url: &str,
        token: &Token,
    ) -> Result<serde_json::Value, AuthError> {
        (**self).get_authenticated(url, token).await
    }

    fn me_url(&self) -> String {
        (**self).me_url()
    }
}

/// OAuth2 client for Azure AD v2 endpoints.
pub struct AzureProvider {
    client_id: String,
    client_secret: SecureString,
    redirect_uri: String,
    scopes: Vec<String>,
    authorize_url: Url,
    token_url: String,
    me_url: String,
    http_client: reqwest::Client,
}

impl AzureProvider {
    /// Create a new provider from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: config.teams.app_id.clone(),
            client_secret: SecureString::new(config.teams.app_secret.clone()),
            redirect_uri: config.teams.app_redirect_uri.clone(),
            scopes: config.teams.app_scopes.clone(),
            authorize_url: Url::parse(&config.authorize_url())
                .context("Invalid authorization endpoint")?,
            token_url: config.token_url(),
            me_url: config.graph_me_url(),
            http_client,
        })
    }

    fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        fail: fn(String) -> AuthError,
    ) -> Result<Token, AuthError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(e, fail))?;

        let status = response.status();
        if !status.is_success() {
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            error!("Token request failed: HTTP {} - {}", status, error_body);
            return Err(fail(describe_token_error(status.as_u16(), &error_body)));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        Ok(Token::from_response(token_response, Utc::now()))
    }
}

#[async_trait]
impl IdentityProvider for AzureProvider {
    fn authorization_url(&self) -> AuthorizationRequest {
        let pkce = PkceChallenge::new();
        let state = generate_state();

        let mut url = self.authorize_url.clone();

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scope())
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url,
            state,
            pkce_verifier: Some(pkce.verifier),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<Token, AuthError> {
        let scope = self.scope();
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];
        if let Some(verifier) = pkce_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!("Exchanging authorization code");
        self.request_token(&params, AuthError::TokenExchangeFailed)
            .await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Token, AuthError> {
        let scope = self.scope();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        debug!("Exchanging refresh token");
        self.request_token(&params, AuthError::TokenRefreshFailed)
            .await
    }

    async fn get_authenticated(
        &self,
        url: &str,
        token: &Token,
    ) -> Result<serde_json::Value, AuthError> {
        graph::get_json(&self.http_client, url, token.access_token()).await
    }

    fn me_url(&self) -> String {
        self.me_url.clone()
    }
}

/// Map a transport failure, keeping timeouts distinct.
pub(crate) fn transport_error(e: reqwest::Error, fail: fn(String) -> AuthError) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        fail(e.to_string())
    }
}

/// Reduce a token endpoint error to status plus the OAuth error code.
fn describe_token_error(status: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct OAuthErrorBody {
        error: String,
    }

    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => format!("HTTP {} ({})", status, parsed.error),
        Err(_) => format!("HTTP {}", status),
    }
}
