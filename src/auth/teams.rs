//! Teams sign-in state machine.
//!
//! [`Teams::authenticate`] runs once per protected request. Every path that
//! needs the browser to go somewhere else ends in a [`RedirectAction`] that the
//! request handler must turn into its response; nothing in this module runs
//! after a redirect has been produced.

use crate::auth::oauth::{CallbackParams, IdentityProvider, PendingAuth};
use crate::auth::token::{SecureString, Token};
use crate::config::Config;
use crate::error::{AppError, AuthError, StoreError};
use crate::profile::ProfileRecord;
use crate::session::{KeyValueStore, TokenStore, KEY_AUTH_STATE, KEY_PROFILE, KEY_TOKEN};
use tracing::{debug, info, warn};

/// Where the current request stands in the sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    NoToken,
    TokenValid,
    TokenExpiredRefreshable,
    TokenExpiredNoRefresh,
    PendingCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// Off to the identity provider's authorize endpoint.
    Authorize,
    /// Callback accepted, token stored.
    SignedIn,
    SignedOut,
}

/// Terminal result of a request: the handler responds with a redirect and stops.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a redirect must end the current request"]
pub struct RedirectAction {
    location: String,
    reason: RedirectReason,
}

impl RedirectAction {
    fn new(location: impl Into<String>, reason: RedirectReason) -> Self {
        Self {
            location: location.into(),
            reason,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn reason(&self) -> RedirectReason {
        self.reason
    }
}

/// Result of [`Teams::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum AuthOutcome {
    /// Token valid and profile cached; the request may proceed.
    Authenticated,
    Redirect(RedirectAction),
}

/// Post-callback and post-logout destinations.
#[derive(Debug, Clone)]
pub struct RedirectTargets {
    pub on_success: String,
    pub on_logout: String,
}

impl RedirectTargets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            on_success: config.teams.app_redirect_uri_on_success.clone(),
            on_logout: config.teams.app_redirect_uri_on_logout.clone(),
        }
    }
}

/// Sign-in orchestration over an identity provider and a session.
pub struct Teams<P, S> {
    provider: P,
    store: TokenStore<S>,
    targets: RedirectTargets,
    token: Option<Token>,
    profile: ProfileRecord,
}

impl<P: IdentityProvider, S: KeyValueStore> Teams<P, S> {
    /// Load token and cached profile from `session`.
    pub fn new(provider: P, session: S, targets: RedirectTargets) -> Self {
        let mut store = TokenStore::new(session);
        let token: Option<Token> = store.recall(KEY_TOKEN);
        let profile = store.recall_or(KEY_PROFILE, ProfileRecord::default());

        debug!(
            has_token = token.is_some(),
            profile_loaded = profile.is_loaded(),
            "Teams session loaded"
        );

        Self {
            provider,
            store,
            targets,
            token,
            profile,
        }
    }

    /// Classify the current request.
    pub fn phase(&self, params: &CallbackParams) -> AuthPhase {
        if params.is_callback() && self.store.session().get(KEY_AUTH_STATE).is_some() {
            return AuthPhase::PendingCallback;
        }

        match &self.token {
            None => AuthPhase::NoToken,
            Some(token) if !token.has_expired() => AuthPhase::TokenValid,
            Some(token) if token.refresh_token().is_some() => AuthPhase::TokenExpiredRefreshable,
            Some(_) => AuthPhase::TokenExpiredNoRefresh,
        }
    }

    /// Entry point for every protected request.
    pub async fn authenticate(&mut self, params: &CallbackParams) -> Result<AuthOutcome, AppError> {
        let phase = self.phase(params);
        debug!(?phase, "Authenticating request");

        match phase {
            AuthPhase::PendingCallback => {
                let redirect = self.callback(params).await?;
                return Ok(AuthOutcome::Redirect(redirect));
            }
            AuthPhase::NoToken => {
                return Ok(AuthOutcome::Redirect(self.request_auth()?));
            }
            AuthPhase::TokenExpiredNoRefresh => {
                info!("Token expired without refresh token, re-authenticating");
                self.forget_token();
                return Ok(AuthOutcome::Redirect(self.request_auth()?));
            }
            AuthPhase::TokenExpiredRefreshable => {
                if !self.refresh_token().await? {
                    return Ok(AuthOutcome::Redirect(self.request_auth()?));
                }
            }
            AuthPhase::TokenValid => {}
        }

        match self.refresh_who_am_i(false).await {
            Ok(()) => Ok(AuthOutcome::Authenticated),
            Err(AppError::Auth(AuthError::Unauthorized)) => {
                warn!("Graph rejected the access token, re-authenticating");
                self.forget_all();
                Ok(AuthOutcome::Redirect(self.request_auth()?))
            }
            Err(e) => Err(e),
        }
    }

    /// Store a fresh CSRF state and redirect to the identity provider.
    pub fn request_auth(&mut self) -> Result<RedirectAction, StoreError> {
        let (url, pending) = self.provider.authorization_url().into_parts();
        self.store.remember(KEY_AUTH_STATE, &pending)?;

        info!("Redirecting to identity provider for sign-in");
        Ok(RedirectAction::new(url.as_str(), RedirectReason::Authorize))
    }

    /// Validate the returned state and exchange the authorization code.
    ///
    /// The stored state is consumed by every attempt, so a replayed state fails
    /// with [`AuthError::MissingState`].
    pub async fn callback(&mut self, params: &CallbackParams) -> Result<RedirectAction, AppError> {
        let Some(pending) = self.store.recall::<PendingAuth>(KEY_AUTH_STATE) else {
            warn!("Callback without pending authorization state");
            return Err(AuthError::MissingState.into());
        };
        self.store.forget(KEY_AUTH_STATE);

        if params.state.as_deref() != Some(pending.state.as_str()) {
            warn!("Callback state does not match stored state");
            return Err(AuthError::StateMismatch.into());
        }

        if let Some(error) = &params.error {
            let description = params.error_description.as_ref().unwrap_or(error);
            warn!(error = %error, "Identity provider returned an error");
            return Err(AuthError::OAuthFailed(description.clone()).into());
        }

        let code = params.code.as_deref().ok_or(AuthError::InvalidAuthCode)?;
        let verifier = pending.pkce_verifier.as_ref().map(SecureString::as_str);
        let token = self.provider.exchange_code(code, verifier).await?;

        // A new sign-in may be a different user
        self.forget_profile();
        self.store_token(token)?;

        info!("Sign-in callback accepted, token stored");
        Ok(RedirectAction::new(
            self.targets.on_success.clone(),
            RedirectReason::SignedIn,
        ))
    }

    /// Exchange the stored refresh token.
    ///
    /// Returns `Ok(false)` after forgetting all session auth state when the
    /// exchange fails; the refresh is not retried.
    pub async fn refresh_token(&mut self) -> Result<bool, StoreError> {
        let refresh = self
            .token
            .as_ref()
            .and_then(Token::refresh_token)
            .map(SecureString::from);

        let Some(refresh) = refresh else {
            warn!("No refresh token available");
            self.forget_all();
            return Ok(false);
        };

        match self.provider.exchange_refresh_token(refresh.as_str()).await {
            Ok(token) => {
                let token = token.with_refresh_fallback(Some(refresh.as_str()));
                info!(expires_at = %token.expires_at(), "Token refreshed");
                self.store_token(token)?;
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, forgetting session auth state");
                self.forget_all();
                Ok(false)
            }
        }
    }

    /// Fetch `/me` and cache the normalized profile.
    ///
    /// Without `force`, an already cached profile is kept and no request is made.
    pub async fn refresh_who_am_i(&mut self, force: bool) -> Result<(), AppError> {
        if self.profile.is_loaded() && !force {
            debug!("Profile already cached");
            return Ok(());
        }

        let token = self.token.as_ref().ok_or(AuthError::Unauthorized)?;
        let data = self
            .provider
            .get_authenticated(&self.provider.me_url(), token)
            .await?;

        let profile = ProfileRecord::from_graph(data)?;
        self.store.remember(KEY_PROFILE, &profile)?;
        info!(
            user = %profile.display_name_or_upn(),
            "Teams profile refreshed"
        );
        self.profile = profile;
        Ok(())
    }

    /// Forget all session auth state and redirect to the logout target.
    pub fn logout(&mut self) -> RedirectAction {
        self.forget_all();
        info!("Signed out");
        RedirectAction::new(self.targets.on_logout.clone(), RedirectReason::SignedOut)
    }

    pub fn user_teams(&self) -> &ProfileRecord {
        &self.profile
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn session(&self) -> &S {
        self.store.session()
    }

    /// Hand the session back to the host once the request is done.
    pub fn into_session(self) -> S {
        self.store.into_inner()
    }

    fn store_token(&mut self, token: Token) -> Result<(), StoreError> {
        self.store.remember(KEY_TOKEN, &token)?;
        debug!(
            has_refresh_token = token.refresh_token().is_some(),
            "Token persisted"
        );
        self.token = Some(token);
        Ok(())
    }

    fn forget_token(&mut self) {
        self.store.forget(KEY_TOKEN);
        self.token = None;
    }

    fn forget_profile(&mut self) {
        self.store.forget(KEY_PROFILE);
        self.profile = ProfileRecord::default();
    }

    fn forget_all(&mut self) {
        self.store.forget_all();
        self.token = None;
        self.profile = ProfileRecord::default();
    }
}
