//! Azure AD authentication module.
//!
//! Provides the OAuth2 authorization-code client with PKCE, Microsoft Graph
//! access, the token value type and the Teams sign-in state machine.

pub mod graph;
pub mod oauth;
pub mod teams;
pub mod token;

pub use oauth::{AzureProvider, CallbackParams, IdentityProvider};
pub use teams::{AuthOutcome, AuthPhase, RedirectAction, RedirectReason, RedirectTargets, Teams};
pub use token::Token;
