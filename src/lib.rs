//! Microsoft Teams / Azure AD single sign-on for web applications.
//!
//! A request handler builds a [`Teams`] from the browser's session, calls
//! [`Teams::authenticate`], and either answers with the returned redirect or
//! lets the request through with the cached Graph profile.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod profile;
pub mod session;

pub use auth::{AuthOutcome, AzureProvider, CallbackParams, IdentityProvider, Teams};
pub use config::Config;
pub use error::{AppError, AuthError};
pub use profile::user::{LocalUser, LocalUserSync, UserRepository};
pub use profile::ProfileRecord;
pub use session::{KeyValueStore, MemorySession};
