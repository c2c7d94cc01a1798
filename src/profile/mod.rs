//! Signed-in user's Graph profile and its local user counterpart.

pub mod repository;
pub mod user;

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed local identifier so at most one profile is cached per session.
pub const SINGLETON_ID: u64 = 1;

/// Graph `/me` fields the profile is expected to carry.
pub const PROFILE_FIELDS: &[&str] = &[
    "guid",
    "businessPhones",
    "displayName",
    "givenName",
    "jobTitle",
    "mail",
    "mobilePhone",
    "officeLocation",
    "preferredLanguage",
    "surname",
    "userPrincipalName",
];

/// Normalized Graph profile, stored wholesale in the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRecord {
    fields: Map<String, Value>,
}

impl ProfileRecord {
    /// Normalize a Graph `/me` response.
    ///
    /// Drops `@odata.context`, moves `id` to `guid` and pins `id` to [`SINGLETON_ID`].
    pub fn from_graph(data: Value) -> Result<Self, AuthError> {
        let Value::Object(mut fields) = data else {
            return Err(AuthError::InvalidResponse(
                "profile is not a JSON object".to_string(),
            ));
        };

        fields.remove("@odata.context");
        let guid = fields
            .remove("id")
            .ok_or_else(|| AuthError::InvalidResponse("profile has no id".to_string()))?;
        fields.insert("guid".to_string(), guid);
        fields.insert("id".to_string(), Value::from(SINGLETON_ID));

        Ok(Self { fields })
    }

    pub fn is_loaded(&self) -> bool {
        self.fields.get("id").and_then(Value::as_u64) == Some(SINGLETON_ID)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of `field`; null and non-string values read as absent.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn guid(&self) -> Option<&str> {
        self.get_str("guid")
    }

    pub fn user_principal_name(&self) -> Option<&str> {
        self.get_str("userPrincipalName")
    }

    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> String {
        self.get_str("displayName")
            .or_else(|| self.user_principal_name())
            .unwrap_or("Unknown User")
            .to_string()
    }

    /// Get the best available email.
    pub fn email(&self) -> String {
        self.get_str("mail")
            .or_else(|| self.user_principal_name())
            .unwrap_or("No email")
            .to_string()
    }
}
