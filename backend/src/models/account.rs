use chrono::{DateTime, Utc};
use serde::Serialize;
use signin_common::UserDto;

/// A registered end user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Store-assigned id, immutable once created.
    pub id: String,
    pub display_name: String,
    /// System-generated, unique at creation time.
    pub username: String,
    /// Unique at creation time.
    pub email: String,
    /// Provider-scoped subject id, unique at creation time.
    #[serde(skip_serializing)]
    pub external_identity_id: String,
    pub picture_url: String,
    #[serde(skip_serializing)]
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the account is soft-deleted.
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Public view returned to clients after sign-in.
    pub fn dto(&self) -> UserDto {
        UserDto {
            name: self.display_name.clone(),
            username: self.username.clone(),
            picture: self.picture_url.clone(),
        }
    }
}

/// Candidate account handed to the repository for creation.
///
/// The repository assigns `id` and the timestamps.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub username: String,
    pub email: String,
    pub external_identity_id: String,
    pub picture_url: String,
    pub blocked: bool,
}

impl NewAccount {
    pub fn new(
        display_name: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        external_identity_id: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            username: username.into(),
            email: email.into(),
            external_identity_id: external_identity_id.into(),
            picture_url: String::new(),
            blocked: false,
        }
    }

    pub fn with_picture(mut self, picture_url: impl Into<String>) -> Self {
        self.picture_url = picture_url.into();
        self
    }

    /// Materialize the candidate with a fresh id and creation timestamps.
    pub fn into_account(self, id: String, now: DateTime<Utc>) -> Account {
        Account {
            id,
            display_name: self.display_name,
            username: self.username,
            email: self.email,
            external_identity_id: self.external_identity_id,
            picture_url: self.picture_url,
            blocked: self.blocked,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
