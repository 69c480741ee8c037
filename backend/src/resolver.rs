//! Maps verified provider identities to local accounts.

use std::sync::Arc;

use crate::auth::ExternalClaims;
use crate::models::{Account, NewAccount};
use crate::store::{AccountRepository, RepositoryError};

/// Failure while finding or provisioning an account. The repository error is
/// kept intact; the variant records which step produced it.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Failed to look up account: {0}")]
    Lookup(#[source] RepositoryError),
    #[error("Failed to create account: {0}")]
    Create(#[source] RepositoryError),
    #[error("Account resolution timed out")]
    DeadlineExceeded,
}

/// Finds the account linked to an external identity, creating it on first sign-in.
pub struct IdentityResolver {
    accounts: Arc<dyn AccountRepository>,
}

impl IdentityResolver {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    pub async fn resolve(&self, claims: &ExternalClaims) -> Result<Account, ResolveError> {
        match self.accounts.find_by_external_identity(&claims.subject).await {
            Ok(account) => {
                tracing::debug!(account_id = %account.id, "Resolved existing account");
                return Ok(account);
            }
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(ResolveError::Lookup(e)),
        }

        // Never derived from provider data.
        let username = uuid::Uuid::new_v4().simple().to_string();
        let mut candidate = NewAccount::new(
            claims.display_name.clone(),
            username,
            claims.email.clone(),
            claims.subject.clone(),
        );
        if let Some(picture) = &claims.picture {
            candidate = candidate.with_picture(picture.clone());
        }

        let account = match self.accounts.create(candidate).await {
            Ok(account) => account,
            Err(e) if e.is_duplicate() => {
                tracing::warn!(
                    external_identity_id = %claims.subject,
                    error = %e,
                    "Account already exists for a concurrent or trashed identity"
                );
                return Err(ResolveError::Create(e));
            }
            Err(e) => return Err(ResolveError::Create(e)),
        };
        tracing::info!(
            account_id = %account.id,
            username = %account.username,
            "Provisioned account on first sign-in"
        );
        Ok(account)
    }
}
