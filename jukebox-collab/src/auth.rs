use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{Database, DatabaseError, NewUser, Role, UserData};

/// A user as vouched for by the identity provider
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub external_id: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The credential is missing, malformed or was rejected by the provider
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User is not active")]
    Inactive,
    /// The identity provider could not be reached
    #[error("Identity provider is unavailable: {0}")]
    Unavailable(String),
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
}

/// Verifies bearer credentials issued by an external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Resolves credentials by asking the provider who they belong to.
pub struct RemoteIdentityProvider {
    client: reqwest::Client,
    account_url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    #[serde(alias = "$id")]
    user_id: String,
    #[serde(default)]
    email: String,
    role: Option<String>,
}

impl RemoteIdentityProvider {
    const REQUEST_TIMEOUT_IN_SECONDS: u64 = 10;

    pub fn new(endpoint: &str) -> Result<Self, AuthError> {
        let mut endpoint =
            Url::parse(endpoint).map_err(|e| AuthError::Unavailable(e.to_string()))?;

        // Joining onto a path without a trailing slash replaces its last segment
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let account_url = endpoint
            .join("account")
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_IN_SECONDS))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            account_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .get(self.account_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Err(AuthError::InvalidCredentials)
            }
            status if !status.is_success() => {
                return Err(AuthError::Unavailable(format!(
                    "identity provider answered with {}",
                    status
                )))
            }
            _ => {}
        }

        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if account.user_id.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(Identity {
            external_id: account.user_id,
            email: account.email,
            role: account
                .role
                .and_then(|r| r.parse().ok())
                .unwrap_or_default(),
        })
    }
}

/// Maps fixed tokens to identities, for development and tests.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    identities: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.identities.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.identities
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

/// Turns credentials into jukebox users, provisioning them on first sight.
pub struct Auth {
    db: Arc<dyn Database>,
    identity: Arc<dyn IdentityProvider>,
}

impl Auth {
    pub fn new(db: &Arc<dyn Database>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            db: db.clone(),
            identity,
        }
    }

    /// Returns the active user the credential belongs to
    pub async fn authenticate(&self, token: &str) -> Result<UserData, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let identity = self.identity.verify(token).await?;

        let user = match self.db.user_by_external_id(&identity.external_id).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound { .. }) => self.provision(identity).await?,
            Err(e) => return Err(AuthError::Db(e)),
        };

        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        Ok(user)
    }

    async fn provision(&self, identity: Identity) -> Result<UserData, AuthError> {
        let venue_name = match identity.email.split('@').next() {
            Some(name) if !name.is_empty() => format!("{}'s venue", name),
            _ => "My venue".to_string(),
        };

        let result = self
            .db
            .provision_user(NewUser {
                external_id: identity.external_id.clone(),
                email: identity.email,
                role: identity.role,
                venue_name,
            })
            .await;

        match result {
            Ok(user) => {
                info!("Provisioned user {} with venue {:?}", user.id, user.venue_id);
                Ok(user)
            }
            // Someone else provisioned the same identity first
            Err(DatabaseError::Conflict { .. }) => {
                warn!("User {} was provisioned concurrently", identity.external_id);

                self.db
                    .user_by_external_id(&identity.external_id)
                    .await
                    .map_err(AuthError::Db)
            }
            Err(e) => Err(AuthError::Db(e)),
        }
    }
}
