/// OAuth client registry
use chrono::Utc;
use crypto_core::generate_opaque_token;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::error::{IdentityError, Result};
use crate::models::client::{DEFAULT_REDIRECT_URI, DEFAULT_SCOPES};
use crate::models::{AuditEventType, OAuthClient, RequestContext};
use crate::security::{hash_password, verify_password};
use crate::services::audit::AuditLogger;
use crate::services::authentication::{finish, surface};
use crate::store::{IdentityStore, StoreTx};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewClient {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub redirect_uris: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
}

/// Partial update; `None` leaves a field unchanged. A non-blank
/// `client_secret` replaces the stored secret.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ClientUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub client_secret: Option<String>,
}

/// A freshly registered client; the raw secret is only available here.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredClient {
    pub client: OAuthClient,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn IdentityStore>,
    audit: AuditLogger,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    pub async fn register(&self, new_client: NewClient) -> Result<RegisteredClient> {
        new_client.validate()?;

        let client_secret = generate_opaque_token();
        let now = Utc::now();
        let base_id = Self::generate_client_id(&new_client.name);
        let mut client = OAuthClient {
            id: Uuid::new_v4(),
            client_id: base_id.clone(),
            client_secret_hash: hash_password(&client_secret)?,
            client_name: new_client.name.trim().to_string(),
            redirect_uris: new_client
                .redirect_uris
                .filter(|uris| !uris.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_REDIRECT_URI.to_string()]),
            scopes: new_client
                .scopes
                .filter(|scopes| !scopes.is_empty())
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        // A concurrent registration may claim the same id between the
        // uniqueness check and the insert; retry the unit of work once.
        client.client_id = match self.insert_unique(&client, &base_id).await {
            Err(IdentityError::StorageConflict) => {
                debug!(client_id = %base_id, "Client id raced a concurrent registration; retrying");
                self.insert_unique(&client, &base_id).await
            }
            other => other,
        }
        .map_err(surface)?;

        self.audit
            .log_event(
                None,
                AuditEventType::ClientRegistration,
                format!("Client {} registered", client.client_id),
                &RequestContext::default(),
            )
            .await;
        info!(client_id = %client.client_id, "OAuth client registered");

        Ok(RegisteredClient {
            client,
            client_secret,
        })
    }

    async fn insert_unique(&self, client: &OAuthClient, base_id: &str) -> Result<String> {
        let mut tx = self.store.begin().await?;
        let outcome = Self::insert_with_unique_id(tx.as_mut(), client.clone(), base_id).await;
        finish(tx, outcome).await
    }

    async fn insert_with_unique_id(
        tx: &mut dyn StoreTx,
        mut client: OAuthClient,
        base_id: &str,
    ) -> Result<String> {
        client.client_id = Self::unique_client_id(tx, base_id).await?;
        tx.insert_client(&client).await?;
        Ok(client.client_id)
    }

    /// `base_id`, or `base_id-N` for the first free N
    async fn unique_client_id(tx: &mut dyn StoreTx, base_id: &str) -> Result<String> {
        let mut candidate = base_id.to_string();
        let mut counter = 1;
        while tx.find_client(&candidate).await?.is_some() {
            candidate = format!("{}-{}", base_id, counter);
            counter += 1;
        }
        Ok(candidate)
    }

    /// Slug of the name plus 8 random hex characters
    ///
    /// Characters other than ASCII letters, digits and whitespace are
    /// dropped; whitespace runs become a single hyphen.
    fn generate_client_id(name: &str) -> String {
        let kept: String = name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
            .collect();
        let slug = kept.split_whitespace().collect::<Vec<_>>().join("-");
        let slug = if slug.is_empty() { "client".to_string() } else { slug };

        let mut suffix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut suffix);
        format!("{}-{}", slug, hex::encode(suffix))
    }

    /// Active client whose secret matches
    pub async fn validate_credentials(&self, client_id: &str, client_secret: &str) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.find_active_client(client_id).await.map_err(IdentityError::from);
        let client = finish(tx, outcome).await.map_err(surface)?;

        match client {
            Some(client) => verify_password(client_secret, &client.client_secret_hash),
            None => Ok(false),
        }
    }

    /// Returns whether the client exists.
    pub async fn set_active(&self, client_id: &str, active: bool) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let outcome = tx
            .set_client_active(client_id, active)
            .await
            .map_err(IdentityError::from);
        let found = finish(tx, outcome).await.map_err(surface)?;
        if found {
            info!(client_id, active, "OAuth client status changed");
        }
        Ok(found)
    }

    pub async fn find(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.find_client(client_id).await.map_err(IdentityError::from);
        finish(tx, outcome).await.map_err(surface)
    }

    pub async fn list(&self) -> Result<Vec<OAuthClient>> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.list_clients().await.map_err(IdentityError::from);
        finish(tx, outcome).await.map_err(surface)
    }

    /// Apply `changes`; `None` when the client does not exist.
    pub async fn update(
        &self,
        client_id: &str,
        changes: ClientUpdate,
    ) -> Result<Option<OAuthClient>> {
        changes.validate()?;

        let secret_hash = match changes.client_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Some(hash_password(secret)?),
            _ => None,
        };
        let rotated = secret_hash.is_some();

        let mut tx = self.store.begin().await?;
        let outcome = Self::apply_update(tx.as_mut(), client_id, changes, secret_hash).await;
        let updated = finish(tx, outcome).await.map_err(surface)?;

        if let Some(client) = &updated {
            self.audit
                .log_event(
                    None,
                    AuditEventType::ClientUpdate,
                    format!("Client {} updated", client.client_id),
                    &RequestContext::default(),
                )
                .await;
            info!(client_id, secret_rotated = rotated, "OAuth client updated");
        }
        Ok(updated)
    }

    async fn apply_update(
        tx: &mut dyn StoreTx,
        client_id: &str,
        changes: ClientUpdate,
        secret_hash: Option<String>,
    ) -> Result<Option<OAuthClient>> {
        let Some(mut client) = tx.find_client(client_id).await? else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            client.client_name = name.trim().to_string();
        }
        if let Some(uris) = changes.redirect_uris {
            client.redirect_uris = uris;
        }
        if let Some(scopes) = changes.scopes {
            client.scopes = scopes;
        }
        if let Some(active) = changes.is_active {
            client.is_active = active;
        }
        if let Some(hash) = secret_hash {
            client.client_secret_hash = hash;
        }
        client.updated_at = Utc::now();

        tx.update_client(&client).await?;
        Ok(Some(client))
    }

    /// Remove the client and every refresh token issued to it. Returns
    /// whether the client existed.
    pub async fn delete(&self, client_id: &str) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.delete_client(client_id).await.map_err(IdentityError::from);
        let deleted = finish(tx, outcome).await.map_err(surface)?;

        if deleted {
            self.audit
                .log_event(
                    None,
                    AuditEventType::ClientDeletion,
                    format!("Client {} deleted", client_id),
                    &RequestContext::default(),
                )
                .await;
            info!(client_id, "OAuth client deleted");
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::MemoryAuditSink;
    use crate::store::{IdentityStore, MemoryStore};

    fn registry() -> (ClientRegistry, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let registry = ClientRegistry::new(Arc::new(MemoryStore::new()), AuditLogger::new(sink.clone()));
        (registry, sink)
    }

    #[test]
    fn test_client_id_format() {
        let id = ClientRegistry::generate_client_id("  My Web App!! ");
        let (slug, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(slug, "my-web-app");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(ClientRegistry::generate_client_id("!!!").starts_with("client-"));
    }

    #[test]
    fn test_client_id_strips_punctuation() {
        let id = ClientRegistry::generate_client_id("Bob's App");
        assert_eq!(id.rsplit_once('-').unwrap().0, "bobs-app");

        let id = ClientRegistry::generate_client_id("Partner.io  Portal");
        assert_eq!(id.rsplit_once('-').unwrap().0, "partnerio-portal");
    }

    fn client_row(client_id: &str) -> OAuthClient {
        let now = Utc::now();
        OAuthClient {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            client_secret_hash: "unused".to_string(),
            client_name: client_id.to_string(),
            redirect_uris: vec![DEFAULT_REDIRECT_URI.to_string()],
            scopes: vec!["read".to_string()],
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_taken_client_id_gets_counter_suffix() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_client(&client_row("web-1a2b3c4d")).await.unwrap();

        let id = ClientRegistry::insert_with_unique_id(
            tx.as_mut(),
            client_row("web-1a2b3c4d"),
            "web-1a2b3c4d",
        )
        .await
        .unwrap();
        assert_eq!(id, "web-1a2b3c4d-1");

        let id = ClientRegistry::insert_with_unique_id(
            tx.as_mut(),
            client_row("web-1a2b3c4d"),
            "web-1a2b3c4d",
        )
        .await
        .unwrap();
        assert_eq!(id, "web-1a2b3c4d-2");
        assert_eq!(tx.list_clients().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_rotates_secret_and_edits_fields() {
        let (registry, sink) = registry();
        let registered = registry
            .register(NewClient {
                name: "Web".to_string(),
                redirect_uris: None,
                scopes: None,
            })
            .await
            .unwrap();
        let id = registered.client.client_id.clone();

        let updated = registry
            .update(
                &id,
                ClientUpdate {
                    name: Some("Web Portal".to_string()),
                    scopes: Some(vec!["read".to_string()]),
                    client_secret: Some("rotated-secret-value".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.client_id, id);
        assert_eq!(updated.client_name, "Web Portal");
        assert_eq!(updated.scopes, vec!["read".to_string()]);
        assert_eq!(updated.redirect_uris, registered.client.redirect_uris);
        assert!(updated.is_active);

        assert!(!registry
            .validate_credentials(&id, &registered.client_secret)
            .await
            .unwrap());
        assert!(registry
            .validate_credentials(&id, "rotated-secret-value")
            .await
            .unwrap());
        assert_eq!(sink.events_of(AuditEventType::ClientUpdate).len(), 1);
    }

    #[tokio::test]
    async fn test_blank_secret_keeps_existing_one() {
        let (registry, _) = registry();
        let registered = registry
            .register(NewClient {
                name: "Mobile".to_string(),
                redirect_uris: None,
                scopes: None,
            })
            .await
            .unwrap();
        let id = registered.client.client_id.clone();

        registry
            .update(
                &id,
                ClientUpdate {
                    is_active: Some(false),
                    client_secret: Some("   ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        let stored = registry.find(&id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.client_secret_hash, registered.client.client_secret_hash);
    }

    #[tokio::test]
    async fn test_update_unknown_or_invalid() {
        let (registry, _) = registry();
        assert!(registry
            .update("missing", ClientUpdate::default())
            .await
            .unwrap()
            .is_none());

        let result = registry
            .update(
                "missing",
                ClientUpdate {
                    name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IdentityError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (registry, sink) = registry();
        let mut ids = Vec::new();
        for name in ["Alpha", "Beta"] {
            let registered = registry
                .register(NewClient {
                    name: name.to_string(),
                    redirect_uris: None,
                    scopes: None,
                })
                .await
                .unwrap();
            ids.push(registered.client.client_id);
        }

        let listed: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.client_id)
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(ids.iter().all(|id| listed.contains(id)));

        assert!(registry.delete(&ids[0]).await.unwrap());
        assert!(!registry.delete(&ids[0]).await.unwrap());
        assert!(registry.find(&ids[0]).await.unwrap().is_none());
        assert_eq!(registry.list().await.unwrap().len(), 1);
        assert_eq!(sink.events_of(AuditEventType::ClientDeletion).len(), 1);
    }

    #[tokio::test]
    async fn test_register_applies_defaults_and_hashes_secret() {
        let (registry, sink) = registry();
        let registered = registry
            .register(NewClient {
                name: "Web".to_string(),
                redirect_uris: None,
                scopes: Some(vec![]),
            })
            .await
            .unwrap();

        let client = &registered.client;
        assert!(client.is_active);
        assert_eq!(client.redirect_uris, vec![DEFAULT_REDIRECT_URI.to_string()]);
        assert_eq!(client.scopes.len(), DEFAULT_SCOPES.len());
        assert_ne!(client.client_secret_hash, registered.client_secret);
        assert_eq!(sink.events_of(AuditEventType::ClientRegistration).len(), 1);

        let stored = registry.find(&client.client_id).await.unwrap();
        assert_eq!(stored.as_ref(), Some(client));
    }

    #[tokio::test]
    async fn test_validate_credentials() {
        let (registry, _) = registry();
        let registered = registry
            .register(NewClient {
                name: "Mobile".to_string(),
                redirect_uris: Some(vec!["app://cb".to_string()]),
                scopes: None,
            })
            .await
            .unwrap();
        let id = registered.client.client_id.clone();

        assert!(registry
            .validate_credentials(&id, &registered.client_secret)
            .await
            .unwrap());
        assert!(!registry.validate_credentials(&id, "wrong").await.unwrap());
        assert!(!registry
            .validate_credentials("missing", &registered.client_secret)
            .await
            .unwrap());

        assert!(registry.set_active(&id, false).await.unwrap());
        assert!(!registry
            .validate_credentials(&id, &registered.client_secret)
            .await
            .unwrap());
        assert!(!registry.set_active("missing", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (registry, _) = registry();
        let result = registry
            .register(NewClient {
                name: String::new(),
                redirect_uris: None,
                scopes: None,
            })
            .await;
        assert!(matches!(result, Err(IdentityError::Validation(_))));
    }
}
