/// Maps an external provider profile onto a local user
///
/// Resolution order:
/// 1. existing user with the profile's email (linked to the provider if not yet)
/// 2. existing user holding `(provider, external_id)`, returned unchanged
/// 3. a new verified user carrying the provider identity
///
/// A concurrent identical call surfaces as `StorageConflict`; the caller
/// retries the whole unit of work, which then resolves through step 1 or 2.
use chrono::Utc;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{normalize_email, FederatedIdentity, FederatedProfile, User, DEFAULT_ROLE};
use crate::store::StoreTx;

#[derive(Debug, Clone, Default)]
pub struct FederationLinker;

impl FederationLinker {
    pub fn new() -> Self {
        Self
    }

    pub async fn link_or_create(
        &self,
        tx: &mut dyn StoreTx,
        profile: &FederatedProfile,
    ) -> Result<User> {
        let email = normalize_email(&profile.email);

        if let Some(user) = tx.find_user_by_email(&email).await? {
            return self.link_existing(tx, user, profile).await;
        }

        if let Some(user) = tx
            .find_user_by_identity(profile.provider, &profile.external_id)
            .await?
        {
            info!(
                user_id = %user.id,
                provider = %profile.provider,
                "Provider identity matched under a different email; keeping local record"
            );
            return Ok(user);
        }

        self.create(tx, email, profile).await
    }

    async fn link_existing(
        &self,
        tx: &mut dyn StoreTx,
        mut user: User,
        profile: &FederatedProfile,
    ) -> Result<User> {
        if user.external_id(profile.provider).is_none() {
            match tx
                .find_user_by_identity(profile.provider, &profile.external_id)
                .await?
            {
                Some(owner) if owner.id != user.id => {
                    warn!(
                        user_id = %user.id,
                        owner_id = %owner.id,
                        provider = %profile.provider,
                        "Provider identity already belongs to another user; not linking"
                    );
                }
                _ => {
                    let identity = FederatedIdentity {
                        provider: profile.provider,
                        external_id: profile.external_id.clone(),
                    };
                    tx.link_identity(user.id, &identity).await?;
                    user.identities.push(identity);
                    info!(user_id = %user.id, provider = %profile.provider, "Linked provider identity");
                }
            }

            if user.profile_picture_url.is_none() {
                user.profile_picture_url = profile.picture_url.clone();
            }
        }

        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        tx.update_user(&user).await?;

        if !tx.has_role(user.id, DEFAULT_ROLE).await? {
            tx.grant_role(user.id, DEFAULT_ROLE).await?;
        }

        Ok(user)
    }

    async fn create(
        &self,
        tx: &mut dyn StoreTx,
        email: String,
        profile: &FederatedProfile,
    ) -> Result<User> {
        let (first_name, last_name) = profile.split_name();
        let now = Utc::now();

        let mut user = User::new(&email);
        user.first_name = first_name;
        user.last_name = last_name;
        user.profile_picture_url = profile.picture_url.clone();
        user.email_verified = true;
        user.last_login_at = Some(now);
        user.identities.push(FederatedIdentity {
            provider: profile.provider,
            external_id: profile.external_id.clone(),
        });

        tx.insert_user(&user).await?;
        tx.grant_role(user.id, DEFAULT_ROLE).await?;

        info!(user_id = %user.id, provider = %profile.provider, "Created user from provider profile");
        Ok(user)
    }
}
