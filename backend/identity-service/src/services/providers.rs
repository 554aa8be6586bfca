/// External identity provider clients
///
/// Supported providers:
/// - Google (OAuth 2.0)
/// - LinkedIn (OpenID Connect)
///
/// Each client exchanges an authorization code for a provider access token,
/// then fetches the profile. Every request carries the configured timeout.
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OAuthSettings;
use crate::error::{IdentityError, Result};
use crate::models::{FederatedProfile, OAuthProvider};

#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    fn provider(&self) -> OAuthProvider;

    /// URL the user agent is sent to for consent
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchange `code` for a token and fetch the caller's profile.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<FederatedProfile>;
}

fn exchange_error(e: reqwest::Error) -> IdentityError {
    IdentityError::ProviderExchangeFailed(e.to_string())
}

fn build_http(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IdentityError::Internal(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authorization-code grant against `token_url`, returning the access token
async fn exchange_authorization_code(
    http: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<String> {
    let token = http
        .post(token_url)
        .form(&[
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(exchange_error)?
        .error_for_status()
        .map_err(exchange_error)?
        .json::<TokenResponse>()
        .await
        .map_err(exchange_error)?;

    Ok(token.access_token)
}

async fn fetch_userinfo<T: serde::de::DeserializeOwned>(
    http: &Client,
    url: &str,
    access_token: &str,
) -> Result<T> {
    http.get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(exchange_error)?
        .error_for_status()
        .map_err(exchange_error)?
        .json::<T>()
        .await
        .map_err(exchange_error)
}

// ===== Google =====

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleUserInfo {
    fn into_profile(self) -> Result<FederatedProfile> {
        let email = self.email.filter(|e| !e.trim().is_empty()).ok_or_else(|| {
            IdentityError::ProviderProfileInvalid("Google profile has no email".to_string())
        })?;
        Ok(FederatedProfile {
            provider: OAuthProvider::Google,
            external_id: self.id,
            email,
            display_name: self.name,
            picture_url: self.picture,
        })
    }
}

#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    client_id: String,
    client_secret: String,
}

impl GoogleClient {
    pub fn new(client_id: String, client_secret: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl IdentityProviderClient for GoogleClient {
    fn provider(&self) -> OAuthProvider {
        OAuthProvider::Google
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20profile%20email&state={}",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<FederatedProfile> {
        let access_token = exchange_authorization_code(
            &self.http,
            GOOGLE_TOKEN_URL,
            &self.client_id,
            &self.client_secret,
            code,
            redirect_uri,
        )
        .await?;

        let info: GoogleUserInfo =
            fetch_userinfo(&self.http, GOOGLE_USERINFO_URL, &access_token).await?;
        debug!(external_id = %info.id, "Fetched Google profile");
        info.into_profile()
    }
}

// ===== LinkedIn =====

const LINKEDIN_AUTH_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
const LINKEDIN_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
const LINKEDIN_USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";

#[derive(Debug, Deserialize)]
struct LinkedInUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl LinkedInUserInfo {
    fn into_profile(self) -> Result<FederatedProfile> {
        let email = self.email.filter(|e| !e.trim().is_empty()).ok_or_else(|| {
            IdentityError::ProviderProfileInvalid("LinkedIn profile has no email".to_string())
        })?;

        let display_name = self.name.or_else(|| {
            let joined = [self.given_name, self.family_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        });

        Ok(FederatedProfile {
            provider: OAuthProvider::LinkedIn,
            external_id: self.sub,
            email,
            display_name,
            picture_url: self.picture,
        })
    }
}

#[derive(Clone)]
pub struct LinkedInClient {
    http: Client,
    client_id: String,
    client_secret: String,
}

impl LinkedInClient {
    pub fn new(client_id: String, client_secret: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl IdentityProviderClient for LinkedInClient {
    fn provider(&self) -> OAuthProvider {
        OAuthProvider::LinkedIn
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope=openid%20profile%20email&state={}",
            LINKEDIN_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<FederatedProfile> {
        let access_token = exchange_authorization_code(
            &self.http,
            LINKEDIN_TOKEN_URL,
            &self.client_id,
            &self.client_secret,
            code,
            redirect_uri,
        )
        .await?;

        let info: LinkedInUserInfo =
            fetch_userinfo(&self.http, LINKEDIN_USERINFO_URL, &access_token).await?;
        debug!(external_id = %info.sub, "Fetched LinkedIn profile");
        info.into_profile()
    }
}

// ===== Registry =====

/// Configured provider clients keyed by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<OAuthProvider, Arc<dyn IdentityProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider whose id and secret are both configured.
    pub fn from_settings(settings: &OAuthSettings) -> Result<Self> {
        let mut registry = Self::new();

        if let (Some(id), Some(secret)) =
            (&settings.google_client_id, &settings.google_client_secret)
        {
            registry.register(Arc::new(GoogleClient::new(
                id.clone(),
                secret.clone(),
                settings.http_timeout_secs,
            )?));
        }

        if let (Some(id), Some(secret)) =
            (&settings.linkedin_client_id, &settings.linkedin_client_secret)
        {
            registry.register(Arc::new(LinkedInClient::new(
                id.clone(),
                secret.clone(),
                settings.http_timeout_secs,
            )?));
        }

        info!(providers = registry.clients.len(), "Identity providers configured");
        Ok(registry)
    }

    pub fn register(&mut self, client: Arc<dyn IdentityProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, provider: OAuthProvider) -> Result<Arc<dyn IdentityProviderClient>> {
        self.clients.get(&provider).cloned().ok_or_else(|| {
            IdentityError::ProviderExchangeFailed(format!("{} is not configured", provider))
        })
    }

    pub fn is_configured(&self, provider: OAuthProvider) -> bool {
        self.clients.contains_key(&provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
