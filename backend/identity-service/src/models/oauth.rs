use serde::{Deserialize, Serialize};
use validator::Validate;

/// External identity provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    #[serde(rename = "linkedin")]
    LinkedIn,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::LinkedIn => "linkedin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(OAuthProvider::Google),
            "linkedin" => Some(OAuthProvider::LinkedIn),
            _ => None,
        }
    }
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's identifier at one external provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub provider: OAuthProvider,
    pub external_id: String,
}

/// Profile asserted by an external provider after a successful code exchange
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FederatedProfile {
    pub provider: OAuthProvider,
    #[validate(length(min = 1, message = "external id must not be empty"))]
    pub external_id: String,
    #[validate(email(message = "provider email is not a valid address"))]
    pub email: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
}

impl FederatedProfile {
    /// Split the display name on the first space into (first, last).
    pub fn split_name(&self) -> (Option<String>, Option<String>) {
        let Some(name) = self.display_name.as_deref().map(str::trim) else {
            return (None, None);
        };
        if name.is_empty() {
            return (None, None);
        }

        match name.split_once(' ') {
            Some((first, rest)) => {
                let rest = rest.trim();
                let last = (!rest.is_empty()).then(|| rest.to_string());
                (Some(first.to_string()), last)
            }
            None => (Some(name.to_string()), None),
        }
    }
}
