pub mod kakao;

use crate::ledger::model::{AuthProvider, AuthUser};
use anyhow::{Context, Result};
use std::fmt;
use tracing::info;
use url::Url;

/// Bearer token handed out by an identity provider. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Option<u64>,
}

impl AccessToken {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"***")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    pub external_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl ExternalProfile {
    /// Missing names and emails get the same placeholders the sign-in pages
    /// show.
    pub fn into_auth_user(self, provider: AuthProvider) -> AuthUser {
        let name = self
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| match provider {
                AuthProvider::Kakao => "카카오 사용자".to_string(),
                AuthProvider::Google => "구글 사용자".to_string(),
            });

        let email = self
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| match provider {
                AuthProvider::Kakao => format!("kakao_{}@kakao.user", self.external_id),
                AuthProvider::Google => String::new(),
            });

        AuthUser {
            id: self.external_id,
            name,
            email,
            provider,
            profile_image: self.avatar_url,
        }
    }
}

/// Delegated sign-in. Implementations perform blocking HTTP calls.
pub trait IdentityProvider: Send + Sync {
    fn kind(&self) -> AuthProvider;
    fn authorize_url(&self) -> Result<Url>;
    fn exchange_grant(&self, grant: &str) -> Result<AccessToken>;
    fn fetch_profile(&self, token: &AccessToken) -> Result<ExternalProfile>;
    fn revoke(&self, token: &AccessToken) -> Result<()>;
}

/// Exchanges an authorization grant and resolves the signed-in user.
pub fn sign_in(provider: &dyn IdentityProvider, grant: &str) -> Result<(AuthUser, AccessToken)> {
    let token = provider
        .exchange_grant(grant)
        .with_context(|| format!("{} sign-in failed", provider.kind()))?;
    let profile = provider
        .fetch_profile(&token)
        .with_context(|| format!("Failed to fetch {} profile", provider.kind()))?;

    let user = profile.into_auth_user(provider.kind());
    info!(provider = %user.provider, user_id = %user.id, "identity resolved");

    Ok((user, token))
}

#[cfg(test)]
mod tests {
    use super::{AccessToken, ExternalProfile, IdentityProvider, sign_in};
    use crate::ledger::model::AuthProvider;
    use anyhow::{Result, bail};
    use url::Url;

    struct StaticIdentity;

    impl IdentityProvider for StaticIdentity {
        fn kind(&self) -> AuthProvider {
            AuthProvider::Kakao
        }

        fn authorize_url(&self) -> Result<Url> {
            Ok(Url::parse("https://auth.example.test/authorize")?)
        }

        fn exchange_grant(&self, grant: &str) -> Result<AccessToken> {
            if grant != "good-code" {
                bail!("invalid grant");
            }
            Ok(AccessToken {
                value: "token".to_string(),
                expires_in: Some(3600),
            })
        }

        fn fetch_profile(&self, _token: &AccessToken) -> Result<ExternalProfile> {
            Ok(ExternalProfile {
                external_id: "42".to_string(),
                display_name: None,
                email: None,
                avatar_url: None,
            })
        }

        fn revoke(&self, _token: &AccessToken) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sign_in_fills_placeholders() {
        let (user, token) = sign_in(&StaticIdentity, "good-code").unwrap();

        assert_eq!(user.id, "42");
        assert_eq!(user.name, "카카오 사용자");
        assert_eq!(user.email, "kakao_42@kakao.user");
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn rejected_grant_is_an_error() {
        assert!(sign_in(&StaticIdentity, "bad").is_err());
    }

    #[test]
    fn token_debug_output_is_redacted() {
        let token = AccessToken {
            value: "secret".to_string(),
            expires_in: None,
        };

        assert!(!format!("{token:?}").contains("secret"));
        assert_eq!(token.bearer(), "Bearer secret");
    }
}
