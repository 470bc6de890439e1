use crate::config::Config;
use crate::identity::{AccessToken, ExternalProfile, IdentityProvider};
use crate::ledger::model::AuthProvider;
use crate::net::{build_client, run_blocking};
use anyhow::{Context, Result, bail};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

const AUTH_BASE_URL: &str = "https://kauth.kakao.com";
const API_BASE_URL: &str = "https://kapi.kakao.com";
const TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KakaoUser {
    id: i64,
    #[serde(default)]
    properties: Option<KakaoProperties>,
    #[serde(default)]
    kakao_account: Option<KakaoAccount>,
}

#[derive(Debug, Deserialize)]
struct KakaoProperties {
    nickname: Option<String>,
    profile_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KakaoAccount {
    email: Option<String>,
    profile: Option<KakaoProfile>,
}

#[derive(Debug, Deserialize)]
struct KakaoProfile {
    nickname: Option<String>,
    profile_image_url: Option<String>,
}

impl KakaoUser {
    fn into_profile(self) -> ExternalProfile {
        let account = self.kakao_account;
        let account_profile = account.as_ref().and_then(|account| account.profile.as_ref());
        let properties = self.properties.as_ref();

        ExternalProfile {
            external_id: self.id.to_string(),
            display_name: account_profile
                .and_then(|profile| profile.nickname.clone())
                .or_else(|| properties.and_then(|props| props.nickname.clone())),
            email: account.as_ref().and_then(|account| account.email.clone()),
            avatar_url: account_profile
                .and_then(|profile| profile.profile_image_url.clone())
                .or_else(|| properties.and_then(|props| props.profile_image.clone())),
        }
    }
}

/// Kakao Login REST adapter.
#[derive(Debug, Clone)]
pub struct KakaoIdentity {
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    auth_base_url: String,
    api_base_url: String,
}

impl KakaoIdentity {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client_id = config.resolved_kakao_client_id().context(
            "Kakao client id is missing. Set `TodaysChallenge config set kakao.client_id <ID>` or `TODAYS_CHALLENGE_KAKAO_CLIENT_ID`.",
        )?;

        Ok(Self {
            client_id,
            client_secret: config.kakao_client_secret.clone(),
            redirect_uri: config.kakao_redirect_uri.clone(),
            auth_base_url: AUTH_BASE_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
        })
    }

    fn bearer_headers(token: &AccessToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token.bearer()).context("Failed to build authorization header")?,
        );
        Ok(headers)
    }
}

impl IdentityProvider for KakaoIdentity {
    fn kind(&self) -> AuthProvider {
        AuthProvider::Kakao
    }

    fn authorize_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/oauth/authorize", self.auth_base_url))
            .context("Invalid Kakao authorize URL")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code");

        Ok(url)
    }

    fn exchange_grant(&self, grant: &str) -> Result<AccessToken> {
        if grant.trim().is_empty() {
            bail!("Kakao authorization code is empty");
        }

        let endpoint = format!("{}/oauth/token", self.auth_base_url);
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
            ("code".to_string(), grant.trim().to_string()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }

        let token: TokenResponse = run_blocking(move || {
            let client = build_client(TIMEOUT_SECONDS, HeaderMap::new())?;
            let response = client
                .post(&endpoint)
                .form(&form)
                .send()
                .context("Kakao token request failed")?;

            let status = response.status();
            let body = response.text().context("Failed to read Kakao token response")?;
            if !status.is_success() {
                bail!("Kakao token error {}: {}", status, body);
            }

            serde_json::from_str(&body).context("Failed to parse Kakao token response")
        })?;

        Ok(AccessToken {
            value: token.access_token,
            expires_in: token.expires_in,
        })
    }

    fn fetch_profile(&self, token: &AccessToken) -> Result<ExternalProfile> {
        let endpoint = format!("{}/v2/user/me", self.api_base_url);
        let headers = Self::bearer_headers(token)?;

        let user: KakaoUser = run_blocking(move || {
            let client = build_client(TIMEOUT_SECONDS, headers)?;
            let response = client
                .get(&endpoint)
                .send()
                .context("Kakao profile request failed")?;

            let status = response.status();
            let body = response.text().context("Failed to read Kakao profile response")?;
            if !status.is_success() {
                bail!("Kakao profile error {}: {}", status, body);
            }

            serde_json::from_str(&body).context("Failed to parse Kakao profile response")
        })?;

        Ok(user.into_profile())
    }

    fn revoke(&self, token: &AccessToken) -> Result<()> {
        let endpoint = format!("{}/v1/user/logout", self.api_base_url);
        let headers = Self::bearer_headers(token)?;

        run_blocking(move || {
            let client = build_client(TIMEOUT_SECONDS, headers)?;
            let response = client
                .post(&endpoint)
                .send()
                .context("Kakao logout request failed")?;

            if !response.status().is_success() {
                bail!("Kakao logout error {}", response.status());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{KakaoIdentity, KakaoUser};
    use crate::config::Config;
    use crate::identity::IdentityProvider;

    #[test]
    fn authorize_url_carries_client_and_redirect() {
        let config = Config {
            kakao_client_id: Some("abc123".to_string()),
            ..Config::default()
        };
        let identity = KakaoIdentity::from_config(&config).unwrap();

        let url = identity.authorize_url().unwrap();
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();

        assert_eq!(url.host_str(), Some("kauth.kakao.com"));
        assert!(pairs.contains(&("client_id".to_string(), "abc123".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "http://localhost:5173/#/auth/kakao/callback".to_string()
        )));
    }

    #[test]
    fn profile_prefers_account_fields() {
        let user: KakaoUser = serde_json::from_str(
            r#"{
                "id": 1234567890,
                "properties": {"nickname": "props-nick"},
                "kakao_account": {
                    "email": "user@kakao.com",
                    "profile": {"nickname": "도전자", "profile_image_url": "https://img.test/a.png"}
                }
            }"#,
        )
        .unwrap();

        let profile = user.into_profile();
        assert_eq!(profile.external_id, "1234567890");
        assert_eq!(profile.display_name.as_deref(), Some("도전자"));
        assert_eq!(profile.email.as_deref(), Some("user@kakao.com"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://img.test/a.png"));
    }

    #[test]
    fn bare_profile_has_only_an_id() {
        let user: KakaoUser = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        let profile = user.into_profile();

        assert_eq!(profile.external_id, "7");
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.email, None);
    }
}
