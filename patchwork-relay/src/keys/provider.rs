//! External identity provider client.
//!
//! GitHub is the only provider: user key listings come from
//! `GET /users/{username}/keys` and gist documents from `GET /gists/{id}`.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use patchwork_types::{parse_key_lines, TrustedKey};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Source of externally published public keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Keys the provider lists for `username`.
    ///
    /// An unknown user is an empty list, not an error.
    async fn user_keys(&self, username: &str) -> Result<Vec<TrustedKey>, ProviderError>;

    /// Keys embedded in the document `gist_id`, one per line.
    ///
    /// An unknown gist is an empty list, not an error.
    async fn gist_keys(&self, gist_id: &str) -> Result<Vec<TrustedKey>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct UserKey {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Gist {
    #[serde(default)]
    files: HashMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
}

/// GitHub REST API client.
pub struct GitHubProvider {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl std::fmt::Debug for GitHubProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubProvider")
            .field("api_base", &self.api_base)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl GitHubProvider {
    /// Build a client from configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("patchwork/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// GET `path` and decode JSON; `Ok(None)` on 404.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        tracing::debug!(url = %url, "Querying identity provider");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ProviderError::from_reqwest)?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    url,
                })
            }
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl KeyProvider for GitHubProvider {
    async fn user_keys(&self, username: &str) -> Result<Vec<TrustedKey>, ProviderError> {
        let listing: Vec<UserKey> = self
            .get_json(&format!("/users/{username}/keys"))
            .await?
            .unwrap_or_default();

        let text: Vec<&str> = listing.iter().map(|k| k.key.as_str()).collect();
        Ok(parse_key_lines(&text.join("\n")))
    }

    async fn gist_keys(&self, gist_id: &str) -> Result<Vec<TrustedKey>, ProviderError> {
        let Some(gist) = self.get_json::<Gist>(&format!("/gists/{gist_id}")).await? else {
            return Ok(Vec::new());
        };

        let mut names: Vec<&String> = gist.files.keys().collect();
        names.sort();

        let mut text = String::new();
        for name in names {
            let file = &gist.files[name];
            if file.truncated {
                tracing::warn!(gist = %gist_id, file = %name, "Skipping truncated gist file");
                continue;
            }
            if let Some(content) = &file.content {
                text.push_str(content);
                text.push('\n');
            }
        }

        Ok(parse_key_lines(&text))
    }
}
