/// Child-account profiles
///
/// Profiles hold the personality template and engagement style of a child
/// account. They come from the REST backend when one is configured and from
/// memory otherwise.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{EngagementStyle, PersonalityTemplate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildAccountProfile {
    pub account_id: String,
    pub personality: PersonalityTemplate,
    pub engagement_style: EngagementStyle,
}

/// Profile used when nothing is stored for an account
pub fn default_profile(account_id: &str) -> ChildAccountProfile {
    ChildAccountProfile {
        account_id: account_id.to_string(),
        personality: PersonalityTemplate::default(),
        engagement_style: EngagementStyle::Supportive,
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, account_id: &str) -> Result<Option<ChildAccountProfile>>;

    async fn set_profile(&self, profile: ChildAccountProfile) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, ChildAccountProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, account_id: &str) -> Result<Option<ChildAccountProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(account_id).cloned())
    }

    async fn set_profile(&self, profile: ChildAccountProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.account_id.clone(), profile);
        Ok(())
    }
}

/// Profiles stored behind `{base}/child-accounts/{id}/profile`
pub struct HttpProfileStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpProfileStore {
    pub fn new(base_url: String) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn profile_url(&self, account_id: &str) -> String {
        format!(
            "{}/child-accounts/{}/profile",
            self.base_url,
            urlencoding::encode(account_id)
        )
    }
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn get_profile(&self, account_id: &str) -> Result<Option<ChildAccountProfile>> {
        let response = self
            .http_client
            .get(self.profile_url(account_id))
            .send()
            .await
            .context("Failed to fetch child-account profile")?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Profile backend error (status {}): {}", status, text);
        }

        let profile = response
            .json::<ChildAccountProfile>()
            .await
            .context("Failed to parse child-account profile")?;

        Ok(Some(profile))
    }

    async fn set_profile(&self, profile: ChildAccountProfile) -> Result<()> {
        let response = self
            .http_client
            .put(self.profile_url(&profile.account_id))
            .json(&profile)
            .send()
            .await
            .context("Failed to store child-account profile")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Profile backend error (status {}): {}", status, text);
        }

        log::debug!("Stored profile for {}", profile.account_id);
        Ok(())
    }
}
