//! HTTP detail provider
//!
//! Killmail detail and names come from ESI; monitored systems and local
//! characters come from the map API, authenticated with a bearer token.

use super::{DetailProvider, NameKind};
use crate::config::Settings;
use crate::error::{KillfeedError, Result};
use crate::types::{KillmailDetail, LocalCharacter, MonitoredSystem};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct NameResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SystemRow {
    #[serde(default)]
    name: String,
    solar_system_id: i64,
}

#[derive(Debug, Deserialize)]
struct CharacterRow {
    character: CharacterInfo,
}

#[derive(Debug, Deserialize)]
struct CharacterInfo {
    #[serde(default)]
    eve_id: String,
    #[serde(default)]
    corporation_id: Option<i64>,
    #[serde(default)]
    alliance_id: Option<i64>,
}

/// `DetailProvider` backed by ESI and the map API
pub struct HttpDetailProvider {
    client: reqwest::Client,
    esi_base_url: String,
    map_base_url: String,
    map_token: String,
}

impl HttpDetailProvider {
    /// Build a provider whose every request carries `timeout`
    pub fn new(
        esi_base_url: impl Into<String>,
        map_base_url: impl Into<String>,
        map_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("a3s-killfeed/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| KillfeedError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            esi_base_url: esi_base_url.into().trim_end_matches('/').to_string(),
            map_base_url: map_base_url.into().trim_end_matches('/').to_string(),
            map_token: map_token.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.esi_base_url,
            &settings.map_api.base_url,
            &settings.map_api.token,
            settings.request_timeout(),
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| KillfeedError::lookup(what, e))?;

        if !response.status().is_success() {
            return Err(KillfeedError::lookup(
                what,
                format!("status {}", response.status()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| KillfeedError::lookup(what, format!("invalid body: {}", e)))
    }

    async fn esi_name(&self, kind: NameKind, path: &str, id: i64) -> Result<String> {
        let url = format!("{}/{}/{}/", self.esi_base_url, path, id);
        let what = format!("{} {}", kind.as_str(), id);
        let body: NameResponse = self.get_json(&what, self.client.get(&url)).await?;
        Ok(body.name)
    }

    fn map_request(&self, resource: &str, source: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.map_base_url, resource);
        self.client
            .get(url)
            .query(&[("slug", source)])
            .bearer_auth(&self.map_token)
    }
}

#[async_trait]
impl DetailProvider for HttpDetailProvider {
    async fn fetch_killmail(&self, id: i64, hash: &str) -> Result<KillmailDetail> {
        let url = format!("{}/killmails/{}/{}/", self.esi_base_url, id, hash);
        tracing::debug!(killmail_id = id, url = %url, "Fetching killmail detail");
        self.get_json(&format!("killmail {}", id), self.client.get(&url))
            .await
    }

    async fn resolve_character_name(&self, id: i64) -> Result<String> {
        self.esi_name(NameKind::Character, "characters", id).await
    }

    async fn resolve_corporation_name(&self, id: i64) -> Result<String> {
        self.esi_name(NameKind::Corporation, "corporations", id).await
    }

    async fn resolve_alliance_name(&self, id: i64) -> Result<String> {
        self.esi_name(NameKind::Alliance, "alliances", id).await
    }

    async fn resolve_system_name(&self, id: i64) -> Result<String> {
        self.esi_name(NameKind::System, "universe/systems", id).await
    }

    async fn resolve_type_name(&self, id: i64) -> Result<String> {
        self.esi_name(NameKind::Type, "universe/types", id).await
    }

    async fn list_monitored_systems(&self, source: &str) -> Result<Vec<MonitoredSystem>> {
        let body: DataEnvelope<SystemRow> = self
            .get_json("monitored systems", self.map_request("systems", source))
            .await?;

        Ok(body
            .data
            .into_iter()
            .map(|row| MonitoredSystem {
                system_id: row.solar_system_id,
                alias: row.name,
            })
            .collect())
    }

    async fn list_local_characters(&self, source: &str) -> Result<Vec<LocalCharacter>> {
        let body: DataEnvelope<CharacterRow> = self
            .get_json("local characters", self.map_request("characters", source))
            .await?;

        let mut characters = Vec::with_capacity(body.data.len());
        for row in body.data {
            match row.character.eve_id.parse::<i64>() {
                Ok(character_id) => characters.push(LocalCharacter {
                    character_id,
                    corporation_id: row.character.corporation_id,
                    alliance_id: row.character.alliance_id,
                }),
                Err(_) => tracing::warn!(
                    eve_id = %row.character.eve_id,
                    "Skipping local character with unparseable id"
                ),
            }
        }
        Ok(characters)
    }
}
