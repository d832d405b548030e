use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use compact_str::CompactString;
use reqwest::{Client, Url};
use serde::{Deserialize, de::DeserializeOwned};

use crate::config::NeopleConfig;

/// Timeline dates are Korean wall-clock time.
pub const KST_SECONDS: i32 = 9 * 3600;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRow {
    pub server_id: CompactString,
    pub character_id: CompactString,
    pub character_name: CompactString,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub job_grow_name: Option<CompactString>,
    #[serde(default)]
    pub fame: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    #[serde(default)]
    pub raid_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Activity {
    pub code: i64,
    #[serde(default)]
    pub name: CompactString,
    pub date: CompactString,
    #[serde(default)]
    pub data: ActivityData,
}

impl Activity {
    /// `YYYY-MM-DD HH:MM` read as KST.
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        let naive = NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%d %H:%M").ok()?;
        FixedOffset::east_opt(KST_SECONDS)?.from_local_datetime(&naive).single()
    }

    #[inline]
    pub fn raid_name(&self) -> &str {
        self.data.raid_name.as_deref().unwrap_or_default()
    }
}

/// Character lookups and activity history from the game's public API.
pub trait GameApi {
    async fn search_character(&self, server: &str, name: &str) -> anyhow::Result<Vec<CharacterRow>>;

    /// Most recent activity first.
    async fn timeline(&self, server: &str, character_id: &str) -> anyhow::Result<Vec<Activity>>;
}

impl<A: GameApi + ?Sized> GameApi for &A {
    #[inline]
    async fn search_character(&self, server: &str, name: &str) -> anyhow::Result<Vec<CharacterRow>> {
        (**self).search_character(server, name).await
    }

    #[inline]
    async fn timeline(&self, server: &str, character_id: &str) -> anyhow::Result<Vec<Activity>> {
        (**self).timeline(server, character_id).await
    }
}

#[derive(Deserialize)]
struct Rows<T> {
    #[serde(default = "Vec::new")]
    rows: Vec<T>,
}

#[derive(Deserialize)]
struct TimelineResp {
    timeline: Rows<Activity>,
}

#[derive(Deserialize)]
struct ErrorResp {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: CompactString,
    #[serde(default)]
    message: String,
}

pub struct NeopleClient {
    client: Client,
    base: Url,
    api_key: String,
}

impl NeopleClient {
    pub fn new(client: Client, config: &NeopleConfig, api_key: String) -> anyhow::Result<Self> {
        let mut base = Url::parse(&config.base_url)?;
        base.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("{} cannot take a path", config.base_url))?
            .pop_if_empty()
            .push(&config.version);
        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    /// `{base}/{version}/servers/{server}/characters[/...]`
    pub fn characters_url(&self, server: &str, tail: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("{} cannot take a path", self.base))?
            .extend(["servers", server, "characters"])
            .extend(tail);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, what: &str) -> anyhow::Result<T> {
        let resp = self.client.get(url).header("apikey", &self.api_key).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!(target: "neople", "{what}: {status} {} bytes", body.len());

        if !status.is_success() {
            if let Ok(ErrorResp { error }) = serde_json::from_str::<ErrorResp>(&body) {
                anyhow::bail!("{what}: {status} [{}] {}", error.code, error.message);
            }
            anyhow::bail!("{what}: {status} {}", body.trim());
        }
        serde_json::from_str(&body).map_err(|e| anyhow::anyhow!("{what}: bad body: {e}"))
    }
}

impl GameApi for NeopleClient {
    async fn search_character(&self, server: &str, name: &str) -> anyhow::Result<Vec<CharacterRow>> {
        let mut url = self.characters_url(server, &[])?;
        url.query_pairs_mut().append_pair("characterName", name);

        tracing::info!(target: "neople", "searching \x1b[33m{name}\x1b[0m on {server}");
        let Rows { rows } = self.get(url, &format!("search {name}@{server}")).await?;
        Ok(rows)
    }

    async fn timeline(&self, server: &str, character_id: &str) -> anyhow::Result<Vec<Activity>> {
        let url = self.characters_url(server, &[character_id, "timeline"])?;
        let TimelineResp { timeline } = self.get(url, &format!("timeline {character_id}@{server}")).await?;
        tracing::debug!(target: "neople", "{character_id}: {} activities", timeline.rows.len());
        Ok(timeline.rows)
    }
}
