use core::time::Duration;
use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use chrono::NaiveTime;
use compact_str::CompactString;
use hashbrown::HashMap;
use serde::Deserialize;

use crate::reconcile::column_index;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub damage_sheet: DamageSheet,
    pub raid: RaidConfig,
    pub neople: NeopleConfig,
    pub pacing: Pacing,
    pub schedule: Schedule,
    /// Per-player sheets, visited in order.
    pub sheet_names: Vec<CompactString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlerConfig {
    pub retries: u32,
    pub timeout_ms: u64,
    pub delay_ms: u64,
    pub backoff: f64,
    /// Pages shorter than this (in bytes) are treated as half-loaded.
    pub min_html_size: usize,
    pub renderer: RendererConfig,
    pub user_agent: String,
    pub settle_ms: u64,
    pub wait_for_data_ms: u64,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum RendererConfig {
    Chrome {
        #[serde(default = "yes")]
        headless: bool,
    },
    Script {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DamageSheet {
    pub start_row: u32,
    pub end_row: u32,
    pub url_column: CompactString,
    pub role_column: CompactString,
    pub damage_column: CompactString,
    pub unit_column: CompactString,
    pub failure_marker: CompactString,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaidConfig {
    pub server_cell: CompactString,
    pub name_column: CompactString,
    pub name_start_row: u32,
    pub name_end_row: u32,
    pub content_sheet: CompactString,
    pub content_range: CompactString,
    pub window_days: i64,
    pub targets: Vec<RaidTarget>,
    /// Korean server name (as typed in the sheet) -> API server id.
    pub server_mapping: HashMap<CompactString, CompactString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaidTarget {
    pub name: CompactString,
    #[serde(default = "raid_code")]
    pub code: i64,
    pub keywords: Vec<CompactString>,
    /// Which checkbox of the character's row (0 = first) marks this raid.
    #[serde(default)]
    pub checkbox: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeopleConfig {
    pub base_url: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Pacing {
    pub row_ms: u64,
    pub crawl_sheet_ms: u64,
    pub character_ms: u64,
    pub raid_sheet_ms: u64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Schedule {
    pub at: CompactString,
    pub utc_offset_hours: i32,
}

const fn yes() -> bool {
    true
}

const fn raid_code() -> i64 {
    201
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_ms: 60000,
            delay_ms: 1000,
            backoff: 1.5,
            min_html_size: 760_000,
            renderer: RendererConfig::Chrome { headless: true },
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            settle_ms: 2000,
            wait_for_data_ms: 10000,
            proxy: None,
        }
    }
}

impl Default for DamageSheet {
    fn default() -> Self {
        Self {
            start_row: 7,
            end_row: 30,
            url_column: "J".into(),
            role_column: "F".into(),
            damage_column: "D".into(),
            unit_column: "E".into(),
            failure_marker: "수집실패".into(),
        }
    }
}

impl Default for RaidTarget {
    fn default() -> Self {
        Self {
            name: "nabal".into(),
            code: raid_code(),
            keywords: vec!["나벨".into(), "nabal".into()],
            checkbox: 0,
        }
    }
}

#[rustfmt::skip]
const SERVERS: [(&str, &str); 8] = [
    ("안톤", "anton"),
    ("바칼", "bakal"),
    ("카인", "cain"),
    ("카시야스", "casillas"),
    ("디레지에", "diregie"),
    ("힐더", "hilder"),
    ("프레이", "prey"),
    ("시로코", "siroco"),
];

impl Default for RaidConfig {
    fn default() -> Self {
        Self {
            server_cell: "B3".into(),
            name_column: "B".into(),
            name_start_row: 7,
            name_end_row: 30,
            content_sheet: "컨텐츠 현황".into(),
            content_range: "A:Z".into(),
            window_days: 7,
            targets: vec![RaidTarget::default()],
            server_mapping: SERVERS
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Default for NeopleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.neople.co.kr".to_owned(),
            version: "df".to_owned(),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            row_ms: 1000,
            crawl_sheet_ms: 3000,
            character_ms: 1000,
            raid_sheet_ms: 2000,
            jitter_ms: 0,
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            at: "00:00".into(),
            utc_offset_hours: 9,
        }
    }
}

impl CrawlerConfig {
    #[inline]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    #[inline]
    pub const fn wait_for_data(&self) -> Duration {
        Duration::from_millis(self.wait_for_data_ms)
    }
}

impl Schedule {
    pub fn time(&self) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.at, "%H:%M")
            .with_context(|| format!("schedule.at: {:?} is not HH:MM", self.at))
    }
}

fn check_column(field: &str, column: &str) -> anyhow::Result<()> {
    if column_index(column).is_none() {
        anyhow::bail!("{field}: {column:?} is not a column letter");
    }
    Ok(())
}

impl Config {
    /// Reads the JSON config at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match File::open(path) {
            Ok(file) => serde_json::from_reader::<_, Self>(BufReader::new(file))
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(target: "config", "{} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("opening {}", path.display()))),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config = serde_json::from_str::<Self>(text)?;
        config.validate()?;
        Ok(config)
    }

    /// `only` when given, else every configured sheet; never empty.
    pub fn sheets_to_visit(&self, only: Option<CompactString>) -> anyhow::Result<Vec<CompactString>> {
        let sheets = only.map_or_else(|| self.sheet_names.clone(), |s| vec![s]);
        if sheets.is_empty() {
            anyhow::bail!("no sheets to visit: set sheet_names in the config or pass --sheet");
        }
        Ok(sheets)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.crawler;
        if c.retries == 0 {
            anyhow::bail!("crawler.retries: must be at least 1");
        }
        if !(c.backoff >= 1.0) {
            anyhow::bail!("crawler.backoff: must be >= 1.0, got {}", c.backoff);
        }

        let d = &self.damage_sheet;
        if d.start_row == 0 || d.start_row > d.end_row {
            anyhow::bail!("damage_sheet: bad row range {}..={}", d.start_row, d.end_row);
        }
        check_column("damage_sheet.url_column", &d.url_column)?;
        check_column("damage_sheet.role_column", &d.role_column)?;
        check_column("damage_sheet.damage_column", &d.damage_column)?;
        check_column("damage_sheet.unit_column", &d.unit_column)?;

        let r = &self.raid;
        if r.name_start_row == 0 || r.name_start_row > r.name_end_row {
            anyhow::bail!("raid: bad name row range {}..={}", r.name_start_row, r.name_end_row);
        }
        check_column("raid.name_column", &r.name_column)?;
        if r.window_days <= 0 {
            anyhow::bail!("raid.window_days: must be positive");
        }
        for target in &r.targets {
            if target.keywords.is_empty() {
                anyhow::bail!("raid.targets[{}]: no keywords", target.name);
            }
        }

        self.schedule.time()?;
        if !(-12..=14).contains(&self.schedule.utc_offset_hours) {
            anyhow::bail!("schedule.utc_offset_hours: {} out of range", self.schedule.utc_offset_hours);
        }

        Ok(())
    }
}
