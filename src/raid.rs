use chrono::{DateTime, FixedOffset, TimeDelta};
use compact_str::CompactString;

use crate::{
    config::{Config, RaidTarget},
    neople::{Activity, GameApi},
    reconcile::{cell, column_letter, find_character_row, find_checkbox, range_origin},
    sheets::{CellValue, SheetStore},
    util::{pause, rate},
};

/// Whether `activity` is a clear of `target` no earlier than `since`.
pub fn clears(activity: &Activity, target: &RaidTarget, since: DateTime<FixedOffset>) -> bool {
    if activity.code != target.code {
        return false;
    }
    let Some(time) = activity.time() else {
        tracing::warn!(target: "raid", "unreadable activity date {:?}", activity.date);
        return false;
    };
    if time < since {
        return false;
    }
    let raid = activity.raid_name().to_lowercase();
    target
        .keywords
        .iter()
        .any(|k| raid.contains(&*k.to_lowercase()))
}

/// Targets with a qualifying clear in the trailing `window_days`.
pub fn cleared_targets<'t>(
    timeline: &[Activity],
    targets: &'t [RaidTarget],
    now: DateTime<FixedOffset>,
    window_days: i64,
) -> Vec<&'t RaidTarget> {
    let since = now - TimeDelta::days(window_days);
    targets
        .iter()
        .filter(|t| timeline.iter().any(|a| clears(a, t, since)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Cleared(Vec<CompactString>),
    NotCleared,
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CharacterResult {
    pub row: u32,
    pub name: CompactString,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct SheetReport {
    pub server: CompactString,
    pub checked: usize,
    pub cleared: usize,
    pub failed: usize,
    pub details: Vec<CharacterResult>,
}

impl SheetReport {
    #[inline]
    pub fn clear_rate(&self) -> Option<f64> {
        rate(self.cleared, self.checked)
    }

    fn record(&mut self, row: u32, name: CompactString, outcome: Outcome) {
        match outcome {
            Outcome::Cleared(_) => {
                self.checked += 1;
                self.cleared += 1;
            }
            Outcome::NotCleared | Outcome::NotFound => self.checked += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
        self.details.push(CharacterResult { row, name, outcome });
    }
}

#[derive(Debug, Default)]
pub struct RaidReport {
    pub sheets: Vec<(CompactString, Result<SheetReport, String>)>,
}

impl RaidReport {
    /// Fails when sheets were visited and every one of them failed.
    pub fn ensure_any_ran(&self) -> anyhow::Result<()> {
        if self.sheets.iter().any(|(_, r)| r.is_ok()) {
            return Ok(());
        }
        match self.sheets.first() {
            Some((name, Err(e))) => anyhow::bail!("all {} sheets failed, first {name}: {e}", self.sheets.len()),
            _ => Ok(()),
        }
    }

    /// `(checked, cleared, failed)` over the sheets that ran.
    pub fn totals(&self) -> (usize, usize, usize) {
        self.sheets
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .fold((0, 0, 0), |(a, b, c), r| (a + r.checked, b + r.cleared, c + r.failed))
    }

    pub fn log_summary(&self) {
        tracing::info!(target: "raid", "\x1b[1msummary\x1b[0m");
        for (name, result) in &self.sheets {
            match result {
                Ok(r) => {
                    tracing::info!(target: "raid", "{name}: checked {} | cleared {} | failed {}", r.checked, r.cleared, r.failed);
                    if let Some(rate) = r.clear_rate() {
                        tracing::info!(target: "raid", "  └─ clear rate {rate:.1}%");
                    }
                }
                Err(e) => tracing::error!(target: "raid", "\x1b[31m{name}: {e}\x1b[0m"),
            }
        }
        if self.sheets.len() > 1 {
            let (checked, cleared, failed) = self.totals();
            tracing::info!(target: "raid", "\x1b[36mtotal\x1b[0m: checked {checked} | cleared {cleared} | failed {failed}");
            if let Some(rate) = rate(cleared, checked) {
                tracing::info!(target: "raid", "\x1b[36moverall clear rate {rate:.1}%\x1b[0m");
            }
        }
    }
}

pub struct RaidChecker<'c, S, A> {
    pub sheets: S,
    pub api: A,
    pub config: &'c Config,
}

impl<S: SheetStore, A: GameApi> RaidChecker<'_, S, A> {
    async fn server_of(&self, sheet: &str) -> anyhow::Result<CompactString> {
        let raid = &self.config.raid;
        let grid = self.sheets.read_range(sheet, &raid.server_cell).await?;
        let korean = grid
            .first()
            .and_then(|r| r.first())
            .map_or("", |s| s.trim());
        if korean.is_empty() {
            anyhow::bail!("no server name in {}", raid.server_cell);
        }
        raid.server_mapping
            .get(korean)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {korean:?}"))
    }

    async fn characters_of(&self, sheet: &str) -> anyhow::Result<Vec<(u32, CompactString)>> {
        let raid = &self.config.raid;
        let range = format!(
            "{col}{}:{col}{}",
            raid.name_start_row,
            raid.name_end_row,
            col = raid.name_column,
        );
        let grid = self.sheets.read_range(sheet, &range).await?;
        Ok(grid
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let name = row.first()?.trim();
                (!name.is_empty()).then(|| (raid.name_start_row + i as u32, name.into()))
            })
            .collect())
    }

    /// `None` when the API knows no such character.
    async fn check_character(
        &self,
        server: &str,
        name: &str,
        now: DateTime<FixedOffset>,
    ) -> anyhow::Result<Option<Vec<&RaidTarget>>> {
        let found = self.api.search_character(server, name).await?;
        let Some(character) = found.first() else {
            return Ok(None);
        };
        let timeline = self.api.timeline(server, &character.character_id).await?;
        tracing::debug!(
            target: "raid",
            "{name} ({}): {} activities, head {:?}",
            character.character_id,
            timeline.len(),
            timeline.iter().take(5).map(|a| (&a.date, a.code, a.raid_name())).collect::<Vec<_>>(),
        );
        Ok(Some(cleared_targets(
            &timeline,
            &self.config.raid.targets,
            now,
            self.config.raid.window_days,
        )))
    }

    /// Ticks the character's checkbox for each target on the content sheet.
    /// Returns how many cells were written.
    pub async fn mark_cleared(&self, name: &str, targets: &[&RaidTarget]) -> anyhow::Result<usize> {
        let raid = &self.config.raid;
        let (origin_row, origin_col) = range_origin(&raid.content_range)
            .ok_or_else(|| anyhow::anyhow!("bad content range {:?}", raid.content_range))?;
        let grid = self.sheets.read_range(&raid.content_sheet, &raid.content_range).await?;

        let Some(row) = find_character_row(&grid, name) else {
            tracing::warn!(target: "raid", "{name} has no row on {}", raid.content_sheet);
            return Ok(0);
        };
        let cells = &grid[row as usize - 1];
        let sheet_row = origin_row + row - 1;

        let mut written = 0;
        for target in targets {
            let Some(col) = find_checkbox(cells, target.checkbox) else {
                tracing::warn!(target: "raid", "{name} (row {sheet_row}) has no checkbox #{} for {}", target.checkbox, target.name);
                continue;
            };
            let at = cell(&column_letter(origin_col + col - 1), sheet_row);
            self.sheets
                .write_cell(&raid.content_sheet, &at, CellValue::Bool(true))
                .await?;
            tracing::info!(target: "raid", "\x1b[36m{name}\x1b[0m: {} ticked at {at}", target.name);
            written += 1;
        }
        Ok(written)
    }

    pub async fn check_sheet(&self, sheet: &str, now: DateTime<FixedOffset>) -> anyhow::Result<SheetReport> {
        let server = self.server_of(sheet).await?;
        tracing::info!(target: "raid", "[{sheet}] server {server}");

        let mut report = SheetReport {
            server: server.clone(),
            ..SheetReport::default()
        };

        let characters = self.characters_of(sheet).await?;
        if characters.is_empty() {
            tracing::warn!(target: "raid", "[{sheet}] no characters");
            return Ok(report);
        }
        tracing::info!(target: "raid", "[{sheet}] {} characters", characters.len());

        for (row, name) in characters {
            let outcome = match self.check_character(&server, &name, now).await {
                Ok(None) => {
                    tracing::info!(target: "raid", "{name}: not found on {server}");
                    Outcome::NotFound
                }
                Ok(Some(targets)) if targets.is_empty() => {
                    tracing::info!(target: "raid", "{name}: \x1b[33mnot cleared\x1b[0m");
                    Outcome::NotCleared
                }
                Ok(Some(targets)) => {
                    tracing::info!(target: "raid", "{name}: \x1b[32mcleared\x1b[0m");
                    if let Err(e) = self.mark_cleared(&name, &targets).await {
                        tracing::error!(target: "raid", "\x1b[31m{name}: updating {} failed: {e:#}\x1b[0m", self.config.raid.content_sheet);
                    }
                    Outcome::Cleared(targets.iter().map(|t| t.name.clone()).collect())
                }
                Err(e) => {
                    tracing::warn!(target: "raid", "{name}: check failed: {e:#}");
                    Outcome::Failed(format!("{e:#}"))
                }
            };
            report.record(row, name, outcome);
            pause(self.config.pacing.character_ms, self.config.pacing.jitter_ms).await;
        }

        Ok(report)
    }

    pub async fn run<N: AsRef<str>>(&self, sheets: &[N], now: DateTime<FixedOffset>) -> RaidReport {
        let mut report = RaidReport::default();
        for (i, sheet) in sheets.iter().enumerate() {
            let sheet = sheet.as_ref();
            tracing::info!(target: "raid", "\x1b[1m[{sheet}]\x1b[0m ({}/{})", i + 1, sheets.len());

            let result = self.check_sheet(sheet, now).await.map_err(|e| format!("{e:#}"));
            match &result {
                Ok(r) => tracing::info!(target: "raid", "[{sheet}] done: checked {}, cleared {}", r.checked, r.cleared),
                Err(e) => tracing::error!(target: "raid", "\x1b[31m[{sheet}] {e}\x1b[0m"),
            }
            report.sheets.push((sheet.into(), result));

            if i + 1 < sheets.len() {
                pause(self.config.pacing.raid_sheet_ms, self.config.pacing.jitter_ms).await;
            }
        }
        report
    }
}
