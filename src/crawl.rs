use compact_str::CompactString;

use crate::{
    config::Config,
    damage::{self, Reading, Role},
    fetch::{Fetcher, Renderer},
    reconcile::{cell, column_index, column_letter, grid_cell, is_numeric},
    sheets::{CellValue, SheetStore},
    util::pause,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// No URL in the row.
    Skipped,
    Updated(Reading),
    /// Nothing usable was fetched and the failure marker was written.
    MarkedFailed(String),
    /// Nothing usable was fetched but an earlier number was left in place.
    KeptExisting(String),
    /// Writing the result back failed.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct RowResult {
    pub row: u32,
    pub url: String,
    pub outcome: RowOutcome,
}

#[derive(Debug, Default)]
pub struct SheetReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<RowResult>,
}

impl SheetReport {
    fn record(&mut self, row: u32, url: &str, outcome: RowOutcome) {
        self.processed += 1;
        match outcome {
            RowOutcome::Skipped => self.skipped += 1,
            RowOutcome::Updated(_) => self.updated += 1,
            RowOutcome::MarkedFailed(_) | RowOutcome::KeptExisting(_) | RowOutcome::Error(_) => {
                self.failed += 1;
            }
        }
        self.details.push(RowResult {
            row,
            url: url.to_owned(),
            outcome,
        });
    }
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub sheets: Vec<(CompactString, Result<SheetReport, String>)>,
}

impl CrawlReport {
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

    pub fn log_summary(&self) {
        for (name, result) in &self.sheets {
            tracing::info!(target: "crawl", "\x1b[1m=== {name} ===\x1b[0m");
            match result {
                Ok(r) => tracing::info!(
                    target: "crawl",
                    "processed {} | updated {} | failed {} | skipped {}",
                    r.processed,
                    r.updated,
                    r.failed,
                    r.skipped,
                ),
                Err(e) => tracing::error!(target: "crawl", "\x1b[31msheet failed: {e}\x1b[0m"),
            }
        }
    }
}

/// Column positions of one sheet's row block, relative to its first column.
struct Layout {
    first: usize,
    last: usize,
    url: usize,
    role: usize,
    damage: usize,
}

impl Layout {
    fn new(config: &Config) -> anyhow::Result<Self> {
        let d = &config.damage_sheet;
        let index = |c: &str| column_index(c).ok_or_else(|| anyhow::anyhow!("bad column {c:?}"));
        let (url, role, damage) = (index(&d.url_column)?, index(&d.role_column)?, index(&d.damage_column)?);
        let first = url.min(role).min(damage);
        let last = url.max(role).max(damage);
        Ok(Self {
            first,
            last,
            url: url - first,
            role: role - first,
            damage: damage - first,
        })
    }

    fn range(&self, start: u32, end: u32) -> String {
        format!(
            "{}{start}:{}{end}",
            column_letter(self.first),
            column_letter(self.last)
        )
    }
}

pub struct DamageCrawler<'c, S, R> {
    pub sheets: S,
    pub fetcher: Fetcher<R>,
    pub config: &'c Config,
}

impl<S: SheetStore, R: Renderer> DamageCrawler<'_, S, R> {
    async fn mark_failed(&self, sheet: &str, row: u32, existing: &str, reason: String) -> anyhow::Result<RowOutcome> {
        let d = &self.config.damage_sheet;
        let at = cell(&d.damage_column, row);
        if is_numeric(existing) {
            tracing::info!(target: "crawl", "[{sheet}] {at} keeps {}: {reason}", existing.trim());
            return Ok(RowOutcome::KeptExisting(reason));
        }
        self.sheets
            .write_cell(sheet, &at, CellValue::Text(d.failure_marker.clone()))
            .await?;
        tracing::warn!(target: "crawl", "[{sheet}] {at} marked {}: {reason}", d.failure_marker);
        Ok(RowOutcome::MarkedFailed(reason))
    }

    async fn write_reading(&self, sheet: &str, row: u32, reading: Reading) -> anyhow::Result<()> {
        let d = &self.config.damage_sheet;
        let mut updates = vec![(cell(&d.damage_column, row), CellValue::Number(reading.damage))];
        if !reading.unit.is_empty() {
            updates.push((cell(&d.unit_column, row), CellValue::from(reading.unit)));
        }
        self.sheets.write_cells(sheet, &updates).await
    }

    /// Fetches one row's page and writes what it found; `url` is non-empty.
    pub async fn process_row(
        &self,
        sheet: &str,
        row: u32,
        url: &str,
        role: Role,
        existing: &str,
    ) -> anyhow::Result<RowOutcome> {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => return self.mark_failed(sheet, row, existing, e.to_string()).await,
        };

        let values = damage::extract(&html);
        let Some(reading) = damage::select(&values, role) else {
            return self
                .mark_failed(sheet, row, existing, "no damage values on page".to_owned())
                .await;
        };

        self.write_reading(sheet, row, reading).await?;
        tracing::info!(
            target: "crawl",
            "[{sheet}] row {row} ({role:?}): \x1b[36m{}{}\x1b[0m",
            reading.damage,
            reading.unit,
        );
        Ok(RowOutcome::Updated(reading))
    }

    pub async fn crawl_sheet(&self, sheet: &str) -> anyhow::Result<SheetReport> {
        let d = &self.config.damage_sheet;
        let layout = Layout::new(self.config)?;
        let grid = self
            .sheets
            .read_range(sheet, &layout.range(d.start_row, d.end_row))
            .await?;

        let mut report = SheetReport::default();
        for row in d.start_row..=d.end_row {
            let url = grid_cell(&grid, d.start_row, row, layout.url).trim();
            if url.is_empty() {
                tracing::debug!(target: "crawl", "[{sheet}] row {row}: no url");
                report.record(row, url, RowOutcome::Skipped);
                continue;
            }
            let role = Role::parse(grid_cell(&grid, d.start_row, row, layout.role));
            let existing = grid_cell(&grid, d.start_row, row, layout.damage);

            tracing::info!(target: "crawl", "[{sheet}] row {row}: {url} ({role:?})");
            let outcome = self
                .process_row(sheet, row, url, role, existing)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(target: "crawl", "\x1b[31m[{sheet}] row {row}: {e:#}\x1b[0m");
                    RowOutcome::Error(format!("{e:#}"))
                });
            report.record(row, url, outcome);

            pause(self.config.pacing.row_ms, self.config.pacing.jitter_ms).await;
        }
        Ok(report)
    }

    pub async fn run<N: AsRef<str>>(&self, sheets: &[N]) -> CrawlReport {
        let mut report = CrawlReport::default();
        for (i, sheet) in sheets.iter().enumerate() {
            let sheet = sheet.as_ref();
            tracing::info!(target: "crawl", "\x1b[1m[{sheet}]\x1b[0m ({}/{})", i + 1, sheets.len());

            let result = self.crawl_sheet(sheet).await.map_err(|e| format!("{e:#}"));
            if let Err(e) = &result {
                tracing::error!(target: "crawl", "\x1b[31m[{sheet}] {e}\x1b[0m");
            }
            report.sheets.push((sheet.into(), result));

            if i + 1 < sheets.len() {
                pause(self.config.pacing.crawl_sheet_ms, self.config.pacing.jitter_ms).await;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_spans_used_columns() {
        let config = Config::default();
        let layout = Layout::new(&config).unwrap();
        assert_eq!((layout.first, layout.last), (4, 10));
        assert_eq!((layout.url, layout.role, layout.damage), (6, 2, 0));
        assert_eq!(layout.range(7, 30), "D7:J30");
    }

    #[test]
    fn all_sheets_failing_is_an_error() {
        let mut report = CrawlReport::default();
        assert!(report.ensure_any_ran().is_ok());

        report.sheets.push(("a".into(), Err("token exchange failed: 400".into())));
        report.sheets.push(("b".into(), Err("token exchange failed: 400".into())));
        let err = report.ensure_any_ran().unwrap_err().to_string();
        assert!(err.contains("all 2 sheets failed"), "{err}");
        assert!(err.contains("token exchange"), "{err}");

        report.sheets.push(("c".into(), Ok(SheetReport::default())));
        assert!(report.ensure_any_ran().is_ok());
    }

    #[test]
    fn report_counts() {
        let mut r = SheetReport::default();
        r.record(7, "", RowOutcome::Skipped);
        r.record(8, "u", RowOutcome::Updated(Reading { damage: 1, unit: "억" }));
        r.record(9, "u", RowOutcome::MarkedFailed("x".into()));
        r.record(10, "u", RowOutcome::KeptExisting("x".into()));
        r.record(11, "u", RowOutcome::Error("x".into()));
        assert_eq!((r.processed, r.updated, r.failed, r.skipped), (5, 1, 3, 1));
    }
}
