//! A spreadsheet held in memory, for dry runs and tests.

use std::collections::BTreeMap;

use compact_str::CompactString;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use super::{CellValue, SheetStore, a1};
use crate::reconcile;

type Grid = BTreeMap<(u32, usize), String>;

#[derive(Default)]
pub struct MemorySheets {
    sheets: Mutex<HashMap<CompactString, Grid>>,
    writes: Mutex<Vec<(String, CellValue)>>,
    broken: Mutex<HashSet<CompactString>>,
}

fn corner(s: &str) -> anyhow::Result<(Option<usize>, Option<u32>)> {
    reconcile::corner(s).ok_or_else(|| anyhow::anyhow!("bad A1 reference {s:?}"))
}

/// `(first_row, last_row, first_col, last_col)`, 1-based and inclusive.
fn bounds(range: &str) -> anyhow::Result<(u32, u32, usize, usize)> {
    let (start, end) = range.split_once(':').unwrap_or((range, range));
    let (c0, r0) = corner(start)?;
    let (c1, r1) = corner(end)?;
    Ok((
        r0.unwrap_or(1),
        r1.unwrap_or(u32::MAX),
        c0.unwrap_or(1),
        c1.unwrap_or(usize::MAX),
    ))
}

fn single(cell: &str) -> anyhow::Result<(u32, usize)> {
    match corner(cell)? {
        (Some(col), Some(row)) => Ok((row, col)),
        _ => anyhow::bail!("{cell:?} is not a single cell"),
    }
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays `rows` into `sheet` starting at A1.
    #[must_use]
    pub fn with_rows(self, sheet: &str, rows: &[&[&str]]) -> Self {
        {
            let mut sheets = self.sheets.lock();
            let grid = sheets.entry(sheet.into()).or_default();
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    if !value.is_empty() {
                        grid.insert((r as u32 + 1, c + 1), (*value).to_owned());
                    }
                }
            }
        }
        self
    }

    pub fn set(&self, sheet: &str, cell: &str, value: &str) {
        if let Ok(at) = single(cell) {
            self.sheets
                .lock()
                .entry(sheet.into())
                .or_default()
                .insert(at, value.to_owned());
        }
    }

    pub fn get(&self, sheet: &str, cell: &str) -> Option<String> {
        let at = single(cell).ok()?;
        self.sheets.lock().get(sheet)?.get(&at).cloned()
    }

    /// Every write so far, as `('sheet'!cell, value)`.
    pub fn writes(&self) -> Vec<(String, CellValue)> {
        self.writes.lock().clone()
    }

    /// Makes every access to `sheet` fail.
    pub fn break_sheet(&self, sheet: &str) {
        self.broken.lock().insert(sheet.into());
    }

    fn guard(&self, sheet: &str) -> anyhow::Result<()> {
        if self.broken.lock().contains(sheet) {
            anyhow::bail!("sheet {sheet:?} is unavailable");
        }
        Ok(())
    }

    fn put(&self, sheet: &str, cell: &str, value: CellValue) -> anyhow::Result<()> {
        let at = single(cell)?;
        let text = value.to_string();
        {
            let mut sheets = self.sheets.lock();
            let grid = sheets.entry(sheet.into()).or_default();
            if text.is_empty() {
                grid.remove(&at);
            } else {
                grid.insert(at, text);
            }
        }
        self.writes.lock().push((a1(sheet, cell), value));
        Ok(())
    }
}

impl SheetStore for MemorySheets {
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>> {
        self.guard(sheet)?;
        let (r0, r1, c0, c1) = bounds(range)?;
        if (r0, c0) > (r1, c1) {
            anyhow::bail!("inverted range {range:?}");
        }
        let sheets = self.sheets.lock();
        let Some(grid) = sheets.get(sheet) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for (&(r, c), value) in grid.range((r0, c0)..=(r1, c1)) {
            if c < c0 || c > c1 {
                continue;
            }
            let ri = (r - r0) as usize;
            if rows.len() <= ri {
                rows.resize_with(ri + 1, Vec::new);
            }
            let row = &mut rows[ri];
            let ci = c - c0;
            if row.len() <= ci {
                row.resize(ci + 1, String::new());
            }
            row[ci].clone_from(value);
        }
        Ok(rows)
    }

    async fn write_cell(&self, sheet: &str, cell: &str, value: CellValue) -> anyhow::Result<()> {
        self.guard(sheet)?;
        self.put(sheet, cell, value)
    }

    async fn write_cells(&self, sheet: &str, updates: &[(String, CellValue)]) -> anyhow::Result<()> {
        self.guard(sheet)?;
        for (cell, _) in updates {
            single(cell)?;
        }
        for (cell, value) in updates {
            self.put(sheet, cell, value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_like_the_api() {
        let sheets = MemorySheets::new().with_rows(
            "s",
            &[&["a", "b", "c"], &[], &["", "", "x"], &["", "y"]],
        );
        assert_eq!(sheets.read_range("s", "A1:C1").await.unwrap(), [["a", "b", "c"]]);
        assert_eq!(sheets.read_range("s", "B2:C4").await.unwrap(), [vec![], vec!["", "x"], vec!["y"]]);
        assert_eq!(sheets.read_range("s", "A:A").await.unwrap(), [["a"]]);
        assert_eq!(sheets.read_range("s", "C3").await.unwrap(), [["x"]]);
        assert!(sheets.read_range("s", "D9").await.unwrap().is_empty());
        assert!(sheets.read_range("other", "A1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_are_recorded_and_visible() {
        let sheets = MemorySheets::new();
        sheets
            .write_cells("s", &[("D7".to_owned(), 1200u64.into()), ("E7".to_owned(), "억".into())])
            .await
            .unwrap();
        sheets.write_cell("s", "B2", true.into()).await.unwrap();
        assert_eq!(sheets.get("s", "D7").as_deref(), Some("1200"));
        assert_eq!(sheets.get("s", "B2").as_deref(), Some("TRUE"));
        assert_eq!(sheets.writes().len(), 3);
        assert!(sheets.write_cell("s", "B", true.into()).await.is_err());
    }

    #[tokio::test]
    async fn broken_sheet_fails() {
        let sheets = MemorySheets::new();
        sheets.break_sheet("s");
        assert!(sheets.read_range("s", "A1").await.is_err());
    }
}
