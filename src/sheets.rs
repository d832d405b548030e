use core::fmt;

use compact_str::CompactString;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod auth;
pub mod memory;

pub use auth::{ServiceAccount, TokenSource};

const BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

/// A value written into a single cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(CompactString),
    Number(u64),
    Bool(bool),
}

impl fmt::Display for CellValue {
    /// Renders the value the way the sheet displays it when read back.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<u64> for CellValue {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Cell-level access to one spreadsheet, addressed by sheet name and A1 range.
pub trait SheetStore {
    /// Rows of formatted cell strings; trailing empty rows and cells are absent.
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>>;

    async fn write_cell(&self, sheet: &str, cell: &str, value: CellValue) -> anyhow::Result<()>;

    async fn write_cells(&self, sheet: &str, updates: &[(String, CellValue)]) -> anyhow::Result<()>;
}

impl<S: SheetStore + ?Sized> SheetStore for &S {
    #[inline]
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>> {
        (**self).read_range(sheet, range).await
    }

    #[inline]
    async fn write_cell(&self, sheet: &str, cell: &str, value: CellValue) -> anyhow::Result<()> {
        (**self).write_cell(sheet, cell, value).await
    }

    #[inline]
    async fn write_cells(&self, sheet: &str, updates: &[(String, CellValue)]) -> anyhow::Result<()> {
        (**self).write_cells(sheet, updates).await
    }
}

/// `'sheet name'!range`, with quotes in the name doubled.
pub fn a1(sheet: &str, range: &str) -> String {
    format!("'{}'!{range}", sheet.replace('\'', "''"))
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(true) => "TRUE".to_owned(),
        Value::Bool(false) => "FALSE".to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct WriteRange<'a> {
    range: String,
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: [[&'a CellValue; 1]; 1],
}

#[derive(Serialize)]
struct BatchUpdate<'a> {
    #[serde(rename = "valueInputOption")]
    value_input_option: &'static str,
    data: Vec<WriteRange<'a>>,
}

impl<'a> WriteRange<'a> {
    fn new(sheet: &str, cell: &str, value: &'a CellValue) -> Self {
        Self {
            range: a1(sheet, cell),
            major_dimension: "ROWS",
            values: [[value]],
        }
    }
}

async fn check(resp: Response, what: &str) -> anyhow::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("{what}: {status} {}", body.trim())
}

/// Google Sheets v4 values API over a service account.
pub struct GoogleSheets {
    client: Client,
    base: Url,
    auth: TokenSource,
}

impl GoogleSheets {
    pub fn new(client: Client, spreadsheet_id: &str, account: ServiceAccount) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            base: spreadsheet_url(spreadsheet_id)?,
            auth: TokenSource::new(account)?,
        })
    }

    /// Exchanges the service-account key for a token now rather than on the first read.
    pub async fn authenticate(&self) -> anyhow::Result<()> {
        self.auth.token(&self.client).await.map(drop)
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("{} cannot take a path", self.base))?
            .extend(segments);
        Ok(url)
    }
}

fn spreadsheet_url(spreadsheet_id: &str) -> anyhow::Result<Url> {
    if spreadsheet_id.is_empty() {
        anyhow::bail!("empty spreadsheet id");
    }
    let mut url = Url::parse(BASE)?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("{BASE} cannot take a path"))?
        .pop_if_empty()
        .push(spreadsheet_id);
    Ok(url)
}

impl SheetStore for GoogleSheets {
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let full = a1(sheet, range);
        let token = self.auth.token(&self.client).await?;
        let resp = self
            .client
            .get(self.endpoint(&["values", full.as_str()])?)
            .bearer_auth(token)
            .send()
            .await?;
        let ValueRange { values } = check(resp, &format!("reading {full}")).await?.json().await?;

        tracing::debug!(target: "sheets", "read {full}: {} rows", values.len());
        Ok(values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn write_cell(&self, sheet: &str, cell: &str, value: CellValue) -> anyhow::Result<()> {
        let body = WriteRange::new(sheet, cell, &value);
        let token = self.auth.token(&self.client).await?;
        let resp = self
            .client
            .put(self.endpoint(&["values", body.range.as_str()])?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check(resp, &format!("writing {}", body.range)).await?;

        tracing::info!(target: "sheets", "\x1b[36m{}\x1b[0m <- {value}", body.range);
        Ok(())
    }

    async fn write_cells(&self, sheet: &str, updates: &[(String, CellValue)]) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let body = BatchUpdate {
            value_input_option: "RAW",
            data: updates
                .iter()
                .map(|(cell, value)| WriteRange::new(sheet, cell, value))
                .collect(),
        };
        let token = self.auth.token(&self.client).await?;
        let resp = self
            .client
            .post(self.endpoint(&["values:batchUpdate"])?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check(resp, &format!("batch writing {} cells of {sheet}", updates.len())).await?;

        for (cell, value) in updates {
            tracing::info!(target: "sheets", "\x1b[36m{}\x1b[0m <- {value}", a1(sheet, cell));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_sheet_names() {
        assert_eq!(a1("컨텐츠 현황", "A:Z"), "'컨텐츠 현황'!A:Z");
        assert_eq!(a1("Bob's", "B3"), "'Bob''s'!B3");
    }

    #[test]
    fn value_urls_escape_range() {
        let mut url = spreadsheet_url("abc123").unwrap();
        url.path_segments_mut().unwrap().extend(["values", a1("컨텐츠 현황", "A:Z").as_str()]);
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'%EC%BB%A8%ED%85%90%EC%B8%A0%20%ED%98%84%ED%99%A9'!A:Z"
        );
        assert!(spreadsheet_url("").is_err());

        let mut batch = spreadsheet_url("abc123").unwrap();
        batch.path_segments_mut().unwrap().push("values:batchUpdate");
        assert_eq!(batch.as_str(), "https://sheets.googleapis.com/v4/spreadsheets/abc123/values:batchUpdate");
    }

    #[test]
    fn cell_values_serialize_raw() {
        let body = WriteRange::new("s", "D7", &CellValue::Number(1200));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"range": "'s'!D7", "majorDimension": "ROWS", "values": [[1200]]})
        );
        assert_eq!(serde_json::to_value(CellValue::Bool(true)).unwrap(), serde_json::json!(true));
        assert_eq!(serde_json::to_value(CellValue::from("억")).unwrap(), serde_json::json!("억"));
        assert_eq!(CellValue::Bool(false).to_string(), "FALSE");
    }

    #[test]
    fn read_cells_become_strings() {
        let range: ValueRange =
            serde_json::from_str(r#"{"range": "x", "values": [["a", 1, true], [], [null]]}"#).unwrap();
        let rows: Vec<Vec<String>> = range
            .values
            .into_iter()
            .map(|r| r.into_iter().map(cell_text).collect())
            .collect();
        assert_eq!(rows, [vec!["a".to_owned(), "1".to_owned(), "TRUE".to_owned()], vec![], vec![String::new()]]);
        let empty: ValueRange = serde_json::from_str(r#"{"range": "x"}"#).unwrap();
        assert!(empty.values.is_empty());
    }
}
