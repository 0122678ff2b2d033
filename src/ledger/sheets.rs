use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{HeaderRepair, LedgerStore, keys_from_rows, repair_header};
use crate::model::{InvoiceRecord, LEDGER_HEADER, header_row};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

pub trait SheetBackend {
    fn find_spreadsheet(&self, name: &str) -> Result<Option<String>>;

    fn create_spreadsheet(&self, name: &str, worksheet: &str) -> Result<String>;

    fn share(&self, spreadsheet_id: &str, email: &str) -> Result<()>;

    fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>>;

    fn add_worksheet(&self, spreadsheet_id: &str, title: &str) -> Result<()>;

    fn read_rows(&self, spreadsheet_id: &str, worksheet: &str) -> Result<Vec<Vec<String>>>;

    fn write_header(&self, spreadsheet_id: &str, worksheet: &str) -> Result<()>;

    fn overwrite(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        rows: &[Vec<String>],
    ) -> Result<()>;

    fn append_rows(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        rows: &[Vec<String>],
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SheetsTarget {
    pub spreadsheet: String,
    pub worksheet: String,
    pub share_with: Option<String>,
}

#[derive(Debug)]
pub struct SheetsLedger<B> {
    backend: B,
    target: SheetsTarget,
    spreadsheet_id: Option<String>,
}

impl<B: SheetBackend> SheetsLedger<B> {
    pub fn new(backend: B, target: SheetsTarget) -> Self {
        Self {
            backend,
            target,
            spreadsheet_id: None,
        }
    }

    fn open(&mut self) -> Result<String> {
        if let Some(id) = &self.spreadsheet_id {
            return Ok(id.clone());
        }

        let id = match self.backend.find_spreadsheet(&self.target.spreadsheet)? {
            Some(id) => id,
            None => {
                let id = self
                    .backend
                    .create_spreadsheet(&self.target.spreadsheet, &self.target.worksheet)?;
                info!(
                    spreadsheet = %self.target.spreadsheet,
                    id = %id,
                    "created remote spreadsheet"
                );
                if let Some(email) = &self.target.share_with {
                    self.backend
                        .share(&id, email)
                        .with_context(|| format!("failed to share spreadsheet with {email}"))?;
                    info!(email = %email, "shared remote spreadsheet");
                }
                id
            }
        };

        let titles = self.backend.worksheet_titles(&id)?;
        if !titles.iter().any(|title| title == &self.target.worksheet) {
            self.backend.add_worksheet(&id, &self.target.worksheet)?;
            info!(worksheet = %self.target.worksheet, "created remote worksheet");
        }

        info!(
            url = %format!("https://docs.google.com/spreadsheets/d/{id}"),
            worksheet = %self.target.worksheet,
            "remote ledger opened"
        );
        self.spreadsheet_id = Some(id.clone());
        Ok(id)
    }
}

impl<B: SheetBackend> LedgerStore for SheetsLedger<B> {
    fn describe(&self) -> String {
        format!(
            "remote ledger {} / {}",
            self.target.spreadsheet, self.target.worksheet
        )
    }

    fn read_keys(&mut self) -> Result<HashSet<String>> {
        let id = self.open()?;
        let worksheet = self.target.worksheet.clone();
        let rows = self.backend.read_rows(&id, &worksheet)?;
        let was_empty = rows.is_empty();

        let (rows, repair) = repair_header(rows);
        match repair {
            HeaderRepair::Intact => {}
            HeaderRepair::Replaced => {
                warn!(worksheet = %worksheet, "remote header did not match; rewriting header row");
                self.backend.write_header(&id, &worksheet)?;
            }
            HeaderRepair::Inserted if was_empty => {
                self.backend.write_header(&id, &worksheet)?;
            }
            HeaderRepair::Inserted => {
                warn!(worksheet = %worksheet, "remote worksheet had no header; rewriting");
                self.backend.overwrite(&id, &worksheet, &rows)?;
            }
        }

        Ok(keys_from_rows(&rows))
    }

    fn append(&mut self, records: &[InvoiceRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let id = self.open()?;
        let rows: Vec<Vec<String>> = records.iter().map(InvoiceRecord::to_row).collect();
        self.backend
            .append_rows(&id, &self.target.worksheet, &rows)?;
        Ok(rows.len())
    }
}

#[derive(Debug, Clone)]
pub struct GoogleSheets {
    client: HttpClient,
    token_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetSheets {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl GoogleSheets {
    pub fn new(token_path: impl Into<PathBuf>) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Sheets HTTP client")?;
        Ok(Self {
            client,
            token_path: token_path.into(),
        })
    }

    fn token(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.token_path).with_context(|| {
            format!(
                "failed to read remote credential {}",
                self.token_path.display()
            )
        })?;
        let token = raw.trim();
        if token.is_empty() {
            bail!("remote credential {} is empty", self.token_path.display());
        }
        Ok(token.to_string())
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .bearer_auth(self.token()?)
            .send()
            .with_context(|| format!("{what}: request failed"))?;
        let status = response.status();
        let body: Value = response.json().unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(anyhow!("{what} failed ({status}): {message}"));
        }

        Ok(body)
    }

    fn values_url(spreadsheet_id: &str, range: &str, suffix: &str) -> Result<Url> {
        let mut url = Url::parse(SHEETS_API).context("invalid Sheets API base")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets API base cannot carry a path"))?
            .push(spreadsheet_id)
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }
}

fn sheet_range(worksheet: &str, cells: &str) -> String {
    let quoted = format!("'{}'", worksheet.replace('\'', "''"));
    if cells.is_empty() {
        quoted
    } else {
        format!("{quoted}!{cells}")
    }
}

fn header_range(worksheet: &str) -> String {
    let last_column = (b'A' + (LEDGER_HEADER.len() as u8) - 1) as char;
    sheet_range(worksheet, &format!("A1:{last_column}1"))
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetBackend for GoogleSheets {
    fn find_spreadsheet(&self, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'"),
            SPREADSHEET_MIME
        );
        let body = self.send(
            self.client.get(DRIVE_FILES_API).query(&[
                ("q", query.as_str()),
                ("fields", "files(id)"),
                ("pageSize", "1"),
            ]),
            "spreadsheet lookup",
        )?;
        let list: FileList =
            serde_json::from_value(body).context("failed to decode Drive file list")?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    fn create_spreadsheet(&self, name: &str, worksheet: &str) -> Result<String> {
        let body = self.send(
            self.client.post(SHEETS_API).json(&json!({
                "properties": { "title": name },
                "sheets": [{ "properties": { "title": worksheet } }]
            })),
            "spreadsheet creation",
        )?;
        let created: CreatedSpreadsheet =
            serde_json::from_value(body).context("failed to decode created spreadsheet")?;
        Ok(created.spreadsheet_id)
    }

    fn share(&self, spreadsheet_id: &str, email: &str) -> Result<()> {
        self.send(
            self.client
                .post(format!("{DRIVE_FILES_API}/{spreadsheet_id}/permissions"))
                .query(&[("sendNotificationEmail", "false")])
                .json(&json!({ "type": "user", "role": "writer", "emailAddress": email })),
            "spreadsheet sharing",
        )?;
        Ok(())
    }

    fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let body = self.send(
            self.client
                .get(format!("{SHEETS_API}/{spreadsheet_id}"))
                .query(&[("fields", "sheets.properties.title")]),
            "worksheet listing",
        )?;
        let sheets: SpreadsheetSheets =
            serde_json::from_value(body).context("failed to decode worksheet listing")?;
        Ok(sheets
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    fn add_worksheet(&self, spreadsheet_id: &str, title: &str) -> Result<()> {
        self.send(
            self.client
                .post(format!("{SHEETS_API}/{spreadsheet_id}:batchUpdate"))
                .json(&json!({
                    "requests": [{ "addSheet": { "properties": { "title": title } } }]
                })),
            "worksheet creation",
        )?;
        Ok(())
    }

    fn read_rows(&self, spreadsheet_id: &str, worksheet: &str) -> Result<Vec<Vec<String>>> {
        let url = Self::values_url(spreadsheet_id, &sheet_range(worksheet, ""), "")?;
        let body = self.send(self.client.get(url), "worksheet read")?;
        let range: ValueRange =
            serde_json::from_value(body).context("failed to decode worksheet values")?;
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }

    fn write_header(&self, spreadsheet_id: &str, worksheet: &str) -> Result<()> {
        let url = Self::values_url(spreadsheet_id, &header_range(worksheet), "")?;
        self.send(
            self.client
                .put(url)
                .query(&[("valueInputOption", "RAW")])
                .json(&json!({ "values": [header_row()] })),
            "header write",
        )?;
        Ok(())
    }

    fn overwrite(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        rows: &[Vec<String>],
    ) -> Result<()> {
        let range = sheet_range(worksheet, "");
        let clear = Self::values_url(spreadsheet_id, &range, ":clear")?;
        self.send(self.client.post(clear).json(&json!({})), "worksheet clear")?;

        let url = Self::values_url(spreadsheet_id, &sheet_range(worksheet, "A1"), "")?;
        self.send(
            self.client
                .put(url)
                .query(&[("valueInputOption", "RAW")])
                .json(&json!({ "values": rows })),
            "worksheet rewrite",
        )?;
        Ok(())
    }

    fn append_rows(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        rows: &[Vec<String>],
    ) -> Result<()> {
        let url = Self::values_url(spreadsheet_id, &sheet_range(worksheet, "A1"), ":append")?;
        self.send(
            self.client
                .post(url)
                .query(&[
                    ("valueInputOption", "RAW"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&json!({ "values": rows })),
            "row append",
        )?;
        Ok(())
    }
}
