use std::fmt;

use serde::{Deserialize, Serialize};

pub const LEDGER_HEADER: [&str; 10] = [
    "Archivo",
    "Periodo",
    "Emitida el",
    "Fecha Límite de Pago",
    "Vencimiento",
    "Consumo KwH",
    "Consumo Último Año",
    "Consumo Promedio Diario",
    "Cargo Fijo",
    "Valor KwH",
];

pub const DOCUMENT_EXTENSION: &str = "pdf";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().replace(['/', '\\'], "-");
        if normalized.is_empty() {
            return None;
        }

        Some(Self(normalized))
    }

    pub fn filename(&self) -> String {
        format!("{}.{}", self.0, DOCUMENT_EXTENSION)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub period: Option<String>,
    pub issued_on: Option<String>,
    pub payment_due_date: Option<String>,
    pub due_date: Option<String>,
    pub consumption: Option<u64>,
    pub trailing_year_avg_consumption: Option<u64>,
    pub daily_avg_consumption: Option<u64>,
    pub fixed_charge: Option<String>,
    pub unit_price_kwh: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub filename: String,
    #[serde(flatten)]
    pub fields: ExtractedFields,
}

impl InvoiceRecord {
    pub fn new(filename: impl Into<String>, fields: ExtractedFields) -> Self {
        Self {
            filename: filename.into(),
            fields,
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        let f = &self.fields;
        vec![
            self.filename.clone(),
            text_cell(&f.period),
            text_cell(&f.issued_on),
            text_cell(&f.payment_due_date),
            text_cell(&f.due_date),
            number_cell(f.consumption),
            number_cell(f.trailing_year_avg_consumption),
            number_cell(f.daily_avg_consumption),
            text_cell(&f.fixed_charge),
            text_cell(&f.unit_price_kwh),
        ]
    }

    pub fn from_row(row: &[String]) -> Option<Self> {
        let cell = |index: usize| {
            row.get(index)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
        };
        let number = |index: usize| cell(index).and_then(|value| value.parse::<u64>().ok());

        let filename = cell(0)?;
        Some(Self {
            filename,
            fields: ExtractedFields {
                period: cell(1),
                issued_on: cell(2),
                payment_due_date: cell(3),
                due_date: cell(4),
                consumption: number(5),
                trailing_year_avg_consumption: number(6),
                daily_avg_consumption: number(7),
                fixed_charge: cell(8),
                unit_price_kwh: cell(9),
            },
        })
    }
}

fn text_cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number_cell(value: Option<u64>) -> String {
    value.map(|number| number.to_string()).unwrap_or_default()
}

pub fn header_row() -> Vec<String> {
    LEDGER_HEADER.iter().map(|cell| cell.to_string()).collect()
}

pub fn is_canonical_header(row: &[String]) -> bool {
    row.len() == LEDGER_HEADER.len()
        && row
            .iter()
            .zip(LEDGER_HEADER.iter())
            .all(|(cell, expected)| cell.trim() == *expected)
}

pub fn looks_like_data_row(row: &[String]) -> bool {
    row.first()
        .map(|cell| {
            cell.trim()
                .to_ascii_lowercase()
                .ends_with(&format!(".{DOCUMENT_EXTENSION}"))
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPaths {
    pub download_dir: String,
    pub output_dir: String,
    pub ledger_path: String,
    pub remote_ledger: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub pages_visited: usize,
    pub rows_seen: usize,
    pub duplicate_rows: usize,
    pub already_present: usize,
    pub downloaded: usize,
    pub download_failures: usize,
    pub candidates: usize,
    pub eligible: usize,
    pub ingested: usize,
    pub missing_files: usize,
    pub extraction_failures: usize,
    pub local_appended: usize,
    pub remote_appended: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: RunPaths,
    pub counts: RunCounts,
    pub documents: Vec<DocumentEntry>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}
