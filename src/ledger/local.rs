use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{HeaderRepair, LedgerStore, keys_from_rows, repair_header};
use crate::model::{InvoiceRecord, header_row, is_canonical_header, looks_like_data_row};
use crate::util::ensure_directory;

#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub exists: bool,
    pub header_ok: bool,
    pub data_rows: usize,
    pub last_filename: Option<String>,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open ledger {}", self.path.display()))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .with_context(|| format!("failed to parse ledger {}", self.path.display()))?;
            rows.push(record.iter().map(ToOwned::to_owned).collect());
        }
        Ok(rows)
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        if !self.path.exists() {
            return Ok(LedgerSnapshot {
                exists: false,
                header_ok: false,
                data_rows: 0,
                last_filename: None,
            });
        }

        let rows = self.read_rows()?;
        let header_ok = rows.first().map(|row| is_canonical_header(row)).unwrap_or(false);
        let records = records_from_rows(&rows);
        Ok(LedgerSnapshot {
            exists: true,
            header_ok,
            data_rows: records.len(),
            last_filename: records.last().map(|record| record.filename.clone()),
        })
    }

    fn rewrite(&self, rows: &[Vec<String>]) -> Result<()> {
        let staging = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(&staging)
                .with_context(|| format!("failed to create {}", staging.display()))?;
            for row in rows {
                writer
                    .write_record(row)
                    .with_context(|| format!("failed to write {}", staging.display()))?;
            }
            writer
                .flush()
                .with_context(|| format!("failed to flush {}", staging.display()))?;
        }

        fs::rename(&staging, &self.path).with_context(|| {
            format!(
                "failed to replace {} with repaired ledger",
                self.path.display()
            )
        })
    }
}

impl LedgerStore for CsvLedger {
    fn describe(&self) -> String {
        format!("local ledger {}", self.path.display())
    }

    fn read_keys(&mut self) -> Result<HashSet<String>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "local ledger not found; starting empty");
            return Ok(HashSet::new());
        }

        let rows = self.read_rows()?;
        let (rows, repair) = repair_header(rows);
        if repair != HeaderRepair::Intact {
            warn!(
                path = %self.path.display(),
                repair = ?repair,
                data_rows = rows.len() - 1,
                "local ledger header did not match; rewriting"
            );
            self.rewrite(&rows)?;
        }

        Ok(keys_from_rows(&rows))
    }

    fn append(&mut self, records: &[InvoiceRecord]) -> Result<usize> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("failed to open ledger {}", self.path.display()))?;
        let fresh = file
            .metadata()
            .with_context(|| format!("failed to stat {}", self.path.display()))?
            .len()
            == 0;
        if !fresh && !ends_with_newline(&mut file)? {
            file.write_all(b"\n")
                .with_context(|| format!("failed to write {}", self.path.display()))?;
        }

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        if fresh {
            writer
                .write_record(header_row())
                .with_context(|| format!("failed to write header to {}", self.path.display()))?;
        }
        for record in records {
            writer
                .write_record(record.to_row())
                .with_context(|| format!("failed to append to {}", self.path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;

        Ok(records.len())
    }
}

fn records_from_rows(rows: &[Vec<String>]) -> Vec<InvoiceRecord> {
    let has_header_row = rows.first().map(|row| !looks_like_data_row(row)).unwrap_or(false);
    rows.iter()
        .skip(usize::from(has_header_row))
        .filter_map(|row| InvoiceRecord::from_row(row))
        .collect()
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    file.seek(SeekFrom::End(-1))
        .context("failed to seek ledger tail")?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)
        .context("failed to read ledger tail")?;
    Ok(last[0] == b'\n')
}
