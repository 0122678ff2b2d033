use std::collections::HashSet;

use anyhow::Result;

use crate::model::{InvoiceRecord, header_row, is_canonical_header, looks_like_data_row};

pub mod local;
pub mod sheets;

pub use local::CsvLedger;
pub use sheets::{GoogleSheets, SheetsLedger};

pub trait LedgerStore {
    fn describe(&self) -> String;

    fn read_keys(&mut self) -> Result<HashSet<String>>;

    fn append(&mut self, records: &[InvoiceRecord]) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRepair {
    Intact,
    Replaced,
    Inserted,
}

/// Puts the canonical header on top of `rows`, keeping every data row as it was.
pub fn repair_header(mut rows: Vec<Vec<String>>) -> (Vec<Vec<String>>, HeaderRepair) {
    match rows.first() {
        Some(first) if is_canonical_header(first) => (rows, HeaderRepair::Intact),
        Some(first) if !looks_like_data_row(first) => {
            rows[0] = header_row();
            (rows, HeaderRepair::Replaced)
        }
        _ => {
            rows.insert(0, header_row());
            (rows, HeaderRepair::Inserted)
        }
    }
}

pub fn keys_from_rows(rows: &[Vec<String>]) -> HashSet<String> {
    rows.iter()
        .skip(1)
        .filter_map(|row| row.first())
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn repair_header_keeps_canonical_tables_untouched() {
        let rows = vec![header_row(), row(&["01-2024.pdf", "ENERO 2024"])];
        let (repaired, repair) = repair_header(rows.clone());
        assert_eq!(repair, HeaderRepair::Intact);
        assert_eq!(repaired, rows);
    }

    #[test]
    fn repair_header_replaces_stale_header_and_preserves_data() {
        let rows = vec![
            row(&["Archivo", "Periodo", "Consumo"]),
            row(&["01-2024.pdf", "ENERO 2024", "345"]),
            row(&["02-2024.pdf", "", ""]),
        ];
        let (repaired, repair) = repair_header(rows.clone());
        assert_eq!(repair, HeaderRepair::Replaced);
        assert_eq!(repaired[0], header_row());
        assert_eq!(repaired[1..], rows[1..]);
    }

    #[test]
    fn repair_header_inserts_header_above_headerless_data_and_empty_tables() {
        let rows = vec![row(&["01-2024.pdf", "ENERO 2024"])];
        let (repaired, repair) = repair_header(rows.clone());
        assert_eq!(repair, HeaderRepair::Inserted);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[1], rows[0]);

        let (repaired, repair) = repair_header(Vec::new());
        assert_eq!(repair, HeaderRepair::Inserted);
        assert_eq!(repaired, vec![header_row()]);
    }

    #[test]
    fn keys_from_rows_skips_header_and_blank_keys() {
        let rows = vec![
            header_row(),
            row(&[" 01-2024.pdf "]),
            row(&[""]),
            Vec::new(),
            row(&["02-2024.pdf", "x"]),
        ];
        let keys = keys_from_rows(&rows);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("01-2024.pdf"));
        assert!(keys.contains("02-2024.pdf"));
    }
}
