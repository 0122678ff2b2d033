use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::ExtractArgs;
use crate::fields::FieldExtractor;
use crate::model::InvoiceRecord;
use crate::text::{Pdftotext, TextExtractor};
use crate::util::file_name_string;

pub fn run(args: ExtractArgs) -> Result<()> {
    let extractor = Pdftotext::with_program(args.text.pdftotext);
    let record = extract_record(&args.file, args.filename.as_deref(), &extractor)?;

    let json = serde_json::to_string_pretty(&record).context("failed to serialize record")?;
    println!("{json}");
    info!(filename = %record.filename, "extracted record");
    Ok(())
}

pub fn extract_record(
    path: &Path,
    filename: Option<&str>,
    extractor: &dyn TextExtractor,
) -> Result<InvoiceRecord> {
    if !path.is_file() {
        bail!("{} does not exist or is not a file", path.display());
    }

    let filename = match filename {
        Some(name) => name.to_string(),
        None => {
            let name = file_name_string(path)?;
            match name.strip_suffix(".txt") {
                Some(stem) => format!("{stem}.pdf"),
                None => name,
            }
        }
    };

    let text = extractor.extract_text(path)?;
    let fields = FieldExtractor::new()?.extract(&text);
    Ok(InvoiceRecord::new(filename, fields))
}
