use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

pub trait TextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct Pdftotext {
    program: String,
}

impl Default for Pdftotext {
    fn default() -> Self {
        Self {
            program: "pdftotext".to_string(),
        }
    }
}

impl Pdftotext {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TextExtractor for Pdftotext {
    fn extract_text(&self, path: &Path) -> Result<String> {
        let is_text = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if is_text {
            return fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }

        let output = Command::new(&self.program)
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .output()
            .with_context(|| {
                format!("failed to execute {} for {}", self.program, path.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned non-zero exit status for {}: {}",
                self.program,
                path.display(),
                stderr.trim()
            );
        }

        Ok(clean_text_layer(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn clean_text_layer(raw: &str) -> String {
    raw.replace('\u{000C}', "\n").replace('\u{0000}', "")
}
