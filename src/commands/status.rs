use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config::PathConfig;
use crate::ledger::local::{CsvLedger, LedgerSnapshot};
use crate::model::RunManifest;
use crate::util::list_documents;

pub fn run(args: StatusArgs) -> Result<()> {
    let paths = PathConfig::from_args(&args.paths);
    info!(
        download_dir = %paths.download_dir.display(),
        ledger = %paths.ledger_path.display(),
        "status requested"
    );

    let documents = list_documents(&paths.download_dir)?;
    info!(documents = documents.len(), "download directory");

    let ledger = CsvLedger::new(&paths.ledger_path);
    match ledger.snapshot()? {
        LedgerSnapshot { exists: false, .. } => {
            warn!(path = %paths.ledger_path.display(), "local ledger missing");
        }
        LedgerSnapshot {
            header_ok,
            data_rows,
            last_filename,
            ..
        } => {
            if !header_ok {
                warn!(path = %paths.ledger_path.display(), "local ledger header needs repair");
            }
            info!(
                rows = data_rows,
                header_ok,
                last = %last_filename.unwrap_or_default(),
                pending = documents.len().saturating_sub(data_rows),
                "local ledger"
            );
        }
    }

    match latest_manifest(&paths.manifest_dir())? {
        Some((path, manifest)) => info!(
            path = %path.display(),
            run_id = %manifest.run_id,
            command = %manifest.command,
            status = %manifest.status,
            updated_at = %manifest.updated_at,
            downloaded = manifest.counts.downloaded,
            ingested = manifest.counts.ingested,
            warnings = manifest.warnings.len(),
            "latest run manifest"
        ),
        None => warn!(dir = %paths.manifest_dir().display(), "no run manifest found"),
    }

    Ok(())
}

pub fn latest_manifest(dir: &Path) -> Result<Option<(PathBuf, RunManifest)>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(PathBuf, RunManifest)> = None;
    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let manifest: RunManifest = match serde_json::from_slice(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable manifest");
                continue;
            }
        };

        let newer = latest
            .as_ref()
            .map(|(_, current)| manifest.updated_at > current.updated_at)
            .unwrap_or(true);
        if newer {
            latest = Some((path, manifest));
        }
    }

    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{finish_manifest, start_manifest};
    use crate::model::RunPaths;
    use crate::util::scratch_dir;

    #[test]
    fn latest_manifest_picks_most_recent_and_skips_junk() {
        let dir = scratch_dir("status_manifest");
        let paths = RunPaths {
            download_dir: "downloads".to_string(),
            output_dir: "outputs".to_string(),
            ledger_path: "output.csv".to_string(),
            remote_ledger: None,
        };

        let mut older = start_manifest("sync", paths.clone());
        older.run_id = "run-20240101T000000Z".to_string();
        finish_manifest(&dir, older, &[]).unwrap();
        let mut newer = start_manifest("reconcile", paths);
        newer.run_id = "run-20240102T000000Z".to_string();
        finish_manifest(&dir, newer, &[]).unwrap();
        let older_path = dir.join("sync_run_20240101T000000Z.json");
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&older_path).unwrap()).unwrap();
        value["updated_at"] = "2000-01-01T00:00:00Z".into();
        fs::write(&older_path, serde_json::to_vec(&value).unwrap()).unwrap();
        fs::write(dir.join("broken.json"), b"{").unwrap();

        let (path, manifest) = latest_manifest(&dir).unwrap().unwrap();
        assert_eq!(manifest.command, "reconcile");
        assert!(path.ends_with("reconcile_run_20240102T000000Z.json"));

        assert!(latest_manifest(&dir.join("absent")).unwrap().is_none());

        let _ = fs::remove_dir_all(&dir);
    }
}
