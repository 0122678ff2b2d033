use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::model::{DocumentEntry, RunCounts, RunManifest, RunPaths};
use crate::util::{
    file_name_string, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

pub mod extract;
pub mod reconcile;
pub mod run;
pub mod status;
pub mod sync;

const MANIFEST_VERSION: u32 = 1;

pub(crate) fn start_manifest(command: &str, paths: RunPaths) -> RunManifest {
    let started_at = now_utc_string();
    RunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: format!("run-{}", utc_compact_string(Utc::now())),
        status: "running".to_string(),
        started_at: started_at.clone(),
        updated_at: started_at,
        command: command.to_string(),
        paths,
        counts: RunCounts::default(),
        documents: Vec::new(),
        warnings: Vec::new(),
        notes: Vec::new(),
    }
}

pub(crate) fn finish_manifest(
    manifest_dir: &Path,
    mut manifest: RunManifest,
    documents: &[PathBuf],
) -> Result<PathBuf> {
    for path in documents {
        let entry = file_name_string(path).and_then(|filename| {
            Ok(DocumentEntry {
                filename,
                sha256: sha256_file(path)?,
            })
        });
        match entry {
            Ok(entry) => manifest.documents.push(entry),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to hash document");
                manifest
                    .warnings
                    .push(format!("failed to hash {}: {err}", path.display()));
            }
        }
    }

    manifest.status = "completed".to_string();
    manifest.updated_at = now_utc_string();

    let stamp = manifest
        .run_id
        .strip_prefix("run-")
        .unwrap_or(&manifest.run_id);
    let path = manifest_dir.join(format!("{}_run_{}.json", manifest.command, stamp));
    write_json_pretty(&path, &manifest)?;
    info!(path = %path.display(), "wrote run manifest");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::util::scratch_dir;

    #[test]
    fn finished_manifest_records_document_hashes() {
        let dir = scratch_dir("manifest");
        let document = dir.join("01-2024.pdf");
        fs::write(&document, b"abc").unwrap();

        let manifest = start_manifest(
            "reconcile",
            RunPaths {
                download_dir: dir.display().to_string(),
                output_dir: dir.display().to_string(),
                ledger_path: "output.csv".to_string(),
                remote_ledger: None,
            },
        );
        let path = finish_manifest(
            &dir.join("manifests"),
            manifest,
            &[document, dir.join("gone.pdf")],
        )
        .unwrap();

        let name = file_name_string(&path).unwrap();
        assert!(name.starts_with("reconcile_run_"), "{name}");

        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["status"], "completed");
        assert_eq!(written["documents"][0]["filename"], "01-2024.pdf");
        assert_eq!(
            written["documents"][0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(written["warnings"].as_array().unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }
}
