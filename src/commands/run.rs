use anyhow::Result;
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::reconcile::{log_summary, reconcile_with_ledgers};
use crate::commands::sync::sync_portal;
use crate::commands::{finish_manifest, start_manifest};
use crate::config::{BrowserConfig, PathConfig, RemoteConfig};
use crate::text::Pdftotext;
use crate::util::ensure_directory;

pub fn run(args: RunArgs) -> Result<()> {
    let browser = BrowserConfig::from_args(&args.browser)?;
    let paths = PathConfig::from_args(&args.paths);
    let remote = RemoteConfig::from_args(&args.remote);

    ensure_directory(&paths.download_dir)?;
    ensure_directory(&paths.output_dir)?;

    let mut manifest = start_manifest("run", paths.run_paths(remote.as_ref()));
    info!(
        run_id = %manifest.run_id,
        download_dir = %paths.download_dir.display(),
        remote = remote.is_some(),
        "pipeline started"
    );

    let sync = sync_portal(&browser, &paths.download_dir)?;
    sync.record_in(&mut manifest);
    info!(
        pages = sync.pages_visited,
        downloaded = sync.downloaded,
        already_present = sync.already_present,
        failures = sync.download_failures,
        "sync completed"
    );

    let extractor = Pdftotext::with_program(args.text.pdftotext);
    let report = reconcile_with_ledgers(&sync.documents, &paths, remote.as_ref(), &extractor)?;
    report.record_in(&mut manifest);
    log_summary(&report);

    finish_manifest(&paths.manifest_dir(), manifest, &sync.documents)?;
    info!("pipeline completed");
    Ok(())
}
