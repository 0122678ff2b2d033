use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::browser::{
    DownloadOutcome, ListingRow, ListingSource, PortalListing, PortalSelectors, WebDriverSession,
};
use crate::cli::SyncArgs;
use crate::commands::{finish_manifest, start_manifest};
use crate::config::{BrowserConfig, PathConfig};
use crate::model::{PeriodKey, RunManifest};
use crate::util::{ensure_directory, list_documents, modified_at, move_file};


const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub download_wait: Duration,
    pub poll_interval: Duration,
}

impl SyncOptions {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            download_wait: config.download_wait,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub pages_visited: usize,
    pub rows_seen: usize,
    pub duplicate_rows: usize,
    pub already_present: usize,
    pub downloaded: usize,
    pub download_failures: usize,
    pub documents: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn record_in(&self, manifest: &mut RunManifest) {
        let counts = &mut manifest.counts;
        counts.pages_visited += self.pages_visited;
        counts.rows_seen += self.rows_seen;
        counts.duplicate_rows += self.duplicate_rows;
        counts.already_present += self.already_present;
        counts.downloaded += self.downloaded;
        counts.download_failures += self.download_failures;
        manifest.warnings.extend(self.warnings.iter().cloned());
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

pub fn run(args: SyncArgs) -> Result<()> {
    let browser = BrowserConfig::from_args(&args.browser)?;
    let paths = PathConfig::from_args(&args.paths);

    let mut manifest = start_manifest("sync", paths.run_paths(None));
    let report = sync_portal(&browser, &paths.download_dir)?;
    report.record_in(&mut manifest);

    finish_manifest(&paths.manifest_dir(), manifest, &report.documents)?;
    info!(
        pages = report.pages_visited,
        downloaded = report.downloaded,
        already_present = report.already_present,
        failures = report.download_failures,
        documents = report.documents.len(),
        "sync completed"
    );

    Ok(())
}

/// Opens a browser session, signs in and walks the portal listing. The session is
/// closed before returning, also when signing in or syncing failed.
pub fn sync_portal(config: &BrowserConfig, download_dir: &Path) -> Result<SyncReport> {
    ensure_directory(download_dir)?;

    let session = WebDriverSession::start(
        &config.webdriver_url,
        download_dir,
        config.headless,
        config.browser_wait,
    )?;
    let mut listing = PortalListing::new(session, PortalSelectors::default());

    let outcome = walk_portal(&mut listing, config, download_dir);

    if let Err(err) = listing.close() {
        warn!(error = %err, "failed to close browser session");
    }

    outcome
}

fn walk_portal(
    listing: &mut PortalListing,
    config: &BrowserConfig,
    download_dir: &Path,
) -> Result<SyncReport> {
    listing.login(&config.login_url, &config.username, &config.password)?;
    listing.open_listing(&config.listing_url)?;
    sync_documents(listing, download_dir, &SyncOptions::from_config(config))
}

/// Walks every page of `listing`, downloading each period not yet stored as
/// `<download_dir>/<PeriodKey>.pdf`.
pub fn sync_documents(
    listing: &mut dyn ListingSource,
    download_dir: &Path,
    options: &SyncOptions,
) -> Result<SyncReport> {
    ensure_directory(download_dir)?;

    let mut report = SyncReport::default();
    let mut seen: HashSet<PeriodKey> = HashSet::new();

    loop {
        let rows = match listing.current_page_rows() {
            Ok(rows) => rows,
            Err(err) => {
                report.warn(format!("failed to read listing page; ending listing: {err:#}"));
                break;
            }
        };
        report.pages_visited += 1;

        for row in &rows {
            report.rows_seen += 1;

            let Some(key) = PeriodKey::from_label(&row.period_label) else {
                report.warn(format!(
                    "listing row {} has a blank period label; skipping",
                    row.trigger
                ));
                continue;
            };
            if !seen.insert(key.clone()) {
                debug!(period = %key, "period already handled this run");
                report.duplicate_rows += 1;
                continue;
            }

            let target = download_dir.join(key.filename());
            if target.exists() {
                info!(period = %key, path = %target.display(), "already present");
                report.already_present += 1;
                continue;
            }

            match download_row(listing, row, download_dir, &target, options) {
                Ok(()) => {
                    info!(period = %key, path = %target.display(), "downloaded");
                    report.downloaded += 1;
                }
                Err(err) => {
                    report.download_failures += 1;
                    report.warn(format!("download failed for {key}: {err:#}"));
                }
            }
        }

        match listing.has_next_page() {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                report.warn(format!("failed to read pagination state; ending listing: {err:#}"));
                break;
            }
        }
        if let Err(err) = listing.advance_page() {
            report.warn(format!("failed to advance listing; ending listing: {err:#}"));
            break;
        }
    }

    report.documents = list_documents(download_dir)?;
    Ok(report)
}

fn download_row(
    listing: &mut dyn ListingSource,
    row: &ListingRow,
    download_dir: &Path,
    target: &Path,
    options: &SyncOptions,
) -> Result<()> {
    let before: HashSet<PathBuf> = list_documents(download_dir)?.into_iter().collect();

    let produced = match listing.trigger_download(row)? {
        DownloadOutcome::Delivered(path) => path,
        DownloadOutcome::Pending => await_new_document(download_dir, &before, options)?,
    };

    if !produced.is_file() {
        bail!("download reported {} but no such file exists", produced.display());
    }
    if produced != target {
        move_file(&produced, target)?;
    }
    Ok(())
}

fn await_new_document(
    download_dir: &Path,
    before: &HashSet<PathBuf>,
    options: &SyncOptions,
) -> Result<PathBuf> {
    let deadline = Instant::now() + options.download_wait;
    loop {
        if let Some(path) = newest_new_document(download_dir, before)? {
            return Ok(path);
        }
        if Instant::now() >= deadline {
            bail!(
                "no new document appeared in {} within {:?}",
                download_dir.display(),
                options.download_wait
            );
        }
        thread::sleep(options.poll_interval);
    }
}

fn newest_new_document(download_dir: &Path, before: &HashSet<PathBuf>) -> Result<Option<PathBuf>> {
    let newest = list_documents(download_dir)?
        .into_iter()
        .filter(|path| !before.contains(path))
        .max_by_key(|path| modified_at(path).unwrap_or(SystemTime::UNIX_EPOCH));
    Ok(newest)
}
