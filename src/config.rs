use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::cli::{BrowserArgs, PathArgs, RemoteArgs};
use crate::ledger::sheets::SheetsTarget;
use crate::model::RunPaths;

#[derive(Debug, Clone)]
pub struct PathConfig {
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl PathConfig {
    pub fn from_args(args: &PathArgs) -> Self {
        Self {
            download_dir: args.download_dir.clone(),
            output_dir: args.output_dir.clone(),
            ledger_path: args.ledger_csv.clone(),
        }
    }

    pub fn text_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.output_dir.join("manifests")
    }

    pub fn run_paths(&self, remote: Option<&RemoteConfig>) -> RunPaths {
        RunPaths {
            download_dir: self.download_dir.display().to_string(),
            output_dir: self.output_dir.display().to_string(),
            ledger_path: self.ledger_path.display().to_string(),
            remote_ledger: remote.map(|remote| {
                format!("{} / {}", remote.target.spreadsheet, remote.target.worksheet)
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub target: SheetsTarget,
    pub credentials: PathBuf,
}

impl RemoteConfig {
    pub fn from_args(args: &RemoteArgs) -> Option<Self> {
        if !args.remote_sync {
            return None;
        }

        Some(Self {
            target: SheetsTarget {
                spreadsheet: args.spreadsheet.clone(),
                worksheet: args.worksheet.clone(),
                share_with: args
                    .share_with
                    .as_deref()
                    .map(str::trim)
                    .filter(|email| !email.is_empty())
                    .map(ToOwned::to_owned),
            },
            credentials: args.credentials.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub username: String,
    pub password: String,
    pub webdriver_url: String,
    pub login_url: String,
    pub listing_url: String,
    pub browser_wait: Duration,
    pub download_wait: Duration,
    pub headless: bool,
}

impl BrowserConfig {
    pub fn from_args(args: &BrowserArgs) -> Result<Self> {
        let username = required(args.username.as_deref(), "portal username", "BILLSYNC_USERNAME")?;
        let password = required(args.password.as_deref(), "portal password", "BILLSYNC_PASSWORD")?;

        Ok(Self {
            username,
            password,
            webdriver_url: args.webdriver_url.clone(),
            login_url: args.login_url.clone(),
            listing_url: args.listing_url.clone(),
            browser_wait: Duration::from_secs(args.browser_wait_secs),
            download_wait: Duration::from_secs(args.download_wait_secs),
            headless: args.headless,
        })
    }
}

fn required(value: Option<&str>, what: &str, env: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => bail!("missing {what}: set {env} or pass --{}", flag_name(env)),
    }
}

fn flag_name(env: &str) -> String {
    env.trim_start_matches("BILLSYNC_")
        .to_ascii_lowercase()
        .replace('_', "-")
}
