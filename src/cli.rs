use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "billsync",
    version,
    about = "Download utility invoices and keep the local and remote ledgers in sync"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in, download new invoices, then reconcile the ledgers.
    Run(RunArgs),
    /// Download new invoices only.
    Sync(SyncArgs),
    /// Ingest downloaded invoices into the ledgers without opening a browser.
    Reconcile(ReconcileArgs),
    /// Print the fields extracted from one document.
    Extract(ExtractArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PathArgs {
    #[arg(long, env = "BILLSYNC_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    #[arg(long, env = "BILLSYNC_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    #[arg(long, env = "BILLSYNC_LEDGER_CSV", default_value = "output.csv")]
    pub ledger_csv: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TextArgs {
    /// Command used to pull the text layer out of a PDF.
    #[arg(long, env = "BILLSYNC_PDFTOTEXT", default_value = "pdftotext")]
    pub pdftotext: String,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[arg(long, env = "BILLSYNC_REMOTE_SYNC", default_value_t = false)]
    pub remote_sync: bool,

    #[arg(long, env = "BILLSYNC_SPREADSHEET", default_value = "Facturas CEB")]
    pub spreadsheet: String,

    #[arg(long, env = "BILLSYNC_WORKSHEET", default_value = "Datos")]
    pub worksheet: String,

    #[arg(long, env = "BILLSYNC_CREDENTIALS", default_value = "credentials.token")]
    pub credentials: PathBuf,

    #[arg(long, env = "BILLSYNC_SHARE_WITH")]
    pub share_with: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BrowserArgs {
    #[arg(long, env = "BILLSYNC_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "BILLSYNC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "BILLSYNC_WEBDRIVER_URL", default_value = "http://localhost:9515")]
    pub webdriver_url: String,

    #[arg(
        long,
        env = "BILLSYNC_LOGIN_URL",
        default_value = "https://oficinavirtual.ceb.coop/index.xhtml"
    )]
    pub login_url: String,

    #[arg(
        long,
        env = "BILLSYNC_LISTING_URL",
        default_value = "https://oficinavirtual.ceb.coop/ov/cuentas.xhtml"
    )]
    pub listing_url: String,

    #[arg(long, env = "BILLSYNC_BROWSER_WAIT_SECS", default_value_t = 10)]
    pub browser_wait_secs: u64,

    #[arg(long, env = "BILLSYNC_DOWNLOAD_WAIT_SECS", default_value_t = 15)]
    pub download_wait_secs: u64,

    #[arg(
        long,
        env = "BILLSYNC_HEADLESS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub headless: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    #[command(flatten)]
    pub text: TextArgs,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    #[command(flatten)]
    pub text: TextArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// A `.pdf` invoice or an already extracted `.txt` file.
    pub file: PathBuf,

    /// Ledger key to report instead of the file's own name.
    #[arg(long)]
    pub filename: Option<String>,

    #[command(flatten)]
    pub text: TextArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub paths: PathArgs,
}
