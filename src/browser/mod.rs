use std::path::PathBuf;

use anyhow::Result;

pub mod portal;
pub mod webdriver;

pub use portal::{PortalListing, PortalSelectors};
pub use webdriver::WebDriverSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub period_label: String,
    pub trigger: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Delivered(PathBuf),
    Pending,
}

pub trait ListingSource {
    fn current_page_rows(&mut self) -> Result<Vec<ListingRow>>;

    fn trigger_download(&mut self, row: &ListingRow) -> Result<DownloadOutcome>;

    fn has_next_page(&mut self) -> Result<bool>;

    fn advance_page(&mut self) -> Result<()>;
}
