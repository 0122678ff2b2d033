use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use super::webdriver::{ElementId, WebDriverSession};
use super::{DownloadOutcome, ListingRow, ListingSource};

#[derive(Debug, Clone)]
pub struct PortalSelectors {
    pub username: String,
    pub password: String,
    pub login_button: String,
    pub rows: String,
    pub period_cell: String,
    pub download_button: String,
    pub next_page: String,
    pub disabled_class: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            username: "[id='form:email']".to_string(),
            password: "[id='form:password']".to_string(),
            login_button: "[id='form:loginButton']".to_string(),
            rows: "[id='form:tblFacturasCuenta_data'] > tr".to_string(),
            period_cell: "td:first-child".to_string(),
            download_button: "button".to_string(),
            next_page: ".ui-paginator-next".to_string(),
            disabled_class: "ui-state-disabled".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct PortalListing {
    session: WebDriverSession,
    selectors: PortalSelectors,
}

impl PortalListing {
    pub fn new(session: WebDriverSession, selectors: PortalSelectors) -> Self {
        Self { session, selectors }
    }

    pub fn login(&self, login_url: &str, username: &str, password: &str) -> Result<()> {
        self.session.navigate(login_url)?;

        let user_field = first(self.session.wait_for(&self.selectors.username)?)?;
        let password_field = first(self.session.wait_for(&self.selectors.password)?)?;
        self.session.send_keys(&user_field, username)?;
        self.session.send_keys(&password_field, password)?;

        let button = first(self.session.wait_for(&self.selectors.login_button)?)?;
        self.session.click(&button).context("failed to submit login form")?;

        let login_button = self.selectors.login_button.clone();
        self.session
            .wait_until("login form to disappear", |session| {
                Ok(session.find_all(&login_button)?.is_empty())
            })
            .context("login did not complete; check the portal credentials")?;

        info!(url = %login_url, "portal login completed");
        Ok(())
    }

    pub fn open_listing(&self, listing_url: &str) -> Result<()> {
        self.session.navigate(listing_url)?;
        self.session
            .wait_for(&self.selectors.rows)
            .context("invoice table did not load")?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.session.close()
    }

    fn first_label(&self) -> Result<Option<String>> {
        let rows = self.session.find_all(&self.selectors.rows)?;
        match rows.first() {
            Some(row) => self.period_label(row).map(Some),
            None => Ok(None),
        }
    }

    fn period_label(&self, row: &ElementId) -> Result<String> {
        let cell = first(self.session.find_all_within(row, &self.selectors.period_cell)?)
            .context("listing row has no period cell")?;
        self.session.text(&cell)
    }
}

impl ListingSource for PortalListing {
    fn current_page_rows(&mut self) -> Result<Vec<ListingRow>> {
        let rows = self.session.wait_for(&self.selectors.rows)?;
        let mut listing = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let period_label = self.period_label(row)?;
            listing.push(ListingRow {
                period_label,
                trigger: index,
            });
        }
        debug!(rows = listing.len(), "read listing page");
        Ok(listing)
    }

    fn trigger_download(&mut self, row: &ListingRow) -> Result<DownloadOutcome> {
        let rows = self.session.find_all(&self.selectors.rows)?;
        let Some(element) = rows.get(row.trigger) else {
            bail!(
                "listing row {} ({}) is no longer on the page",
                row.trigger,
                row.period_label
            );
        };

        let button = first(
            self.session
                .find_all_within(element, &self.selectors.download_button)?,
        )
        .with_context(|| format!("no download control for {}", row.period_label))?;
        self.session.click(&button)?;
        Ok(DownloadOutcome::Pending)
    }

    fn has_next_page(&mut self) -> Result<bool> {
        let Some(next) = self.session.find_all(&self.selectors.next_page)?.into_iter().next() else {
            return Ok(false);
        };

        let class = self.session.attribute(&next, "class")?.unwrap_or_default();
        let aria_disabled = self.session.attribute(&next, "aria-disabled")?;
        let disabled = class
            .split_whitespace()
            .any(|token| token == self.selectors.disabled_class)
            || aria_disabled.as_deref() == Some("true");
        Ok(!disabled)
    }

    fn advance_page(&mut self) -> Result<()> {
        let before = self.first_label()?;
        let next = first(self.session.find_all(&self.selectors.next_page)?)
            .context("next-page control disappeared")?;
        self.session.click(&next)?;

        self.session.wait_until("next listing page", |_| {
            Ok(self.first_label().unwrap_or(None) != before)
        })
    }
}

fn first(elements: Vec<ElementId>) -> Result<ElementId> {
    elements
        .into_iter()
        .next()
        .context("expected at least one matching element")
}
