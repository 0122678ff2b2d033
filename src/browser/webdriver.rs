use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Method;
use reqwest::blocking::Client as HttpClient;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4ce4f4cd65c6";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(String);

#[derive(Debug)]
pub struct WebDriverSession {
    client: HttpClient,
    base_url: String,
    session_id: String,
    wait: Duration,
    closed: bool,
}

impl WebDriverSession {
    pub fn start(
        base_url: &str,
        download_dir: &Path,
        headless: bool,
        wait: Duration,
    ) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build WebDriver HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let download_dir = download_dir
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", download_dir.display()))?;

        let mut args = vec!["--disable-gpu", "--window-size=1280,1024"];
        if headless {
            args.push("--headless=new");
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.display().to_string(),
                            "download.prompt_for_download": false,
                            "plugins.always_open_pdf_externally": true
                        }
                    }
                }
            }
        });

        let response = client
            .post(format!("{base_url}/session"))
            .json(&capabilities)
            .send()
            .with_context(|| format!("failed to reach WebDriver at {base_url}"))?;
        let value = unwrap_value(response)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .context("WebDriver response missing sessionId")?;

        info!(session = %session_id, webdriver = %base_url, "browser session started");

        Ok(Self {
            client,
            base_url,
            session_id,
            wait,
            closed: false,
        })
    }

    fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == Method::POST {
            request = request.json(&json!({}));
        }

        let response = request
            .send()
            .with_context(|| format!("WebDriver request failed: {method} {path}"))?;
        unwrap_value(response).with_context(|| format!("WebDriver command {method} {path}"))
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        debug!(url = %url, "navigate");
        self.command(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    pub fn find_all(&self, css: &str) -> Result<Vec<ElementId>> {
        let value = self.command(
            Method::POST,
            "/elements",
            Some(json!({ "using": "css selector", "value": css })),
        )?;
        element_ids(&value)
    }

    pub fn find_all_within(&self, parent: &ElementId, css: &str) -> Result<Vec<ElementId>> {
        let value = self.command(
            Method::POST,
            &format!("/element/{}/elements", parent.0),
            Some(json!({ "using": "css selector", "value": css })),
        )?;
        element_ids(&value)
    }

    pub fn wait_for(&self, css: &str) -> Result<Vec<ElementId>> {
        let deadline = Instant::now() + self.wait;
        loop {
            let found = self.find_all(css)?;
            if !found.is_empty() {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                bail!("timed out after {:?} waiting for `{css}`", self.wait);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn wait_until<F>(&self, what: &str, mut probe: F) -> Result<()>
    where
        F: FnMut(&Self) -> Result<bool>,
    {
        let deadline = Instant::now() + self.wait;
        loop {
            if probe(self)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("timed out after {:?} waiting for {what}", self.wait);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn click(&self, element: &ElementId) -> Result<()> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), None)?;
        Ok(())
    }

    pub fn send_keys(&self, element: &ElementId, text: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )?;
        Ok(())
    }

    pub fn text(&self, element: &ElementId) -> Result<String> {
        let value = self.command(Method::GET, &format!("/element/{}/text", element.0), None)?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    pub fn attribute(&self, element: &ElementId, name: &str) -> Result<Option<String>> {
        let value = self.command(
            Method::GET,
            &format!("/element/{}/attribute/{}", element.0, name),
            None,
        )?;
        Ok(value.as_str().map(ToOwned::to_owned))
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.command(Method::DELETE, "", None)?;
        info!(session = %self.session_id, "browser session closed");
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.command(Method::DELETE, "", None) {
            warn!(session = %self.session_id, error = %err, "failed to release browser session");
        }
    }
}

fn unwrap_value(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .context("failed to decode WebDriver response body")?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        return Err(anyhow!("WebDriver error ({status}): {error}: {message}"));
    }

    Ok(value)
}

fn element_ids(value: &Value) -> Result<Vec<ElementId>> {
    let items = value
        .as_array()
        .context("WebDriver returned a non-array element list")?;
    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| ElementId(id.to_string()))
                .context("WebDriver element reference missing identifier")
        })
        .collect()
}
