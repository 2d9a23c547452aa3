//! Reusable GitHub web sessions: the on-disk cookie jar and the login flow.

use super::{BrowserDriver, Cookies, PageId};
use crate::config::Credentials;
use crate::errors::{Result, TailError};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

pub const LOGIN_URL: &str = "https://github.com/login";
const STALE_WITHIN_SECS: f64 = 24.0 * 3600.0;
const SELECTOR_POLL: Duration = Duration::from_millis(250);
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-user cookie storage: a JSON object mapping user names to cookie lists.
#[derive(Clone, Debug)]
pub struct CookieJar {
    path: PathBuf,
    user: String,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            user: user.into(),
        }
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes)? {
                Value::Object(all) => Ok(all),
                _ => Ok(Map::new()),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn read(&self) -> Result<Option<Cookies>> {
        Ok(match self.read_all().await?.remove(&self.user) {
            Some(Value::Array(cookies)) => Some(cookies),
            _ => None,
        })
    }

    /// Store `cookies` for this jar's user, keeping every other user's entry.
    pub async fn save(&self, cookies: &Cookies) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut all = self.read_all().await?;
        all.insert(self.user.clone(), Value::Array(cookies.clone()));
        fs::write(&self.path, serde_json::to_vec(&all)?).await?;
        Ok(())
    }
}

fn expires(cookie: &Value) -> Option<f64> {
    match cookie.get("expires")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A cookie set is worth reusing when it is non-empty and nothing in it
/// expires within the next 24 hours. Already-expired and session cookies
/// don't count against it.
pub fn is_fresh(cookies: &[Value], now: f64) -> bool {
    !cookies.is_empty()
        && !cookies.iter().filter_map(expires).any(|ts| ts > now && ts - now < STALE_WITHIN_SECS)
}

pub fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Load a fresh saved session into the browser. Returns `false` when a login is needed.
pub async fn restore<D: BrowserDriver + ?Sized>(driver: &D, jar: &CookieJar) -> Result<bool> {
    match jar.read().await? {
        Some(cookies) if is_fresh(&cookies, now()) => {
            debug!("all cookies are fresh, reusing the session");
            driver.set_cookies(&cookies).await?;
            Ok(true)
        }
        Some(_) => {
            debug!("found a stale session");
            Ok(false)
        }
        None => Ok(false),
    }
}

fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Poll until one of `selectors` matches an element; returns the one that did.
pub async fn wait_for_any<D: BrowserDriver + ?Sized>(
    driver: &D,
    page: &PageId,
    selectors: &[&str],
) -> Result<String> {
    let list = serde_json::to_string(selectors)?;
    let expression = format!(
        "(() => {{ const selectors = {}; for (const s of selectors) {{ if (document.querySelector(s)) return s; }} return null; }})()",
        list
    );
    let deadline = tokio::time::Instant::now() + SELECTOR_TIMEOUT;
    loop {
        // navigations in flight make evaluation fail; that's just "not yet"
        if let Ok(Value::String(found)) = driver.evaluate(page, &expression).await {
            return Ok(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(TailError::SelectorTimeout(selectors.join(", ")));
        }
        tokio::time::sleep(SELECTOR_POLL).await;
    }
}

async fn fill<D: BrowserDriver + ?Sized>(
    driver: &D,
    page: &PageId,
    selector: &str,
    value: &str,
) -> Result<()> {
    let expression = format!(
        "(() => {{ const el = document.querySelector({}); el.focus(); el.value = {}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
        js_str(selector),
        js_str(value)
    );
    driver.evaluate(page, &expression).await.map(|_| ())
}

async fn submit<D: BrowserDriver + ?Sized>(driver: &D, page: &PageId, selector: &str) -> Result<()> {
    let expression = format!(
        "(() => {{ const el = document.querySelector({}); if (el.form) {{ el.form.requestSubmit(); }} return true; }})()",
        js_str(selector)
    );
    driver.evaluate(page, &expression).await.map(|_| ())
}

/// Log in through the web form and return the resulting session cookies.
pub async fn login<D: BrowserDriver + ?Sized>(
    driver: &D,
    page: &PageId,
    credentials: &Credentials,
) -> Result<Cookies> {
    driver.goto(page, LOGIN_URL).await?;
    wait_for_any(driver, page, &["#login_field"]).await?;
    fill(driver, page, "#login_field", &credentials.user).await?;
    fill(driver, page, "#password", &credentials.password).await?;
    submit(driver, page, "#password").await?;

    let logged_in = format!("[data-login='{}']", credentials.user);
    let found = wait_for_any(driver, page, &["#app_totp", &logged_in]).await?;
    if found == "#app_totp" {
        let otp = credentials.otp.as_deref().ok_or(TailError::OtpRequired)?;
        fill(driver, page, "#app_totp", otp).await?;
        submit(driver, page, "#app_totp").await?;
        wait_for_any(driver, page, &[&logged_in]).await?;
    }

    let cookies = driver.cookies().await?;
    driver.goto(page, "about:blank").await?;
    Ok(cookies)
}
