//! Settings loaded once at startup and threaded through constructors.

use crate::types::Port;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Web-session credentials, used only when no fresh session is on disk.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub otp: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Which run to look for.
#[derive(Clone, Debug, Default)]
pub struct RunFilters {
    pub commit_sha: String,
    pub workflow_name: Option<String>,
    pub ref_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    /// Port the intercepting proxy listens on.
    pub port: Port,
    pub headless: bool,
    pub chromium: PathBuf,
    pub mitmdump: PathBuf,
    pub cookie_jar: PathBuf,
    pub user_agent: String,
    pub poll_interval: Duration,
}

impl Config {
    pub fn new(credentials: Credentials, port: Port) -> Self {
        Self {
            credentials,
            port,
            headless: true,
            chromium: PathBuf::from("chromium"),
            mitmdump: PathBuf::from("mitmdump"),
            cookie_jar: default_cookie_jar(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// `<cache dir>/runtail/gh-cookies.json`
pub fn default_cookie_jar() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("runtail")
        .join("gh-cookies.json")
}
