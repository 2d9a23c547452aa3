//! Minimal browser automation surface the browser watcher needs.

mod cdp;
pub mod session;

pub use cdp::CdpBrowser;

use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Opaque page identifier handed out by the driver.
pub type PageId = String;
/// Browser cookies, kept as the driver reports them.
pub type Cookies = Vec<Value>;

#[async_trait]
pub trait BrowserDriver: Send + Sync + 'static {
    /// Open a new blank page.
    async fn new_page(&self) -> Result<PageId>;
    /// Navigate `page` to `url`.
    async fn goto(&self, page: &PageId, url: &str) -> Result<()>;
    async fn close_page(&self, page: &PageId) -> Result<()>;
    /// Evaluate a JavaScript expression in `page`, returning its JSON value.
    async fn evaluate(&self, page: &PageId, expression: &str) -> Result<Value>;
    async fn cookies(&self) -> Result<Cookies>;
    async fn set_cookies(&self, cookies: &Cookies) -> Result<()>;
    /// Shut the browser down.
    async fn close(&self) -> Result<()>;
}
