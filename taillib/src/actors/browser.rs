mod actor;
mod messages;

pub use messages::{BrowseRequest, VisitRequest};

use super::manager::ManagerHandle;
use crate::config::Credentials;
use crate::driver::{session::CookieJar, BrowserDriver};
use crate::types::JobId;
use actor::BrowserWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a job page may stay open without its subscription showing up.
pub const DEFAULT_VISIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle to the browser watcher, which visits one job page at a time so the
/// proxy sees each job's subscribe traffic in isolation.
#[derive(Clone, Debug)]
pub struct BrowserHandle {
    sender: mpsc::UnboundedSender<BrowseRequest>,
}

impl BrowserHandle {
    /// Create the handle before the watcher exists; the manager needs one to start.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrowseRequest>) {
        let (sender, inbox) = mpsc::unbounded_channel();
        (Self { sender }, inbox)
    }

    pub fn proxy_live(&self) {
        let _ = self.sender.send(BrowseRequest::ProxyLive);
    }

    pub fn visit(&self, url: String, job_id: JobId) {
        let _ = self
            .sender
            .send(BrowseRequest::Visit(VisitRequest { url, job_id }));
    }

    pub fn close(&self, job_id: JobId) {
        let _ = self.sender.send(BrowseRequest::Close { job_id });
    }

    pub fn exit(&self) {
        let _ = self.sender.send(BrowseRequest::Exit);
    }
}

/// Start the watcher on the receiving end of [`BrowserHandle::channel`].
///
/// The browser is closed when the watcher exits, whether by `Exit`, the stop
/// token or a failed session setup.
pub fn spawn_watcher<D: BrowserDriver>(
    inbox: mpsc::UnboundedReceiver<BrowseRequest>,
    driver: Arc<D>,
    jar: CookieJar,
    credentials: Credentials,
    manager: ManagerHandle,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let watcher = BrowserWatcher::new(inbox, driver, jar, credentials, manager, stop);
    tokio::spawn(watcher.run())
}
