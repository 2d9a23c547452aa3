use super::messages::{BrowseRequest, VisitRequest};
use super::DEFAULT_VISIT_TIMEOUT;
use crate::actors::manager::{ManagerHandle, ManagerMessage};
use crate::config::Credentials;
use crate::driver::session::{login, restore, CookieJar};
use crate::driver::{BrowserDriver, PageId};
use crate::errors::Result;
use crate::types::JobId;
use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct OpenPage {
    page: PageId,
    navigation: JoinHandle<()>,
}

pub struct BrowserWatcher<D> {
    inbox: mpsc::UnboundedReceiver<BrowseRequest>,
    driver: Arc<D>,
    jar: CookieJar,
    credentials: Credentials,
    manager: ManagerHandle,
    stop: CancellationToken,
    live: bool,
    // visits received before the proxy went live, in arrival order
    waiting: VecDeque<VisitRequest>,
    // visits to schedule, newest first
    pending: Vec<VisitRequest>,
    ready: bool,
    open_pages: HashMap<JobId, OpenPage>,
    deadline: Option<Instant>,
    visit_timeout: Duration,
}

impl<D: BrowserDriver> BrowserWatcher<D> {
    pub fn new(
        inbox: mpsc::UnboundedReceiver<BrowseRequest>,
        driver: Arc<D>,
        jar: CookieJar,
        credentials: Credentials,
        manager: ManagerHandle,
        stop: CancellationToken,
    ) -> Self {
        Self {
            inbox,
            driver,
            jar,
            credentials,
            manager,
            stop,
            live: false,
            waiting: VecDeque::new(),
            pending: Vec::new(),
            ready: true,
            open_pages: HashMap::new(),
            deadline: None,
            visit_timeout: DEFAULT_VISIT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_visit_timeout(mut self, visit_timeout: Duration) -> Self {
        self.visit_timeout = visit_timeout;
        self
    }

    pub async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            select! {
                biased;
                _ = self.stop.cancelled() => break,
                maybe_req = self.inbox.recv() => match maybe_req {
                    Some(req) => {
                        if self.handle_request(req).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.visit_timed_out().await;
                }
            }
        }
        self.shutdown().await;
        debug!("browser watcher exiting");
    }

    async fn handle_request(&mut self, req: BrowseRequest) -> ControlFlow<()> {
        debug!("{:?}", req);
        match req {
            BrowseRequest::ProxyLive => {
                if !self.live {
                    if let Err(err) = self.set_up_session().await {
                        self.manager.tell(ManagerMessage::Fatal(format!(
                            "fatal: browser session setup failed: {}",
                            err
                        )));
                        return ControlFlow::Break(());
                    }
                    self.live = true;
                    self.pending.extend(self.waiting.drain(..));
                }
            }
            BrowseRequest::Visit(visit) if self.live => self.pending.push(visit),
            BrowseRequest::Visit(visit) => self.waiting.push_back(visit),
            BrowseRequest::Close { job_id } => self.close_job(job_id).await,
            BrowseRequest::Exit => return ControlFlow::Break(()),
        }
        self.schedule().await;
        ControlFlow::Continue(())
    }

    async fn set_up_session(&self) -> Result<()> {
        if restore(self.driver.as_ref(), &self.jar).await? {
            return Ok(());
        }
        debug!("logging in as {}", self.credentials.user);
        let page = self.driver.new_page().await?;
        let cookies = login(self.driver.as_ref(), &page, &self.credentials).await;
        if let Err(err) = self.driver.close_page(&page).await {
            warn!("closing the login page: {}", err);
        }
        self.jar.save(&cookies?).await
    }

    async fn close_job(&mut self, job_id: JobId) {
        // its subscription is known, a visit would only repeat it
        self.pending.retain(|visit| visit.job_id != job_id);
        self.waiting.retain(|visit| visit.job_id != job_id);

        if let Some(page) = self.open_pages.remove(&job_id) {
            self.close_page(page).await;
            self.deadline = None;
            self.ready = true;
        } else if self.open_pages.is_empty() {
            self.ready = true;
        }
    }

    async fn schedule(&mut self) {
        while self.live && self.ready {
            let Some(visit) = self.pending.pop() else {
                break;
            };
            self.ready = false;
            self.open(visit).await;
        }
    }

    async fn open(&mut self, visit: VisitRequest) {
        let page = match self.driver.new_page().await {
            Ok(page) => page,
            Err(err) => {
                warn!("opening a page for job {}: {}", visit.job_id, err);
                self.ready = true;
                return;
            }
        };
        debug!("visiting {} for job {}", visit.url, visit.job_id);

        let driver = self.driver.clone();
        let target = page.clone();
        let url = visit.url;
        let navigation = tokio::spawn(async move {
            if let Err(err) = driver.goto(&target, &url).await {
                warn!("navigating to {}: {}", url, err);
            }
        });
        self.open_pages
            .insert(visit.job_id, OpenPage { page, navigation });
        self.deadline = Some(Instant::now() + self.visit_timeout);
    }

    async fn visit_timed_out(&mut self) {
        let jobs: Vec<JobId> = self.open_pages.keys().copied().collect();
        warn!("no live log subscription seen for job(s) {:?}, moving on", jobs);
        for (_, page) in std::mem::take(&mut self.open_pages) {
            self.close_page(page).await;
        }
        self.deadline = None;
        self.ready = true;
        self.schedule().await;
    }

    async fn close_page(&self, page: OpenPage) {
        page.navigation.abort();
        if let Err(err) = self.driver.close_page(&page.page).await {
            warn!("closing page {}: {}", page.page, err);
        }
    }

    async fn shutdown(&mut self) {
        for (_, page) in std::mem::take(&mut self.open_pages) {
            self.close_page(page).await;
        }
        if let Err(err) = self.driver.close().await {
            warn!("closing the browser: {}", err);
        }
    }
}
