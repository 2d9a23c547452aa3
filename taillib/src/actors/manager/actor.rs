use super::messages::ManagerMessage;
use super::ManagerHandle;
use crate::actors::browser::BrowserHandle;
use crate::actors::streamer::{StreamerHandle, StreamerLauncher};
use crate::events::{JobDone, Output, OutputItem, WorkflowDone, WorkflowJob, WsSub};
use crate::types::{JobId, JobName};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub const WORKFLOW: &str = "workflow";

pub struct Manager {
    inbox: mpsc::UnboundedReceiver<ManagerMessage>,
    // handed to every streamer so its output comes back through here
    handle: ManagerHandle,
    browser: BrowserHandle,
    output: mpsc::UnboundedSender<Output>,
    stop: CancellationToken,
    launcher: Arc<dyn StreamerLauncher>,
    job_map: HashMap<JobId, JobName>,
    streamers: HashMap<JobId, StreamerHandle>,
    concluded: HashSet<JobId>,
    failed: bool,
    stopped: bool,
}

impl Manager {
    pub fn new(
        inbox: mpsc::UnboundedReceiver<ManagerMessage>,
        handle: ManagerHandle,
        browser: BrowserHandle,
        output: mpsc::UnboundedSender<Output>,
        stop: CancellationToken,
        launcher: Arc<dyn StreamerLauncher>,
    ) -> Self {
        Self {
            inbox,
            handle,
            browser,
            output,
            stop,
            launcher,
            job_map: HashMap::new(),
            streamers: HashMap::new(),
            concluded: HashSet::new(),
            failed: false,
            stopped: false,
        }
    }

    pub async fn run(mut self) -> bool {
        loop {
            select! {
                biased;
                maybe_msg = self.inbox.recv() => match maybe_msg {
                    Some(msg) => {
                        // busy streamers must not hold off a stop
                        if self.handle_message(msg).is_break() || self.stop.is_cancelled() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.stop.cancelled() => break,
            }
        }
        self.shutdown();
        self.collect_fatal_reports();
        debug!("manager exiting");
        !self.failed
    }

    /// A watcher reports a fatal condition right before cancelling the stop
    /// token; make sure it still counts when other messages were queued ahead.
    fn collect_fatal_reports(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            if let ManagerMessage::Fatal(reason) = msg {
                error!("{}", reason);
                self.failed = true;
            }
        }
    }

    pub(crate) fn handle_message(&mut self, msg: ManagerMessage) -> ControlFlow<()> {
        debug!("{:?}", msg);
        use ManagerMessage::*;
        match msg {
            ProxyLive => self.browser.proxy_live(),
            Job(job) => self.job_found(job),
            Subscription(sub) => self.subscription_found(sub),
            JobDone(done) => self.job_done(done),
            WorkflowDone(done) => {
                self.workflow_done(done);
                return ControlFlow::Break(());
            }
            Output(item) => self.emit(item),
            WebsocketClosed { job_id } => self.websocket_closed(job_id),
            Fatal(reason) => {
                error!("{}", reason);
                self.failed = true;
            }
        }
        ControlFlow::Continue(())
    }

    fn job_found(&mut self, job: WorkflowJob) {
        self.browser.visit(job.html_url, job.id);
        self.job_map.insert(job.id, job.name);
    }

    fn subscription_found(&mut self, mut sub: WsSub) {
        self.browser.close(sub.job_id);
        if let Some(name) = self.job_map.get(&sub.job_id) {
            sub.job_name = Some(name.clone());
        }
        if self.concluded.contains(&sub.job_id) {
            debug!("job {} already concluded, not streaming it", sub.job_id);
            return;
        }
        self.replace_streamer(sub);
    }

    fn job_done(&mut self, done: JobDone) {
        self.emit(OutputItem::conclusion(done.job_name, &done.conclusion));
        self.concluded.insert(done.job_id);
        self.terminate_streamer(done.job_id);
    }

    fn workflow_done(&mut self, done: WorkflowDone) {
        self.emit(OutputItem::conclusion(WORKFLOW, &done.conclusion));
    }

    fn websocket_closed(&mut self, job_id: JobId) {
        if self.concluded.contains(&job_id) {
            debug!("websocket for concluded job {} closed", job_id);
        } else {
            let name = self.job_map.get(&job_id).map_or("unknown", String::as_str);
            warn!("live log connection for job '{}' ({}) closed unexpectedly", name, job_id);
        }
    }

    fn emit(&self, item: OutputItem) {
        let _ = self.output.send(Output::Item(item));
    }

    fn terminate_streamer(&mut self, job_id: JobId) {
        if let Some(streamer) = self.streamers.remove(&job_id) {
            streamer.terminate();
        }
    }

    fn replace_streamer(&mut self, sub: WsSub) {
        let job_id = sub.job_id;
        self.terminate_streamer(job_id);
        let streamer = self.launcher.launch(sub, self.handle.clone());
        self.streamers.insert(job_id, streamer);
    }

    /// Stop everything this actor is responsible for. Safe to call twice.
    pub(crate) fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop.cancel();
        self.browser.exit();
        let _ = self.output.send(Output::End);
        for (_, streamer) in self.streamers.drain() {
            streamer.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::browser::{BrowseRequest, VisitRequest};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Launches streamers that do nothing until terminated.
    #[derive(Default)]
    struct IdleLauncher {
        launched: Mutex<Vec<(WsSub, oneshot::Receiver<()>)>>,
    }

    impl StreamerLauncher for IdleLauncher {
        fn launch(&self, sub: WsSub, _manager: ManagerHandle) -> StreamerHandle {
            let (alive_tx, alive_rx) = oneshot::channel::<()>();
            self.launched.lock().unwrap().push((sub, alive_rx));
            StreamerHandle::from_task(tokio::spawn(async move {
                let _alive = alive_tx;
                futures::future::pending::<()>().await;
            }))
        }
    }

    struct Fixture {
        manager: Manager,
        browse_rx: mpsc::UnboundedReceiver<BrowseRequest>,
        output_rx: mpsc::UnboundedReceiver<Output>,
        launcher: Arc<IdleLauncher>,
        stop: CancellationToken,
    }

    fn fixture() -> Fixture {
        let (handle, inbox) = ManagerHandle::channel();
        let (browser, browse_rx) = BrowserHandle::channel();
        let (output, output_rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(IdleLauncher::default());
        let stop = CancellationToken::new();
        let manager = Manager::new(inbox, handle, browser, output, stop.clone(), launcher.clone());
        Fixture {
            manager,
            browse_rx,
            output_rx,
            launcher,
            stop,
        }
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut items = vec![];
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn job(id: JobId, url: &str) -> WorkflowJob {
        WorkflowJob {
            id,
            name: id.to_string(),
            html_url: url.into(),
            conclusion: None,
        }
    }

    fn sub(job_id: JobId) -> WsSub {
        WsSub {
            url: "https://ws.bar".into(),
            subs: String::new(),
            job_id,
            job_name: None,
        }
    }

    fn done(job_id: JobId, name: &str, conclusion: &str) -> JobDone {
        JobDone {
            job_id,
            job_name: name.into(),
            conclusion: conclusion.into(),
        }
    }

    #[tokio::test]
    async fn proxy_live_is_forwarded() {
        let mut f = fixture();
        let _ = f.manager.handle_message(ManagerMessage::ProxyLive);
        assert_eq!(drain(&mut f.browse_rx), vec![BrowseRequest::ProxyLive]);
        assert!(drain(&mut f.output_rx).is_empty());
    }

    #[tokio::test]
    async fn subscriptions_close_pages() {
        let mut f = fixture();
        for msg in [
            ManagerMessage::Job(job(123, "https://foo.bar")),
            ManagerMessage::Subscription(sub(123)),
            ManagerMessage::Subscription(sub(345)),
        ] {
            assert!(f.manager.handle_message(msg).is_continue());
        }
        assert_eq!(
            drain(&mut f.browse_rx),
            vec![
                BrowseRequest::Visit(VisitRequest {
                    url: "https://foo.bar".into(),
                    job_id: 123
                }),
                BrowseRequest::Close { job_id: 123 },
                BrowseRequest::Close { job_id: 345 },
            ]
        );
        assert!(drain(&mut f.output_rx).is_empty());

        let launched = f.launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 2);
        assert_eq!(launched[0].0.job_name.as_deref(), Some("123"));
        assert_eq!(launched[1].0.job_name, None);
    }

    #[tokio::test]
    async fn full_run() {
        let mut f = fixture();
        let messages = vec![
            ManagerMessage::Job(job(123, "https://foo.bar")),
            ManagerMessage::Subscription(sub(123)),
            ManagerMessage::JobDone(done(123, "foo", "yes")),
            ManagerMessage::JobDone(done(123, "foo", "yes")),
            ManagerMessage::WorkflowDone(WorkflowDone {
                conclusion: "very good".into(),
            }),
        ];
        let flow: Vec<_> = messages
            .into_iter()
            .map(|msg| f.manager.handle_message(msg))
            .collect();
        assert!(flow[..4].iter().all(ControlFlow::is_continue));
        assert!(flow[4].is_break());
        f.manager.shutdown();
        // a second stop sends nothing more
        f.manager.shutdown();

        assert_eq!(
            drain(&mut f.browse_rx),
            vec![
                BrowseRequest::Visit(VisitRequest {
                    url: "https://foo.bar".into(),
                    job_id: 123
                }),
                BrowseRequest::Close { job_id: 123 },
                BrowseRequest::Exit,
            ]
        );
        assert_eq!(
            drain(&mut f.output_rx),
            vec![
                Output::Item(OutputItem::new("foo", vec!["##[conclusion]yes".into()])),
                Output::Item(OutputItem::new("foo", vec!["##[conclusion]yes".into()])),
                Output::Item(OutputItem::new(WORKFLOW, vec!["##[conclusion]very good".into()])),
                Output::End,
            ]
        );
        assert!(f.stop.is_cancelled());
    }

    #[tokio::test]
    async fn newer_subscription_replaces_streamer() {
        let mut f = fixture();
        let _ = f.manager.handle_message(ManagerMessage::Subscription(sub(1)));
        let _ = f.manager.handle_message(ManagerMessage::Subscription(sub(1)));
        let (_, first) = f.launcher.launched.lock().unwrap().remove(0);
        // the first streamer was aborted, dropping its end of the channel
        assert!(first.await.is_err());
        assert_eq!(f.launcher.launched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn job_done_terminates_streamer() {
        let mut f = fixture();
        let _ = f.manager.handle_message(ManagerMessage::Subscription(sub(1)));
        let _ = f.manager.handle_message(ManagerMessage::JobDone(done(1, "one", "success")));
        let (_, alive) = f.launcher.launched.lock().unwrap().remove(0);
        assert!(alive.await.is_err());

        // a late subscription for a concluded job does not start a new streamer
        let _ = f.manager.handle_message(ManagerMessage::Subscription(sub(1)));
        assert!(f.launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn streamer_output_and_fatal_reports() {
        let mut f = fixture();
        let item = OutputItem::new("job", vec!["hello".into()]);
        let _ = f.manager.handle_message(ManagerMessage::Output(item.clone()));
        let _ = f.manager.handle_message(ManagerMessage::WebsocketClosed { job_id: 9 });
        let _ = f.manager.handle_message(ManagerMessage::Fatal("fatal: boom".into()));
        assert_eq!(drain(&mut f.output_rx), vec![Output::Item(item)]);
        assert!(f.manager.failed);
        assert!(!f.stop.is_cancelled());
    }

    #[tokio::test]
    async fn external_stop_shuts_down_once() {
        let f = fixture();
        let Fixture {
            manager,
            mut browse_rx,
            mut output_rx,
            stop,
            ..
        } = f;
        let _ = manager.handle.tell(ManagerMessage::Job(job(5, "u")));
        stop.cancel();
        assert!(manager.run().await);
        assert_eq!(
            drain(&mut browse_rx),
            vec![
                BrowseRequest::Visit(VisitRequest {
                    url: "u".into(),
                    job_id: 5
                }),
                BrowseRequest::Exit,
            ]
        );
        assert_eq!(drain(&mut output_rx), vec![Output::End]);
    }

    #[tokio::test]
    async fn stop_is_not_held_off_by_queued_output() {
        let Fixture {
            manager,
            mut output_rx,
            stop,
            ..
        } = fixture();
        let first = OutputItem::new("job", vec!["one".into()]);
        let _ = manager.handle.tell(ManagerMessage::Output(first.clone()));
        let _ = manager
            .handle
            .tell(ManagerMessage::Output(OutputItem::new("job", vec!["two".into()])));
        let _ = manager.handle.tell(ManagerMessage::Fatal("fatal: proxy exited".into()));
        stop.cancel();

        // the fatal report behind the output still fails the run
        assert!(!manager.run().await);
        assert_eq!(
            drain(&mut output_rx),
            vec![Output::Item(first), Output::End]
        );
    }
}
