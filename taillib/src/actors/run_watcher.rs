//! Polls the CI provider for the run and reports job lifecycle changes.

use super::manager::{ManagerHandle, ManagerMessage};
use crate::errors::{ApiError, Result, TailError};
use crate::events::{JobEvent, WorkflowDone, WorkflowJob, WorkflowRun};
use crate::github::{CiProvider, API_RETRY};
use crate::job_state::JobState;
use crate::retry::{retry, Attempt, RetryError, RetryPolicy};
use crate::types::RunId;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct RunWatcher {
    provider: Arc<dyn CiProvider>,
    run_id: RunId,
    manager: ManagerHandle,
    stop: CancellationToken,
    state: JobState,
    poll_interval: Duration,
    api_retry: RetryPolicy,
}

impl RunWatcher {
    pub fn new(
        provider: Arc<dyn CiProvider>,
        run_id: RunId,
        manager: ManagerHandle,
        stop: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            run_id,
            manager,
            stop,
            state: JobState::new(),
            poll_interval,
            api_retry: API_RETRY,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.watch())
    }

    /// Poll until the run concludes, a fetch fails for good, or the stop token fires.
    pub async fn watch(mut self) {
        loop {
            let snapshot = select! {
                biased;
                _ = self.stop.cancelled() => break,
                snapshot = self.fetch() => snapshot,
            };
            let (run, jobs) = match snapshot {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.manager.tell(ManagerMessage::Fatal(format!("fatal: {}", err)));
                    self.stop.cancel();
                    break;
                }
            };

            for event in self.state.diff(&jobs) {
                let msg = match event {
                    JobEvent::New(job) => ManagerMessage::Job(job),
                    JobEvent::Done(done) => ManagerMessage::JobDone(done),
                };
                if !self.manager.tell(msg) {
                    debug!("manager is gone, run watcher stopping");
                    return;
                }
            }

            if let Some(conclusion) = run.concluded() {
                self.manager.tell(ManagerMessage::WorkflowDone(WorkflowDone {
                    conclusion: conclusion.to_string(),
                }));
                break;
            }

            select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!("run watcher exiting");
    }

    async fn fetch(&self) -> Result<(WorkflowRun, Vec<WorkflowJob>)> {
        let provider = self.provider.as_ref();
        let run_id = self.run_id;
        let result = retry(self.api_retry, move || async move {
            // the run first, so a concluded run never comes with stale jobs
            let fetched = async {
                let run = provider.get_run(run_id).await?;
                let jobs = provider.list_jobs(run_id).await?;
                Ok::<_, ApiError>((run, jobs))
            };
            match fetched.await {
                Ok(snapshot) => Attempt::Done(snapshot),
                Err(err) if err.is_transient() => {
                    debug!("polling run {}: {}", run_id, err);
                    Attempt::Retry
                }
                Err(err) => Attempt::Fatal(err),
            }
        })
        .await;

        match result {
            Ok(snapshot) => Ok(snapshot),
            Err(RetryError::Fatal(err)) => Err(err.into()),
            Err(RetryError::Exceeded { .. }) => Err(TailError::RetriesExceeded("poll_run")),
        }
    }
}
