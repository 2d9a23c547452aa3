//! CI provider access: the REST client and the active-run lookup.

use crate::config::RunFilters;
use crate::errors::{ApiError, Result, TailError};
use crate::events::{WorkflowJob, WorkflowRun};
use crate::retry::{retry, Attempt, RetryError, RetryPolicy};
use crate::types::RunId;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const VALID_STATI: &[&str] = &[
    "queued",
    "in_progress",
    "requested",
    "waiting",
    "action_required",
];
/// Ten attempts, half a second apart.
pub const API_RETRY: RetryPolicy = RetryPolicy::new(9, Duration::from_millis(500));

const API_ROOT: &str = "https://api.github.com";

#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Every run triggered by `head_sha`.
    async fn list_runs(&self, head_sha: &str) -> std::result::Result<Vec<WorkflowRun>, ApiError>;
    /// Current state of a single run.
    async fn get_run(&self, run_id: RunId) -> std::result::Result<WorkflowRun, ApiError>;
    /// Current state of every job of a run.
    async fn list_jobs(&self, run_id: RunId) -> std::result::Result<Vec<WorkflowJob>, ApiError>;
}

#[derive(Deserialize)]
struct RunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct JobsPage {
    jobs: Vec<WorkflowJob>,
}

/// GitHub Actions REST client for a single repository.
pub struct GithubClient {
    inner: Client,
    repo: String,
}

impl GithubClient {
    pub fn new(token: &str, repo: impl Into<String>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::Fatal("token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let inner = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("runtail/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ApiError::Fatal(err.to_string()))?;
        Ok(Self {
            inner,
            repo: repo.into(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<T, ApiError> {
        let url = format!("{}/repos/{}/actions/{}", API_ROOT, self.repo, path);
        let response = self
            .inner
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| ApiError::Transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let rate_limited = response
                .headers()
                .get("x-ratelimit-remaining")
                .map_or(false, |remaining| remaining == "0");
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, rate_limited, format!("{} {}: {}", status, url, body)));
        }
        response
            .json()
            .await
            .map_err(|err| ApiError::Fatal(err.to_string()))
    }
}

fn classify(status: StatusCode, rate_limited: bool, message: String) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || (status == StatusCode::FORBIDDEN && rate_limited)
    {
        ApiError::Transient(message)
    } else {
        ApiError::Fatal(message)
    }
}

#[async_trait]
impl CiProvider for GithubClient {
    async fn list_runs(&self, head_sha: &str) -> std::result::Result<Vec<WorkflowRun>, ApiError> {
        let page: RunsPage = self.get("runs", &[("head_sha", head_sha)]).await?;
        Ok(page.workflow_runs)
    }

    async fn get_run(&self, run_id: RunId) -> std::result::Result<WorkflowRun, ApiError> {
        self.get(&format!("runs/{}", run_id), &[]).await
    }

    async fn list_jobs(&self, run_id: RunId) -> std::result::Result<Vec<WorkflowJob>, ApiError> {
        let page: JobsPage = self
            .get(&format!("runs/{}/jobs", run_id), &[("per_page", "100")])
            .await?;
        Ok(page.jobs)
    }
}

/// Keep the runs that are still active and match the optional name/ref filters.
pub fn filter_runs(filters: &RunFilters, runs: Vec<WorkflowRun>) -> Vec<WorkflowRun> {
    runs.into_iter()
        .filter(|run| VALID_STATI.contains(&run.status.as_str()))
        .filter(|run| {
            filters
                .workflow_name
                .as_ref()
                .map_or(true, |name| &run.name == name)
        })
        .filter(|run| {
            filters
                .ref_name
                .as_ref()
                .map_or(true, |ref_name| ref_name.ends_with(&run.head_branch))
        })
        .collect()
}

/// Find the single active run for the filters, waiting a little for it to show up.
pub async fn find_active_run(
    provider: &dyn CiProvider,
    filters: &RunFilters,
) -> Result<WorkflowRun> {
    find_active_run_with(provider, filters, API_RETRY).await
}

pub(crate) async fn find_active_run_with(
    provider: &dyn CiProvider,
    filters: &RunFilters,
    policy: RetryPolicy,
) -> Result<WorkflowRun> {
    let result = retry(policy, move || async move {
        let runs = match provider.list_runs(&filters.commit_sha).await {
            Ok(runs) => runs,
            Err(err) if err.is_transient() => {
                debug!("listing runs: {}", err);
                return Attempt::Retry;
            }
            Err(err) => return Attempt::Fatal(TailError::from(err)),
        };
        let mut runs = filter_runs(filters, runs);
        match runs.len() {
            0 => Attempt::Retry,
            1 => Attempt::Done(runs.remove(0)),
            _ => Attempt::Fatal(TailError::AmbiguousRun {
                sha: filters.commit_sha.clone(),
                urls: runs.into_iter().map(|run| run.html_url).collect(),
            }),
        }
    })
    .await;

    match result {
        Ok(run) => Ok(run),
        Err(RetryError::Fatal(err)) => Err(err),
        Err(RetryError::Exceeded { attempts }) => {
            warn!("no active run after {} attempts", attempts);
            Err(TailError::RetriesExceeded("find_active_run"))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses; the last one repeats forever.
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub runs: Mutex<VecDeque<std::result::Result<Vec<WorkflowRun>, ApiError>>>,
        pub run: Mutex<VecDeque<std::result::Result<WorkflowRun, ApiError>>>,
        pub jobs: Mutex<VecDeque<std::result::Result<Vec<WorkflowJob>, ApiError>>>,
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("script ran dry")
        }
    }

    #[async_trait]
    impl CiProvider for ScriptedProvider {
        async fn list_runs(&self, _: &str) -> std::result::Result<Vec<WorkflowRun>, ApiError> {
            next(&self.runs)
        }
        async fn get_run(&self, _: RunId) -> std::result::Result<WorkflowRun, ApiError> {
            next(&self.run)
        }
        async fn list_jobs(&self, _: RunId) -> std::result::Result<Vec<WorkflowJob>, ApiError> {
            next(&self.jobs)
        }
    }

    pub fn run(status: &str, name: &str, head_branch: &str) -> WorkflowRun {
        WorkflowRun {
            id: 1,
            name: name.into(),
            status: status.into(),
            conclusion: None,
            head_branch: head_branch.into(),
            html_url: format!("https://github.com/o/r/actions/runs/{}", name),
        }
    }

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(0));

    #[tokio::test]
    async fn api_retry_makes_ten_attempts() {
        let mut calls = 0;
        let policy = RetryPolicy {
            delay: Duration::ZERO,
            ..API_RETRY
        };
        let result = retry(policy, || {
            calls += 1;
            async { Attempt::<(), ()>::Retry }
        })
        .await;
        assert_eq!(result, Err(RetryError::Exceeded { attempts: 10 }));
        assert_eq!(calls, 10);
    }

    #[test]
    fn filters_runs() {
        let none = RunFilters::default();
        assert!(filter_runs(&none, vec![]).is_empty());
        assert_eq!(filter_runs(&none, vec![run("queued", "", "")]).len(), 1);
        assert!(filter_runs(&none, vec![run("fried", "", "")]).is_empty());

        let by_name = RunFilters {
            workflow_name: Some("foobar".into()),
            ..Default::default()
        };
        assert_eq!(
            filter_runs(
                &by_name,
                vec![run("queued", "foobar", ""), run("in_progress", "not-foobar", "")]
            ),
            vec![run("queued", "foobar", "")]
        );

        let by_ref = RunFilters {
            ref_name: Some("refs/tags/v1.0.0".into()),
            ..Default::default()
        };
        assert_eq!(
            filter_runs(
                &by_ref,
                vec![
                    run("queued", "a", "v1.0.0"),
                    run("in_progress", "b", "tags/v1.0.0"),
                    run("in_progress", "c", "foobar"),
                ]
            ),
            vec![run("queued", "a", "v1.0.0"), run("in_progress", "b", "tags/v1.0.0")]
        );
    }

    #[test]
    fn classifies_statuses() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, false, String::new()).is_transient());
        assert!(classify(StatusCode::BAD_GATEWAY, false, String::new()).is_transient());
        assert!(classify(StatusCode::FORBIDDEN, true, String::new()).is_transient());
        assert!(!classify(StatusCode::FORBIDDEN, false, String::new()).is_transient());
        assert!(!classify(StatusCode::NOT_FOUND, false, String::new()).is_transient());
        assert!(!classify(StatusCode::UNAUTHORIZED, false, String::new()).is_transient());
    }

    #[tokio::test]
    async fn waits_for_run_to_show_up() {
        let provider = ScriptedProvider::default();
        provider.runs.lock().unwrap().extend([
            Err(ApiError::Transient("flaky".into())),
            Ok(vec![]),
            Ok(vec![run("queued", "wf", "main")]),
        ]);
        let found = find_active_run_with(&provider, &RunFilters::default(), FAST)
            .await
            .unwrap();
        assert_eq!(found.name, "wf");
    }

    #[tokio::test]
    async fn gives_up_eventually() {
        let provider = ScriptedProvider::default();
        provider
            .runs
            .lock()
            .unwrap()
            .push_back(Ok(vec![run("fried", "wf", "main")]));
        let err = find_active_run_with(&provider, &RunFilters::default(), FAST)
            .await
            .unwrap_err();
        assert!(matches!(err, TailError::RetriesExceeded(_)));
    }

    #[tokio::test]
    async fn fatal_api_error_is_not_retried() {
        let provider = ScriptedProvider::default();
        provider.runs.lock().unwrap().extend([
            Err(ApiError::Fatal("401".into())),
            Ok(vec![run("queued", "wf", "main")]),
        ]);
        let err = find_active_run_with(&provider, &RunFilters::default(), FAST)
            .await
            .unwrap_err();
        assert!(matches!(err, TailError::Api(ApiError::Fatal(_))));
    }

    #[tokio::test]
    async fn ambiguous_runs() {
        let provider = ScriptedProvider::default();
        provider
            .runs
            .lock()
            .unwrap()
            .push_back(Ok(vec![run("queued", "a", "main"), run("waiting", "b", "main")]));
        let err = find_active_run_with(&provider, &RunFilters::default(), FAST)
            .await
            .unwrap_err();
        match err {
            TailError::AmbiguousRun { urls, .. } => assert_eq!(urls.len(), 2),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
