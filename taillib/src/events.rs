//! Values that cross actor boundaries.
//!
//! Everything here is plain data: cloned onto a channel by its producer and
//! consumed by exactly one receiver.

use crate::types::{Conclusion, JobId, JobName, Lines, RunId};
use serde::Deserialize;

/// One job of a workflow run, as reported by the CI provider.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorkflowJob {
    pub id: JobId,
    pub name: JobName,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
}

impl WorkflowJob {
    /// The job's conclusion, if it has a non-empty one.
    pub fn concluded(&self) -> Option<&str> {
        self.conclusion.as_deref().filter(|c| !c.is_empty())
    }
}

/// A workflow run, as reported by the CI provider.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
    #[serde(default)]
    pub head_branch: String,
    #[serde(default)]
    pub html_url: String,
}

impl WorkflowRun {
    pub fn concluded(&self) -> Option<&str> {
        self.conclusion.as_deref().filter(|c| !c.is_empty())
    }
}

/// A job reached its conclusion. Emitted once per job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDone {
    pub job_id: JobId,
    pub job_name: JobName,
    pub conclusion: Conclusion,
}

/// The whole run reached its conclusion. Terminal for the run watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowDone {
    pub conclusion: Conclusion,
}

/// What a poll cycle found out about a single job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    New(WorkflowJob),
    Done(JobDone),
}

/// A websocket subscription discovered in the intercepted traffic.
///
/// `job_name` is unknown to the proxy watcher and gets filled in by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsSub {
    pub url: String,
    pub subs: String,
    pub job_id: JobId,
    pub job_name: Option<JobName>,
}

/// A batch of lines belonging to one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputItem {
    pub job_name: JobName,
    pub lines: Lines,
}

impl OutputItem {
    pub fn new(job_name: impl Into<JobName>, lines: Lines) -> Self {
        Self {
            job_name: job_name.into(),
            lines,
        }
    }

    /// A single conclusion marker line, decorated by the formatter.
    pub fn conclusion(job_name: impl Into<JobName>, conclusion: &str) -> Self {
        Self::new(job_name, vec![format!("##[conclusion]{}", conclusion)])
    }
}

/// What travels on the output queue to the formatter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Item(OutputItem),
    End,
}
