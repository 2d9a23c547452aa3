use crate::events::{JobDone, OutputItem, WorkflowDone, WorkflowJob, WsSub};
use crate::types::JobId;

/// Everything the manager can be told. It is the only multi-sender inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerMessage {
    /// The intercepting proxy accepts connections.
    ProxyLive,
    /// A running job was discovered.
    Job(WorkflowJob),
    /// A job's live-log subscription was discovered.
    Subscription(WsSub),
    JobDone(JobDone),
    WorkflowDone(WorkflowDone),
    /// Decoded log lines from a streamer.
    Output(OutputItem),
    /// A streamer's connection closed abnormally; the streamer is gone.
    WebsocketClosed { job_id: JobId },
    /// A component hit an unrecoverable condition.
    Fatal(String),
}
