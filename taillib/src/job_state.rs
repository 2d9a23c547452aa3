use crate::events::{JobDone, JobEvent, WorkflowJob};
use crate::types::JobId;
use std::collections::HashSet;

/// Remembers which jobs have been announced and which have concluded, so that
/// each poll of the full job list only yields what changed.
#[derive(Default, Debug)]
pub struct JobState {
    seen: HashSet<JobId>,
    concluded: HashSet<JobId>,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff the current job snapshot against everything seen so far.
    ///
    /// A job yields `JobEvent::New` at most once and `JobEvent::Done` exactly
    /// once, the first time its conclusion is non-empty. A job that is already
    /// concluded when first seen only yields `Done`.
    pub fn diff(&mut self, jobs: &[WorkflowJob]) -> Vec<JobEvent> {
        let mut events = Vec::new();
        for job in jobs {
            if let Some(conclusion) = job.concluded() {
                if self.concluded.insert(job.id) {
                    events.push(JobEvent::Done(JobDone {
                        job_id: job.id,
                        job_name: job.name.clone(),
                        conclusion: conclusion.to_string(),
                    }));
                    continue;
                }
            }
            if !self.seen.contains(&job.id) && !self.concluded.contains(&job.id) {
                self.seen.insert(job.id);
                events.push(JobEvent::New(job.clone()));
            }
        }
        events
    }

    pub fn is_concluded(&self, job_id: JobId) -> bool {
        self.concluded.contains(&job_id)
    }
}
