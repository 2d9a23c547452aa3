use crate::types::JobId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisitRequest {
    pub url: String,
    pub job_id: JobId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowseRequest {
    /// The proxy accepts connections; browsing may start.
    ProxyLive,
    Visit(VisitRequest),
    /// The job's subscription was seen, its page is no longer needed.
    Close { job_id: JobId },
    Exit,
}
