use super::channel::{LogChannel, LogConnection};
use crate::actors::manager::{ManagerHandle, ManagerMessage};
use crate::errors::Result;
use crate::events::{OutputItem, WsSub};
use crate::retry::{retry, Attempt, RetryPolicy};
use crate::types::{JobName, Lines};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_RETRY: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(1));
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct Streamer {
    sub: WsSub,
    channel: Arc<dyn LogChannel>,
    manager: ManagerHandle,
    connect_retry: RetryPolicy,
    reconnect_delay: Duration,
}

impl Streamer {
    pub fn new(sub: WsSub, channel: Arc<dyn LogChannel>, manager: ManagerHandle) -> Self {
        Self {
            sub,
            channel,
            manager,
            connect_retry: CONNECT_RETRY,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[cfg(test)]
    fn with_timing(mut self, connect_retry: RetryPolicy, reconnect_delay: Duration) -> Self {
        self.connect_retry = connect_retry;
        self.reconnect_delay = reconnect_delay;
        self
    }

    fn job_name(&self) -> JobName {
        self.sub
            .job_name
            .clone()
            .unwrap_or_else(|| self.sub.job_id.to_string())
    }

    pub async fn run(self) {
        let url = ws_url(&self.sub.url);
        let name = self.job_name();
        loop {
            let mut conn = match self.connect(&url).await {
                Some(conn) => conn,
                None => {
                    warn!("could not connect to the live log of job '{}'", name);
                    break;
                }
            };
            match self.stream(conn.as_mut(), &name).await {
                Ok(()) => {
                    debug!("live log of job '{}' ended, reconnecting", name);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                Err(err) => {
                    debug!("live log of job '{}' failed: {}", name, err);
                    break;
                }
            }
        }
        self.manager.tell(ManagerMessage::WebsocketClosed {
            job_id: self.sub.job_id,
        });
    }

    async fn connect(&self, url: &str) -> Option<Box<dyn LogConnection>> {
        let channel = self.channel.as_ref();
        retry(self.connect_retry, move || async move {
            match channel.connect(url).await {
                Ok(conn) => Attempt::<_, ()>::Done(conn),
                Err(err) => {
                    debug!("connecting to {}: {}", url, err);
                    Attempt::Retry
                }
            }
        })
        .await
        .ok()
    }

    /// Replay the subscription and forward frames until the connection ends.
    async fn stream(&self, conn: &mut dyn LogConnection, name: &JobName) -> Result<()> {
        conn.send(&self.sub.subs).await?;
        while let Some(frame) = conn.next_frame().await? {
            if let Some(lines) = extract_lines(&frame) {
                self.manager
                    .tell(ManagerMessage::Output(OutputItem::new(name.clone(), lines)));
            }
        }
        Ok(())
    }
}

pub fn ws_url(url: &str) -> String {
    let bare = url
        .trim_start_matches("https://")
        .trim_start_matches("wss://");
    format!("wss://{}", bare)
}

/// Lines carried by a log frame; `None` for anything else.
pub fn extract_lines(frame: &str) -> Option<Lines> {
    let value: Value = serde_json::from_str(frame).ok()?;
    if let Some(status) = value.pointer("/data/status") {
        debug!(
            "job status frame: {} {}",
            status,
            value.pointer("/data/conclusion").unwrap_or(&serde_json::Value::Null)
        );
        return None;
    }
    let lines: Lines = value
        .pointer("/data/data/lines")?
        .as_array()?
        .iter()
        .filter_map(|line| line.get("line")?.as_str().map(str::to_string))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}
