//! Owns the intercepting proxy and turns its trace output into subscriptions.

use super::manager::{ManagerHandle, ManagerMessage};
use crate::buffer_state::BufferState;
use crate::config::Config;
use crate::errors::{Result, TailError};
use crate::retry::{retry, Attempt, RetryError, RetryPolicy};
use crate::types::Port;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::select;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// fifty attempts, 0.2s apart
const LIVENESS_RETRY: RetryPolicy = RetryPolicy::new(49, Duration::from_millis(200));

pub struct ProxyWatcher {
    port: Port,
    manager: ManagerHandle,
    stop: CancellationToken,
}

impl ProxyWatcher {
    /// Launch the proxy on `config.port` and watch it until the stop token fires.
    pub fn spawn(
        config: &Config,
        manager: ManagerHandle,
        stop: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let child = Command::new(&config.mitmdump)
            .args(["--listen-host", "127.0.0.1", "--listen-port"])
            .arg(config.port.to_string())
            .args(["--flow-detail", "4"])
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        debug!("proxy started on port {}", config.port);
        let watcher = Self {
            port: config.port,
            manager,
            stop,
        };
        Ok(tokio::spawn(watcher.run(child)))
    }

    async fn run(self, mut child: Child) {
        let stdout = child.stdout.take();
        match check_liveness(self.port, &mut child, LIVENESS_RETRY).await {
            Ok(()) => {
                debug!("proxy is live");
                self.manager.tell(ManagerMessage::ProxyLive);
                if let Some(stdout) = stdout {
                    self.watch(BufReader::new(stdout)).await;
                }
            }
            Err(err) => {
                debug!("liveness check failed: {}", err);
                self.fail(TailError::ProxyNotLive);
            }
        }
        if let Err(err) = child.kill().await {
            debug!("killing the proxy: {}", err);
        }
        debug!("proxy watcher exiting");
    }

    /// Feed trace lines through a [`BufferState`] until the stop token fires
    /// or the output ends.
    async fn watch<R: AsyncBufRead + Unpin>(&self, reader: R) {
        // trace output may contain arbitrary bytes, so split instead of `lines()`
        let mut lines = SplitStream::new(reader.split(b'\n'));
        let mut state = BufferState::new();
        loop {
            select! {
                biased;
                _ = self.stop.cancelled() => return,
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        let line = String::from_utf8_lossy(&line);
                        trace!("proxy: {}", line);
                        if let Some(sub) = state.process_line(&line) {
                            debug!("found subscription for job {}", sub.job_id);
                            if !self.manager.tell(ManagerMessage::Subscription(sub)) {
                                return;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        debug!("reading proxy output: {}", err);
                        self.fail(TailError::ProxyExited);
                        return;
                    }
                    None => {
                        self.fail(TailError::ProxyExited);
                        return;
                    }
                },
            }
        }
    }

    fn fail(&self, err: TailError) {
        self.manager.tell(ManagerMessage::Fatal(format!("fatal: {}", err)));
        self.stop.cancel();
    }
}

/// Wait for `port` to accept connections, giving up early if `child` exits.
async fn check_liveness(port: Port, child: &mut Child, policy: RetryPolicy) -> Result<()> {
    let result = retry(policy, || {
        let exited = !matches!(child.try_wait(), Ok(None));
        async move {
            if exited {
                return Attempt::Fatal(TailError::ProxyExited);
            }
            match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
                Ok(_) => Attempt::Done(()),
                Err(_) => Attempt::Retry,
            }
        }
    })
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(RetryError::Exceeded { .. }) => Err(TailError::ProxyNotLive),
        Err(RetryError::Fatal(err)) => Err(err),
    }
}
