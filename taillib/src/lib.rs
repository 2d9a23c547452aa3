//! Live-tail a GitHub Actions run: poll the run for its jobs, let a browser
//! open each job page behind an intercepting proxy to learn the job's live
//! log subscription, then stream every job's log to one labeled output.

pub mod actors;
pub mod buffer_state;
pub mod config;
pub mod driver;
pub mod errors;
pub mod events;
pub mod fmt;
pub mod git;
pub mod github;
pub mod job_state;
pub mod ports;
pub mod retry;
pub mod types;

pub use config::{Config, Credentials, RunFilters};
pub use errors::{Result, TailError};

use actors::browser::{spawn_watcher, BrowserHandle};
use actors::formatter::Formatter;
use actors::manager::ManagerHandle;
use actors::proxy::ProxyWatcher;
use actors::run_watcher::RunWatcher;
use actors::streamer::{WsChannel, WsLauncher};
use driver::{session::CookieJar, CdpBrowser};
use events::WorkflowRun;
use github::CiProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tail `run` until it concludes or `stop` is cancelled.
///
/// Job output goes to stdout. Resolves to `true` when nothing reported a
/// fatal condition along the way.
pub async fn tail(
    config: &Config,
    run: &WorkflowRun,
    provider: Arc<dyn CiProvider>,
    stop: CancellationToken,
) -> Result<bool> {
    let driver = Arc::new(CdpBrowser::launch(config).await?);

    let (browser, browse_inbox) = BrowserHandle::channel();
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let formatter = Formatter::new(output_rx, tokio::io::stdout()).spawn();
    let launcher = Arc::new(WsLauncher::new(Arc::new(WsChannel::new(
        config.user_agent.clone(),
    ))));
    let (manager, manager_task) = ManagerHandle::spawn(browser, output_tx, stop.clone(), launcher);

    let browser_task = spawn_watcher(
        browse_inbox,
        driver,
        CookieJar::new(&config.cookie_jar, config.credentials.user.clone()),
        config.credentials.clone(),
        manager.clone(),
        stop.clone(),
    );
    let proxy_task = match ProxyWatcher::spawn(config, manager.clone(), stop.clone()) {
        Ok(task) => task,
        Err(err) => {
            stop.cancel();
            return Err(err);
        }
    };
    let run_task = RunWatcher::new(provider, run.id, manager, stop.clone(), config.poll_interval).spawn();

    let clean = manager_task.await.unwrap_or_else(|err| {
        warn!("manager task failed: {}", err);
        false
    });

    // the manager cancelled `stop` on its way out
    for (name, task) in [
        ("run watcher", run_task),
        ("proxy watcher", proxy_task),
        ("browser watcher", browser_task),
    ] {
        wind_down(name, task).await;
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, formatter).await {
        Ok(Ok(Ok(_))) => {}
        Ok(Ok(Err(err))) => debug!("writing output: {}", err),
        Ok(Err(err)) => warn!("formatter task failed: {}", err),
        Err(_) => warn!("formatter did not finish in time"),
    }
    Ok(clean)
}

async fn wind_down(name: &str, mut task: JoinHandle<()>) {
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
        warn!("{} did not stop in time", name);
        task.abort();
    }
}
