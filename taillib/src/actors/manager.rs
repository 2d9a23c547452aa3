mod actor;
mod messages;

pub use actor::WORKFLOW;
pub use messages::ManagerMessage;

use super::browser::BrowserHandle;
use super::streamer::StreamerLauncher;
use crate::events::Output;
use actor::Manager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to the manager actor: the broker that correlates job identity
/// across the run watcher, proxy watcher and browser, and owns the streamers.
///
/// Cloning the handle is cheap; every component that reports to the manager
/// holds its own clone.
#[derive(Clone, Debug)]
pub struct ManagerHandle {
    sender: mpsc::UnboundedSender<ManagerMessage>,
}

impl ManagerHandle {
    /// Spawn the manager.
    ///
    /// The returned task resolves once the manager has shut down, to `true`
    /// when no component reported a fatal condition.
    pub fn spawn(
        browser: BrowserHandle,
        output: mpsc::UnboundedSender<Output>,
        stop: CancellationToken,
        launcher: Arc<dyn StreamerLauncher>,
    ) -> (Self, JoinHandle<bool>) {
        let (handle, inbox) = Self::channel();
        let manager = Manager::new(inbox, handle.clone(), browser, output, stop, launcher);
        let task = tokio::spawn(manager.run());
        (handle, task)
    }

    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ManagerMessage>) {
        let (sender, inbox) = mpsc::unbounded_channel();
        (Self { sender }, inbox)
    }

    /// Send a message; `false` once the manager is gone.
    pub fn tell(&self, msg: ManagerMessage) -> bool {
        self.sender.send(msg).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}
