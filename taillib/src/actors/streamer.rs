mod actor;
mod channel;

pub use actor::{extract_lines, ws_url};
pub use channel::{LogChannel, LogConnection, WsChannel};

use super::manager::ManagerHandle;
use crate::events::WsSub;
use actor::Streamer;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running streamer. Dropping the handle stops it.
#[derive(Debug)]
pub struct StreamerHandle {
    task: JoinHandle<()>,
}

impl StreamerHandle {
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn terminate(&self) {
        self.task.abort();
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts one streamer per discovered subscription.
pub trait StreamerLauncher: Send + Sync {
    fn launch(&self, sub: WsSub, manager: ManagerHandle) -> StreamerHandle;
}

pub struct WsLauncher {
    channel: Arc<dyn LogChannel>,
}

impl WsLauncher {
    pub fn new(channel: Arc<dyn LogChannel>) -> Self {
        Self { channel }
    }
}

impl StreamerLauncher for WsLauncher {
    fn launch(&self, sub: WsSub, manager: ManagerHandle) -> StreamerHandle {
        let streamer = Streamer::new(sub, self.channel.clone(), manager);
        StreamerHandle::from_task(tokio::spawn(streamer.run()))
    }
}
