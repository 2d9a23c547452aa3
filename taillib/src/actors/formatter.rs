//! Prints the unified output stream.

use crate::events::Output;
use crate::fmt::{render, Palette};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Formatter<W> {
    output: mpsc::UnboundedReceiver<Output>,
    writer: W,
    palette: Palette,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Formatter<W> {
    pub fn new(output: mpsc::UnboundedReceiver<Output>, writer: W) -> Self {
        Self {
            output,
            writer,
            palette: Palette::new(),
        }
    }

    pub fn spawn(self) -> JoinHandle<io::Result<W>> {
        tokio::spawn(self.run())
    }

    /// Print items until the end marker arrives or every sender is gone,
    /// then hand back the writer.
    pub async fn run(mut self) -> io::Result<W> {
        while let Some(Output::Item(item)) = self.output.recv().await {
            let color = self.palette.color_for(&item.job_name);
            let mut text = render(&item, color).join("\n");
            text.push('\n');
            self.writer.write_all(text.as_bytes()).await?;
            self.writer.flush().await?;
        }
        debug!("formatter exiting");
        Ok(self.writer)
    }
}
