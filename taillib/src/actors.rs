pub mod browser;
pub mod formatter;
pub mod manager;
pub mod proxy;
pub mod run_watcher;
pub mod streamer;
