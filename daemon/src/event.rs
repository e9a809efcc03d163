use tokio::sync::oneshot;

use crate::config::Config;
use crate::gateway::{Request, Response};
use crate::monitor::StatusEvent;

/// Everything that can change engine state arrives through this one channel.
#[derive(Debug)]
pub enum DaemonEvent {
    /// Network reachability or the foreground game changed.
    Status(StatusEvent),
    /// The checkpoint timer fired; persist the ledger.
    CheckpointDue,
    /// A gateway call from the UI, answered on the oneshot sender.
    Request(Request, oneshot::Sender<Response>),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received or the UI went away; flush state and exit.
    Shutdown,
}
