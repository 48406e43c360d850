//! Serialized, retrying executor for forwarder management commands.
//!
//! Every route registration the daemon makes funnels through one worker
//! task so commands reach the forwarder strictly in submission order, one
//! at a time. Callers rely on register/unregister being idempotent at the
//! forwarder; the executor never reorders or coalesces.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::protocols::ForwarderControl;
use crate::tlv::ControlArgs;

/// Delay between failed attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Pacing delay after a successful command, rate-limiting the channel.
const PACING_DELAY: Duration = Duration::from_millis(1);

/// Retry policy for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Retry until the command succeeds.
    Infinite,
    /// At most this many attempts.
    Limit(u32),
}

/// One forwarder management command.
#[derive(Debug, Clone)]
pub struct MgmtCmd {
    pub module: &'static str,
    pub cmd: &'static str,
    pub args: ControlArgs,
    pub retries: Retry,
}

/// Cheap-to-clone handle submitting commands to the worker.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<MgmtCmd>,
    stop: Arc<Notify>,
}

impl CommandQueue {
    /// Spawn the worker task against the given forwarder.
    pub fn spawn(forwarder: Arc<dyn ForwarderControl>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run(forwarder, rx, stop.clone()));
        (CommandQueue { tx, stop }, handle)
    }

    /// Submit a command. Callers hold the table lock, so submission never
    /// blocks on the forwarder; the channel is unbounded because a dropped
    /// route command would not be re-issued until the next full resync.
    pub fn execute(&self, cmd: MgmtCmd) {
        if self.tx.send(cmd).is_err() {
            debug!("command executor stopped, dropping command");
        }
    }

    /// Stop the worker after it drains already-queued commands. The
    /// in-flight command is not interrupted.
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

async fn run(
    forwarder: Arc<dyn ForwarderControl>,
    mut rx: mpsc::UnboundedReceiver<MgmtCmd>,
    stop: Arc<Notify>,
) {
    loop {
        let cmd = tokio::select! {
            cmd = rx.recv() => cmd,
            _ = stop.notified() => {
                // Close the channel; recv() keeps yielding what is already
                // queued, then returns None.
                rx.close();
                continue;
            }
        };

        let Some(cmd) = cmd else {
            debug!("command executor stopped");
            return;
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match forwarder.exec_mgmt_cmd(cmd.module, cmd.cmd, &cmd.args).await {
                Ok(res) if res.status_code == 200 || res.status_code == 409 => {
                    sleep(PACING_DELAY).await;
                    break;
                }
                Ok(res) => {
                    warn!(
                        module = cmd.module,
                        cmd = cmd.cmd,
                        attempt,
                        status = res.status_code,
                        text = %res.status_text,
                        "forwarder rejected command"
                    );
                }
                Err(e) => {
                    warn!(
                        module = cmd.module,
                        cmd = cmd.cmd,
                        attempt,
                        error = %e,
                        "forwarder command failed"
                    );
                }
            }

            if let Retry::Limit(n) = cmd.retries {
                if attempt >= n {
                    break;
                }
            }
            sleep(RETRY_BACKOFF).await;
        }
    }
}
