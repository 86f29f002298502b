use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

pub const AUTOSAVE_QUIET_PERIOD: Duration = Duration::from_millis(500);

enum Signal {
    Changed,
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Debounced writer: a burst of changes produces one save, issued once no change has arrived
/// for the quiet period.
pub struct Autosave {
    tx: mpsc::UnboundedSender<Signal>,
}

impl Autosave {
    pub fn spawn<F, Fut>(quiet: Duration, save: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, quiet, save));
        Self { tx }
    }

    /// Restarts the quiet period.
    pub fn notify(&self) {
        let _ = self.tx.send(Signal::Changed);
    }

    /// Writes a pending change now instead of waiting for the quiet period.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Signal::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flushes and ends the writer task. Dropping the handle instead abandons a pending save.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Signal::Stop(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run<F, Fut>(mut rx: mpsc::UnboundedReceiver<Signal>, quiet: Duration, save: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut pending = false;
    loop {
        let signal = if pending {
            tokio::select! {
                signal = rx.recv() => signal,
                _ = tokio::time::sleep(quiet) => {
                    pending = false;
                    save().await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match signal {
            Some(Signal::Changed) => pending = true,
            Some(Signal::Flush(ack)) => {
                if pending {
                    pending = false;
                    save().await;
                }
                let _ = ack.send(());
            }
            Some(Signal::Stop(ack)) => {
                if pending {
                    save().await;
                }
                let _ = ack.send(());
                log::debug!("autosave stopped");
                return;
            }
            None => {
                if pending {
                    log::warn!("autosave handle dropped with an unsaved change; call stop first");
                }
                return;
            }
        }
    }
}
