//! Watcher fan-in
//!
//! Joins the per-client watch subscriptions of one or more storage clients
//! into a single pair of shared event/error channels, used by `watch` and
//! continuous-mirror modes. Each joined client gets its own forwarding task;
//! a wait over those tasks is the only synchronization needed for shutdown.
//!
//! `stop` first closes every underlying subscription, then awaits all
//! forwarding tasks, and only then drops the shared senders. Producers are
//! therefore gone before the shared channels close, so a receiver seeing the
//! channel end knows no further events can arrive.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::{StorageClient, WatchEvent};
use crate::error::{Error, Result};

const CHANNEL_CAP: usize = 64;

/// Fan-in over any number of client watch subscriptions.
pub struct Watcher {
    events_tx: Option<mpsc::Sender<WatchEvent>>,
    errors_tx: Option<mpsc::Sender<Error>>,
    shutdowns: Vec<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Create a watcher together with its shared event and error receivers.
    pub fn new() -> (Self, mpsc::Receiver<WatchEvent>, mpsc::Receiver<Error>) {
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAP);
        let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_CAP);
        (
            Self {
                events_tx: Some(events_tx),
                errors_tx: Some(errors_tx),
                shutdowns: Vec::new(),
                tasks: Vec::new(),
            },
            events_rx,
            errors_rx,
        )
    }

    /// Whether any client has been joined.
    pub fn watching(&self) -> bool {
        !self.shutdowns.is_empty()
    }

    /// Join a client's watch stream into the shared channels.
    ///
    /// Fails with `NoWatcherCapability` when the client does not support
    /// watching. Events from one client keep their arrival order; no ordering
    /// holds across clients.
    pub async fn join(&mut self, client: &dyn StorageClient, recursive: bool) -> Result<()> {
        let events_tx = self
            .events_tx
            .clone()
            .ok_or_else(|| Error::General("watcher is already stopped".to_string()))?;
        let errors_tx = self
            .errors_tx
            .clone()
            .ok_or_else(|| Error::General("watcher is already stopped".to_string()))?;

        let subscription = client.watch(recursive).await?;
        let (mut events, mut errors, shutdown) = subscription.into_parts();
        self.shutdowns.push(shutdown);

        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                    error = errors.recv() => match error {
                        Some(error) => {
                            if errors_tx.send(error).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            }
        }));

        Ok(())
    }

    /// Close all subscriptions, wait for every forwarding task to exit, then
    /// close the shared channels. Idempotent.
    pub async fn stop(&mut self) {
        for shutdown in self.shutdowns.drain(..) {
            let _ = shutdown.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.events_tx.take();
        self.errors_tx.take();
    }
}
